use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::info;

use storekeeper::{StorageClient, StorageConfig, UploadOptions, UploadProgress};

#[derive(Parser, Debug)]
#[command(
    name = "storectl",
    version = env!("CARGO_PKG_VERSION"),
    author = "Tyr Chen <tyr.chen@gmail.com>",
    about = "Manage buckets and transfer objects on S3-compatible storage",
    long_about = "A small client for S3-compatible storage. Bucket creation is idempotent, deleting a \
                  missing bucket succeeds, and large files can be sent with a managed multipart upload. \
                  Configure via environment variables or a .env file.",
    after_help = "Examples:\n  \
                  storectl ensure-bucket media                         # Create bucket if missing\n  \
                  storectl upload media videos/a.mp4 ./a.mp4 -m -e     # Multipart upload, create bucket\n  \
                  storectl download media videos/a.mp4 -o ./copy.mp4   # Download to a file\n  \
                  storectl delete-bucket media                         # Delete bucket if present\n\n\
                  Configuration (.env):\n  \
                  AWS_ENDPOINT=http://localhost:9000\n  \
                  AWS_ACCESS_KEY_ID=minioadmin\n  \
                  AWS_SECRET_ACCESS_KEY=minioadmin\n  \
                  AWS_REGION=us-east-1            # optional\n  \
                  AWS_PART_SIZE=5242880           # optional, bytes\n  \
                  AWS_MAX_CONCURRENCY=4           # optional\n  \
                  AWS_FORCE_PATH_STYLE=true       # optional, needed for MinIO"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a bucket unless it already exists
    EnsureBucket {
        bucket: String,
    },

    /// Delete a bucket (succeeds if it does not exist)
    DeleteBucket {
        bucket: String,
    },

    /// Upload a local file
    Upload {
        bucket: String,
        key: String,
        /// Local file to upload
        file: PathBuf,

        /// Use multipart upload with the configured part size and concurrency
        #[arg(long, short = 'm')]
        multipart: bool,

        /// Create the bucket first if it does not exist
        #[arg(long, short = 'e')]
        ensure_bucket: bool,
    },

    /// Download an object to a file or stdout
    Download {
        bucket: String,
        key: String,

        /// Output file (defaults to stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file early to get LOG_LEVEL
    dotenv::dotenv().ok();

    // Initialize tracing/logging with support for LOG_LEVEL from .env
    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("storectl v{}", env!("CARGO_PKG_VERSION"));

    let config = StorageConfig::from_env()?;
    let client = StorageClient::new(&config);

    match cli.command {
        Command::EnsureBucket { bucket } => {
            client.ensure_bucket(&bucket).await?;
            eprintln!("{} bucket {} is ready", style("✓").green(), style(&bucket).bold());
        }
        Command::DeleteBucket { bucket } => {
            client.delete_bucket(&bucket).await?;
            eprintln!("{} bucket {} is gone", style("✓").green(), style(&bucket).bold());
        }
        Command::Upload {
            bucket,
            key,
            file,
            multipart,
            ensure_bucket,
        } => {
            let size = file_size(&file).await?;
            let body = ByteStream::from_path(&file)
                .await
                .context("Failed to create byte stream from file")?;

            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")?
                    .progress_chars("#>-"),
            );
            pb.set_message(format!("Uploading {}", file.display()));

            let observer_pb = pb.clone();
            let options = UploadOptions::new()
                .ensure_bucket(ensure_bucket)
                .multipart(multipart)
                .with_progress(move |_key: &str, progress: UploadProgress| {
                    observer_pb.set_position(progress.loaded);
                });

            let started = Instant::now();
            let result = client.upload_object(&bucket, &key, body, options).await;
            pb.finish_and_clear();
            result?;

            eprintln!(
                "{} {} -> s3://{}/{} ({})",
                style("✓").green(),
                style(file.display()).green(),
                bucket,
                key,
                style(format!(
                    "{}, {:.2}s",
                    format_size(size),
                    started.elapsed().as_secs_f64()
                ))
                .dim()
            );
        }
        Command::Download {
            bucket,
            key,
            output,
        } => {
            let body = client.download_object(&bucket, &key).await?;
            let mut reader = Box::pin(body.into_async_read());

            let written = match &output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(path)
                        .await
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let n = tokio::io::copy(&mut reader, &mut file).await?;
                    file.flush().await?;
                    n
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    let n = tokio::io::copy(&mut reader, &mut stdout).await?;
                    stdout.flush().await?;
                    n
                }
            };

            if let Some(path) = output {
                eprintln!(
                    "{} s3://{}/{} -> {} ({})",
                    style("✓").green(),
                    bucket,
                    key,
                    style(path.display()).green(),
                    style(format_size(written)).dim()
                );
            }
        }
    }

    Ok(())
}

async fn file_size(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if !metadata.is_file() {
        anyhow::bail!("Not a file: {}", path.display());
    }
    Ok(metadata.len())
}

/// Format file size for display
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
