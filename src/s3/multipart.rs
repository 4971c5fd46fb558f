use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use aws_sdk_s3::{
    Client,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use futures::{StreamExt, TryStreamExt, future, stream};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use super::error::TransportError;
use super::transport::{ManagedUpload, UploadProgress};

// Initial buffer per part; grows only as far as the body actually goes
const READ_CAPACITY: usize = 64 * 1024;

/// Reads an upload body in fixed-size parts
struct PartReader {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    part_size: usize,
}

impl PartReader {
    fn new(body: ByteStream, part_size: usize) -> Self {
        Self {
            reader: Box::pin(body.into_async_read()),
            part_size,
        }
    }

    /// Next part of at most `part_size` bytes, or `None` at end of stream.
    ///
    /// Only the final part can be shorter than `part_size`.
    async fn next_part(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buffer = Vec::with_capacity(self.part_size.min(READ_CAPACITY));
        (&mut self.reader)
            .take(self.part_size as u64)
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| TransportError::Local(e.into()))?;

        if buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buffer))
        }
    }
}

/// Exact body length, if the stream knows it up front
fn exact_len(body: &ByteStream) -> Option<u64> {
    match body.size_hint() {
        (lower, Some(upper)) if lower == upper => Some(upper),
        _ => None,
    }
}

/// Upload a body using S3 multipart upload
///
/// The body is read sequentially in `part_size` chunks while up to `queue_size`
/// parts are in flight. A body that fits in a single part is sent with one
/// PutObject instead. If anything fails after the upload is initiated, the
/// multipart upload is aborted so no orphaned parts are left behind.
pub(crate) async fn upload_multipart(
    client: &Client,
    upload: ManagedUpload,
) -> Result<(), TransportError> {
    let ManagedUpload {
        bucket,
        key,
        body,
        part_size,
        queue_size,
        observer,
    } = upload;

    let total = exact_len(&body);
    let part_size = usize::try_from(part_size)
        .map_err(|_| anyhow!("part size {} does not fit in memory", part_size))?;
    let mut reader = PartReader::new(body, part_size);

    let first = reader.next_part().await?.unwrap_or_default();
    if first.len() < part_size {
        let len = first.len() as u64;
        debug!(
            "Body for {} fits in one part ({} bytes), using single PutObject",
            key, len
        );
        client
            .put_object()
            .bucket(&bucket)
            .key(&key)
            .content_length(len as i64)
            .body(ByteStream::from(first))
            .send()
            .await?;
        observer.on_progress(&key, UploadProgress { loaded: len, total });
        return Ok(());
    }

    info!(
        "Starting multipart upload for s3://{}/{} (part size {} bytes, queue size {})",
        bucket, key, part_size, queue_size
    );

    // Initiate multipart upload
    let multipart = client
        .create_multipart_upload()
        .bucket(&bucket)
        .key(&key)
        .send()
        .await?;

    let upload_id = multipart
        .upload_id()
        .ok_or_else(|| TransportError::service(None::<String>, "No upload ID returned from S3"))?
        .to_string();

    debug!("Multipart upload initiated with ID: {}", upload_id);

    let loaded = Arc::new(AtomicU64::new(0));
    let uploaded = upload_parts(first, reader, queue_size, |part_number, bytes| {
        let (client, bucket, key) = (client.clone(), bucket.clone(), key.clone());
        let (upload_id, loaded, observer) =
            (upload_id.clone(), Arc::clone(&loaded), Arc::clone(&observer));
        async move {
            let len = bytes.len() as u64;
            debug!("Uploading part {} ({} bytes)", part_number, len);

            let output = client
                .upload_part()
                .bucket(bucket)
                .key(&key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_length(len as i64)
                .body(ByteStream::from(bytes))
                .send()
                .await?;

            let done = loaded.fetch_add(len, Ordering::Relaxed) + len;
            observer.on_progress(&key, UploadProgress { loaded: done, total });

            Ok::<_, TransportError>(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .build(),
            )
        }
    })
    .await;

    let result = match uploaded {
        Ok(parts) => complete_multipart_upload(client, &bucket, &key, &upload_id, parts).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        warn!("Multipart upload of s3://{}/{} failed: {}", bucket, key, e);
        if let Err(abort_err) = abort_multipart_upload(client, &bucket, &key, &upload_id).await {
            warn!("Failed to abort multipart upload {}: {}", upload_id, abort_err);
        }
        return Err(e);
    }

    info!(
        "Successfully completed multipart upload: s3://{}/{} ({} bytes)",
        bucket,
        key,
        loaded.load(Ordering::Relaxed)
    );

    Ok(())
}

/// Feed `first` and the rest of `reader` to `upload_part`, numbering parts from 1.
///
/// Parts are read one at a time and at most `queue_size` uploads run at once,
/// so memory stays bounded by `queue_size` parts. Stops at the first error.
async fn upload_parts<F, Fut>(
    first: Vec<u8>,
    reader: PartReader,
    queue_size: usize,
    mut upload_part: F,
) -> Result<Vec<CompletedPart>, TransportError>
where
    F: FnMut(i32, Vec<u8>) -> Fut,
    Fut: Future<Output = Result<CompletedPart, TransportError>>,
{
    let rest = stream::try_unfold(reader, |mut reader| async move {
        Ok::<_, TransportError>(reader.next_part().await?.map(|part| (part, reader)))
    });

    stream::once(future::ready(Ok::<_, TransportError>(first)))
        .chain(rest)
        .enumerate()
        .map(|(index, part)| part.map(|bytes| upload_part(index as i32 + 1, bytes)))
        .try_buffer_unordered(queue_size.max(1))
        .try_collect()
        .await
}

async fn complete_multipart_upload(
    client: &Client,
    bucket: &str,
    key: &str,
    upload_id: &str,
    mut parts: Vec<CompletedPart>,
) -> Result<(), TransportError> {
    // Parts finish out of order; S3 requires them ascending
    parts.sort_by_key(|part| part.part_number());

    debug!(
        "All {} parts uploaded, completing multipart upload",
        parts.len()
    );

    let completed = CompletedMultipartUpload::builder()
        .set_parts(Some(parts))
        .build();

    client
        .complete_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .multipart_upload(completed)
        .send()
        .await?;

    Ok(())
}

/// Abort a multipart upload (for cleanup on error)
async fn abort_multipart_upload(
    client: &Client,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<(), TransportError> {
    client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .send()
        .await?;

    debug!("Aborted multipart upload {}", upload_id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::transport::ProgressObserver;
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadOutput;
    use aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadOutput;
    use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadOutput;
    use aws_sdk_s3::operation::put_object::PutObjectOutput;
    use aws_sdk_s3::operation::upload_part::{UploadPartError, UploadPartOutput};
    use aws_smithy_mocks::{RuleMode, mock, mock_client};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    type Events = Arc<Mutex<Vec<UploadProgress>>>;

    fn managed(body: Vec<u8>, part_size: u64, queue_size: usize) -> (ManagedUpload, Events) {
        let events: Events = Arc::default();
        let seen = Arc::clone(&events);
        let observer: Arc<dyn ProgressObserver> =
            Arc::new(move |_key: &str, progress: UploadProgress| seen.lock().unwrap().push(progress));

        let upload = ManagedUpload {
            bucket: "bucket-a".to_string(),
            key: "big.bin".to_string(),
            body: ByteStream::from(body),
            part_size,
            queue_size,
            observer,
        };
        (upload, events)
    }

    fn part_rule(part_number: i32) -> aws_smithy_mocks::Rule {
        mock!(Client::upload_part)
            .match_requests(move |req| {
                req.upload_id() == Some("upload-1") && req.part_number() == Some(part_number)
            })
            .then_output(move || {
                UploadPartOutput::builder()
                    .e_tag(format!("etag-{}", part_number))
                    .build()
            })
    }

    #[tokio::test]
    async fn test_part_reader_splits_body() {
        let body = ByteStream::from((0u8..10).collect::<Vec<u8>>());
        let mut reader = PartReader::new(body, 4);

        assert_eq!(reader.next_part().await.unwrap(), Some(vec![0, 1, 2, 3]));
        assert_eq!(reader.next_part().await.unwrap(), Some(vec![4, 5, 6, 7]));
        assert_eq!(reader.next_part().await.unwrap(), Some(vec![8, 9]));
        assert_eq!(reader.next_part().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_part_reader_exact_multiple() {
        let body = ByteStream::from(vec![7u8; 8]);
        let mut reader = PartReader::new(body, 4);

        assert_eq!(reader.next_part().await.unwrap().map(|p| p.len()), Some(4));
        assert_eq!(reader.next_part().await.unwrap().map(|p| p.len()), Some(4));
        assert_eq!(reader.next_part().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_part_reader_empty_body() {
        let mut reader = PartReader::new(ByteStream::from(Vec::new()), 4);

        assert_eq!(reader.next_part().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_part_reader_huge_part_size_small_body() {
        let mut reader = PartReader::new(ByteStream::from(vec![1u8; 16]), 100_000_000_000_000);

        let part = reader.next_part().await.unwrap().unwrap();
        assert_eq!(part.len(), 16);
        assert!(part.capacity() <= READ_CAPACITY);
        assert_eq!(reader.next_part().await.unwrap(), None);
    }

    #[test]
    fn test_exact_len() {
        assert_eq!(exact_len(&ByteStream::from(vec![0u8; 42])), Some(42));
        assert_eq!(exact_len(&ByteStream::from(Vec::new())), Some(0));
    }

    #[tokio::test]
    async fn test_upload_parts_bounds_parts_in_flight() {
        let mut reader = PartReader::new(ByteStream::from(vec![0u8; 20]), 4);
        let first = reader.next_part().await.unwrap().unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let parts = upload_parts(first, reader, 2, |part_number, _bytes| {
            let (in_flight, peak) = (Arc::clone(&in_flight), Arc::clone(&peak));
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                for _ in 0..3 {
                    tokio::task::yield_now().await;
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, TransportError>(CompletedPart::builder().part_number(part_number).build())
            }
        })
        .await
        .unwrap();

        let mut numbers: Vec<_> = parts.iter().filter_map(|p| p.part_number()).collect();
        numbers.sort();
        assert_eq!(numbers, [1, 2, 3, 4, 5]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_upload_parts_stops_at_first_error() {
        let mut reader = PartReader::new(ByteStream::from(vec![0u8; 12]), 4);
        let first = reader.next_part().await.unwrap().unwrap();

        let err = upload_parts(first, reader, 1, |part_number, _bytes| async move {
            if part_number == 2 {
                Err(TransportError::service(Some("SlowDown"), "Please reduce your request rate"))
            } else {
                Ok(CompletedPart::builder().part_number(part_number).build())
            }
        })
        .await
        .unwrap_err();

        assert!(err.is_fault("SlowDown"));
    }

    #[tokio::test]
    async fn test_small_body_uses_single_put() {
        let put = mock!(Client::put_object)
            .match_requests(|req| req.bucket() == Some("bucket-a") && req.key() == Some("big.bin"))
            .then_output(|| PutObjectOutput::builder().build());
        let create = mock!(Client::create_multipart_upload)
            .then_output(|| CreateMultipartUploadOutput::builder().upload_id("upload-1").build());
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, &[&put, &create]);

        let (upload, events) = managed(vec![1u8; 3], 4, 2);
        upload_multipart(&client, upload).await.unwrap();

        assert_eq!(put.num_calls(), 1);
        assert_eq!(create.num_calls(), 0);
        assert_eq!(
            *events.lock().unwrap(),
            vec![UploadProgress { loaded: 3, total: Some(3) }]
        );
    }

    #[tokio::test]
    async fn test_multipart_completes_with_sorted_parts() {
        let create = mock!(Client::create_multipart_upload)
            .match_requests(|req| req.bucket() == Some("bucket-a") && req.key() == Some("big.bin"))
            .then_output(|| CreateMultipartUploadOutput::builder().upload_id("upload-1").build());
        let parts = [part_rule(1), part_rule(2), part_rule(3)];
        let complete = mock!(Client::complete_multipart_upload)
            .match_requests(|req| {
                let parts: Vec<_> = req
                    .multipart_upload()
                    .map(|upload| {
                        upload
                            .parts()
                            .iter()
                            .map(|p| (p.part_number(), p.e_tag().map(str::to_string)))
                            .collect()
                    })
                    .unwrap_or_default();
                req.upload_id() == Some("upload-1")
                    && parts
                        == [
                            (Some(1), Some("etag-1".to_string())),
                            (Some(2), Some("etag-2".to_string())),
                            (Some(3), Some("etag-3".to_string())),
                        ]
            })
            .then_output(|| CompleteMultipartUploadOutput::builder().build());
        let abort = mock!(Client::abort_multipart_upload)
            .then_output(|| AbortMultipartUploadOutput::builder().build());
        let client = mock_client!(
            aws_sdk_s3,
            RuleMode::MatchAny,
            &[&create, &parts[0], &parts[1], &parts[2], &complete, &abort]
        );

        let (upload, events) = managed((0u8..10).collect(), 4, 3);
        upload_multipart(&client, upload).await.unwrap();

        assert_eq!(create.num_calls(), 1);
        assert!(parts.iter().all(|rule| rule.num_calls() == 1));
        assert_eq!(complete.num_calls(), 1);
        assert_eq!(abort.num_calls(), 0);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events.iter().map(|e| e.loaded).max(), Some(10));
        assert!(events.iter().all(|e| e.total == Some(10)));
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let create = mock!(Client::create_multipart_upload)
            .then_output(|| CreateMultipartUploadOutput::builder().upload_id("upload-1").build());
        let first = part_rule(1);
        let failing = mock!(Client::upload_part)
            .match_requests(|req| req.part_number() == Some(2))
            .then_error(|| {
                UploadPartError::generic(
                    ErrorMetadata::builder()
                        .code("AccessDenied")
                        .message("Access Denied")
                        .build(),
                )
            });
        let third = part_rule(3);
        let complete = mock!(Client::complete_multipart_upload)
            .then_output(|| CompleteMultipartUploadOutput::builder().build());
        let abort = mock!(Client::abort_multipart_upload)
            .match_requests(|req| {
                req.bucket() == Some("bucket-a")
                    && req.key() == Some("big.bin")
                    && req.upload_id() == Some("upload-1")
            })
            .then_output(|| AbortMultipartUploadOutput::builder().build());
        let client = mock_client!(
            aws_sdk_s3,
            RuleMode::MatchAny,
            &[&create, &first, &failing, &third, &complete, &abort]
        );

        let (upload, _events) = managed((0u8..10).collect(), 4, 1);
        let err = upload_multipart(&client, upload).await.unwrap_err();

        assert!(err.is_fault("AccessDenied"));
        assert_eq!(err.to_string(), "Access Denied");
        assert_eq!(failing.num_calls(), 1);
        assert_eq!(third.num_calls(), 0);
        assert_eq!(complete.num_calls(), 0);
        assert_eq!(abort.num_calls(), 1);
    }
}
