use crate::retry::{RetryConfig, retry_with_backoff};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use snapstream_core::config::{MIN_PART_SIZE, StorageConfig};
use snapstream_core::{BackendType, ByteReader, Error, ObjectInfo, ObjectStore, Result};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// S3 allows at most this many parts per multipart upload.
const MAX_PARTS: i32 = 10_000;

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub part_size: usize,
}

impl From<&StorageConfig> for S3Settings {
    fn from(config: &StorageConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            endpoint: config.endpoint.clone(),
            region: config.region.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            path_style: config.path_style,
            part_size: config.part_size,
        }
    }
}

/// AWS S3 or any S3-compatible service (MinIO, DigitalOcean Spaces, ...).
pub struct S3Store {
    client: Client,
    bucket: String,
    part_size: usize,
    retry: RetryConfig,
}

impl S3Store {
    pub async fn new(settings: S3Settings) -> Result<Self> {
        if settings.part_size < MIN_PART_SIZE {
            return Err(Error::Config(format!(
                "S3 part size must be at least {} bytes",
                MIN_PART_SIZE
            )));
        }

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;
        let mut builder = S3ConfigBuilder::from(&shared).force_path_style(settings.path_style);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) =
            (&settings.access_key, &settings.secret_key)
        {
            builder = builder.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "snapstream-config",
            ));
        }

        info!(
            bucket = %settings.bucket,
            endpoint = settings.endpoint.as_deref().unwrap_or("aws"),
            path_style = settings.path_style,
            "Configured S3 store"
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket,
            part_size: settings.part_size,
            retry: RetryConfig::quick(),
        })
    }

    /// Fails with `Error::Config` when the bucket is missing or the
    /// credentials are refused, and with `Error::BackendUnavailable` when the
    /// endpoint cannot be reached right now.
    pub async fn check_bucket(&self) -> Result<()> {
        let result = self.client.head_bucket().bucket(&self.bucket).send().await;
        match result.map_err(|e| s3_error("access bucket", &self.bucket, e)) {
            Ok(_) => Ok(()),
            Err(Error::Backend(message)) => Err(Error::Config(message)),
            Err(e) => Err(e),
        }
    }

    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        let checksum = content_md5(&data);
        retry_with_backoff(&self.retry, "put_object", || {
            let request = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_md5(checksum.clone())
                .body(ByteStream::from(data.clone()));
            async move { request.send().await.map_err(|e| s3_error("write", key, e)) }
        })
        .await?;
        Ok(())
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        body: &mut ByteReader,
    ) -> Result<u64> {
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut part_number = 1;
        let mut next = first;

        while !next.is_empty() {
            if part_number > MAX_PARTS {
                return Err(Error::Backend(format!(
                    "{} needs more than {} parts; raise storage.part_size",
                    key, MAX_PARTS
                )));
            }

            let len = next.len() as u64;
            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_md5(content_md5(&next))
                .body(ByteStream::from(next))
                .send()
                .await
                .map_err(|e| s3_error("upload part of", key, e))?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(response.e_tag().map(str::to_string))
                    .build(),
            );
            total += len;
            debug!(key, part_number, bytes = len, "Uploaded part");

            part_number += 1;
            next = read_part(body, self.part_size).await?;
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| s3_error("complete upload of", key, e))?;

        Ok(total)
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
        match result {
            Ok(_) => info!(key, upload_id, "Aborted multipart upload"),
            Err(e) => warn!(
                key,
                upload_id,
                error = %DisplayErrorContext(&e),
                "Failed to abort multipart upload; bucket lifecycle rules must clean it up"
            ),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.put_object(key, data).await
    }

    async fn put_stream(&self, key: &str, mut body: ByteReader) -> Result<u64> {
        let first = read_part(&mut body, self.part_size).await?;
        if first.len() < self.part_size {
            let len = first.len() as u64;
            self.put_object(key, first).await?;
            debug!(key, bytes = len, "Stored object in a single request");
            return Ok(len);
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error("start upload of", key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::Backend(format!("No upload id returned for {}", key)))?
            .to_string();

        match self.upload_parts(key, &upload_id, first, &mut body).await {
            Ok(total) => {
                debug!(key, bytes = total, "Completed multipart upload");
                Ok(total)
            }
            Err(e) => {
                self.abort(key, &upload_id).await;
                Err(e)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let response = retry_with_backoff(&self.retry, "get_object", || {
            let request = self.client.get_object().bucket(&self.bucket).key(key);
            async move { request.send().await.map_err(|e| s3_error("read", key, e)) }
        })
        .await?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::Backend(format!("Failed to read body of {}: {}", key, e)))?;
        Ok(data.into_bytes())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let page = retry_with_backoff(&self.retry, "list_objects", || {
                let request = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix)
                    .set_continuation_token(continuation_token.clone());
                async move { request.send().await.map_err(|e| s3_error("list", prefix, e)) }
            })
            .await?;

            for object in page.contents() {
                if let Some(key) = object.key() {
                    results.push(ObjectInfo {
                        key: key.to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                        modified: object.last_modified().and_then(|t| {
                            chrono::DateTime::from_timestamp(t.secs(), t.subsec_nanos())
                        }),
                    });
                }
            }

            if page.is_truncated().unwrap_or(false) {
                continuation_token = page.next_continuation_token().map(str::to_string);
                if continuation_token.is_none() {
                    return Err(Error::Backend(format!(
                        "Truncated listing of {} without a continuation token",
                        prefix
                    )));
                }
            } else {
                break;
            }
        }

        Ok(results)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        retry_with_backoff(&self.retry, "delete_object", || {
            let request = self.client.delete_object().bucket(&self.bucket).key(key);
            async move { request.send().await.map_err(|e| s3_error("delete", key, e)) }
        })
        .await?;
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::S3
    }

    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

/// Reads until `part_size` bytes are buffered or the stream ends.
async fn read_part(body: &mut ByteReader, part_size: usize) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(part_size);
    body.take(part_size as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| Error::Backend(format!("Upload source failed: {}", e)))?;
    Ok(Bytes::from(buf))
}

fn content_md5(data: &[u8]) -> String {
    BASE64.encode(md5::compute(data).as_ref())
}

fn s3_error<E>(action: &str, key: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_)
        | SdkError::DispatchFailure(_)
        | SdkError::ResponseError(_) => true,
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            status == 429 || status >= 500
        }
        _ => false,
    };
    let message = format!("Failed to {} {}: {}", action, key, DisplayErrorContext(&err));
    if transient {
        Error::BackendUnavailable(message)
    } else {
        Error::Backend(message)
    }
}
