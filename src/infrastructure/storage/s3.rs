use std::io;
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::upload::MultipartUploader;
use super::{ByteStream, ObjectBody, ObjectStore, StorageError, StorageResult};

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
}

fn unavailable(context: &str, err: impl std::error::Error) -> StorageError {
    StorageError::Unavailable(format!("{}: {}", context, DisplayErrorContext(err)))
}

impl StorageService {
    pub async fn new(
        endpoint: &str,
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ S3 client ready for bucket '{}' at {}", bucket, endpoint);

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    pub async fn create_multipart_upload(&self, key: &str, content_type: &str) -> StorageResult<String> {
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| unavailable("create multipart upload", e))?;

        result
            .upload_id()
            .map(str::to_owned)
            .ok_or_else(|| StorageError::Unavailable("multipart upload returned no upload id".to_string()))
    }

    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<CompletedPart> {
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(S3ByteStream::from(body))
            .send()
            .await
            .map_err(|e| unavailable("upload part", e))?;

        let e_tag = result
            .e_tag()
            .ok_or_else(|| StorageError::Unavailable(format!("part {} returned no ETag", part_number)))?;

        Ok(CompletedPart::builder()
            .e_tag(e_tag)
            .part_number(part_number)
            .build())
    }

    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()> {
        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(|e| unavailable("complete multipart upload", e))?;

        Ok(())
    }

    pub async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| unavailable("abort multipart upload", e))?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()> {
        let body = S3ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::Io(io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| unavailable("put object", e))?;

        debug!("Uploaded {} -> {}", path.display(), key);
        Ok(())
    }

    async fn put_stream(&self, key: &str, mut body: ByteStream, content_type: &str) -> StorageResult<u64> {
        let mut uploader = MultipartUploader::new(self, key.to_string(), content_type).await?;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    uploader.abort().await?;
                    return Err(StorageError::StreamInterrupted(e.to_string()));
                }
            };

            if let Err(e) = uploader.write_chunk(chunk).await {
                uploader.abort().await?;
                return Err(e);
            }
        }

        uploader.finish().await
    }

    async fn download_to_file(&self, key: &str, path: &Path) -> StorageResult<u64> {
        let resp = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(r) => r,
            Err(err) => {
                let missing = err.as_service_error().is_some_and(|e| e.is_no_such_key())
                    || err.raw_response().is_some_and(|r| r.status().as_u16() == 404);
                return Err(if missing {
                    StorageError::NotFound(key.to_string())
                } else {
                    unavailable("get object", err)
                });
            }
        };

        let mut body = resp.body;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;

        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| unavailable("read object body", e))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    async fn get_object(&self, key: &str, range: Option<String>) -> StorageResult<ObjectBody> {
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range)
            .send()
            .await
        {
            Ok(r) => r,
            Err(err) => {
                let status = err.raw_response().map(|r| r.status().as_u16());
                let missing = err.as_service_error().is_some_and(|e| e.is_no_such_key())
                    || status == Some(404);
                return Err(if missing {
                    StorageError::NotFound(key.to_string())
                } else if status == Some(416) {
                    StorageError::RangeNotSatisfiable(key.to_string())
                } else {
                    unavailable("get object", err)
                });
            }
        };

        let content_length = resp.content_length();
        let content_range = resp.content_range().map(str::to_owned);
        let e_tag = resp.e_tag().map(str::to_owned);

        let reader = resp.body.into_async_read();
        let stream = ReaderStream::new(reader);

        Ok(ObjectBody {
            stream: Box::pin(stream),
            content_length,
            content_range,
            e_tag,
        })
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| unavailable("delete object", e))?;

        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| unavailable("list objects", e))?;

            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_owned)));

            match page.next_continuation_token() {
                Some(next) if page.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }

        for key in &keys {
            self.delete_object(key).await?;
        }

        Ok(keys.len())
    }
}
