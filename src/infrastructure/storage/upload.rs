use aws_sdk_s3::types::CompletedPart;
use bytes::Bytes;
use tracing::{debug, warn};

use super::s3::StorageService;
use super::{StorageError, StorageResult};

// Minimum part size for S3 is 5MB. We use 6MB to be safe.
pub const MIN_PART_SIZE: usize = 6 * 1024 * 1024;

/// Buffers an incoming stream into S3 multipart parts.
pub struct MultipartUploader<'a> {
    storage: &'a StorageService,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    part_number: i32,
    buffer: Vec<u8>,
    written: u64,
}

impl<'a> MultipartUploader<'a> {
    pub async fn new(storage: &'a StorageService, key: String, content_type: &str) -> StorageResult<Self> {
        let upload_id = storage.create_multipart_upload(&key, content_type).await?;
        debug!("Started multipart upload {} for {}", upload_id, key);

        Ok(Self {
            storage,
            key,
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            buffer: Vec::with_capacity(MIN_PART_SIZE),
            written: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&chunk);
        self.written += chunk.len() as u64;

        if self.buffer.len() >= MIN_PART_SIZE {
            self.flush_part().await?;
        }

        Ok(())
    }

    async fn flush_part(&mut self) -> StorageResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let body = Bytes::from(std::mem::replace(&mut self.buffer, Vec::with_capacity(MIN_PART_SIZE)));

        let part = self
            .storage
            .upload_part(&self.key, &self.upload_id, self.part_number, body)
            .await?;

        self.parts.push(part);
        self.part_number += 1;

        Ok(())
    }

    /// Completes the upload. A stream that produced no bytes is aborted and
    /// reported as `EmptyObject`.
    pub async fn finish(mut self) -> StorageResult<u64> {
        if self.written == 0 {
            self.abort().await?;
            return Err(StorageError::EmptyObject);
        }

        // Upload remaining buffer as last part
        self.flush_part().await?;

        let written = self.written;
        self.storage
            .complete_multipart_upload(&self.key, &self.upload_id, self.parts)
            .await?;

        Ok(written)
    }

    pub async fn abort(&self) -> StorageResult<()> {
        warn!("Aborting multipart upload for {}", self.key);
        self.storage
            .abort_multipart_upload(&self.key, &self.upload_id)
            .await
    }
}
