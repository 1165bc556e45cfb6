use std::io;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

pub mod s3;
pub mod upload;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("requested range not satisfiable for {0}")]
    RangeNotSatisfiable(String),

    #[error("object body is empty")]
    EmptyObject,

    #[error("upload stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("object storage unavailable: {0}")]
    Unavailable(String),

    #[error("local I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A streamed object read, with the metadata a proxying handler forwards.
pub struct ObjectBody {
    pub stream: ByteStream,
    pub content_length: Option<i64>,
    pub content_range: Option<String>,
    pub e_tag: Option<String>,
}

/// Durable object storage. No business logic lives behind this trait.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads a local file without loading it into memory.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()>;

    /// Streams a body of unknown length into `key`, returning the bytes written.
    async fn put_stream(&self, key: &str, body: ByteStream, content_type: &str) -> StorageResult<u64>;

    /// Streams `key` into a local file, returning the bytes written.
    async fn download_to_file(&self, key: &str, path: &Path) -> StorageResult<u64>;

    /// `range` is an HTTP `Range` header value forwarded verbatim.
    async fn get_object(&self, key: &str, range: Option<String>) -> StorageResult<ObjectBody>;

    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// Deletes every object under `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize>;
}
