use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, stream};

use crate::infrastructure::storage::{
    ByteStream, ObjectBody, ObjectStore, StorageError, StorageResult,
};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: String,
}

/// Object store kept in a sorted map. `set_unavailable` makes every trait
/// call fail as if the backend were down; the inspection helpers keep working.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    unavailable: AtomicBool,
    put_budget: Mutex<Option<usize>>,
}

impl MemoryObjectStore {
    pub fn insert(&self, key: &str, body: Bytes) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).map(|o| o.body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.content_type.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
        if !unavailable {
            *self.put_budget.lock().unwrap() = None;
        }
    }

    /// Lets `n` more `put_file` calls through, then the whole store goes down
    /// until `set_unavailable(false)`.
    pub fn fail_after_puts(&self, n: usize) {
        *self.put_budget.lock().unwrap() = Some(n);
    }

    fn take_put(&self) -> StorageResult<()> {
        let mut budget = self.put_budget.lock().unwrap();
        match *budget {
            Some(0) => {
                self.unavailable.store(true, Ordering::SeqCst);
                Err(StorageError::Unavailable("connection reset".to_string()))
            }
            Some(n) => {
                *budget = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn store(&self, key: &str, body: Bytes, content_type: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
    }

    fn lookup(&self, key: &str) -> StorageResult<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

/// Resolves a single `bytes=start-end` range against `len`.
fn resolve_range(range: &str, len: usize) -> Option<(usize, usize)> {
    let bounds = range.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;

    let (start, end) = match (start.trim(), end.trim()) {
        ("", suffix) => {
            let n: usize = suffix.parse().ok()?;
            (len.checked_sub(n.min(len))?, len.checked_sub(1)?)
        }
        (start, "") => (start.parse().ok()?, len.checked_sub(1)?),
        (start, end) => (start.parse().ok()?, end.parse::<usize>().ok()?.min(len.checked_sub(1)?)),
    };

    (start <= end && end < len).then_some((start, end))
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()> {
        self.check()?;
        self.take_put()?;
        let body = tokio::fs::read(path).await?;
        self.store(key, Bytes::from(body), content_type);
        Ok(())
    }

    async fn put_stream(&self, key: &str, mut body: ByteStream, content_type: &str) -> StorageResult<u64> {
        self.check()?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StorageError::StreamInterrupted(e.to_string()))?;
            buffer.extend_from_slice(&chunk);
        }
        if buffer.is_empty() {
            return Err(StorageError::EmptyObject);
        }

        let written = buffer.len() as u64;
        self.store(key, buffer.freeze(), content_type);
        Ok(written)
    }

    async fn download_to_file(&self, key: &str, path: &Path) -> StorageResult<u64> {
        self.check()?;
        let object = self.lookup(key)?;
        tokio::fs::write(path, &object.body).await?;
        Ok(object.body.len() as u64)
    }

    async fn get_object(&self, key: &str, range: Option<String>) -> StorageResult<ObjectBody> {
        self.check()?;
        let object = self.lookup(key)?;
        let len = object.body.len();

        let (body, content_range) = match range.as_deref().and_then(|r| resolve_range(r, len)) {
            Some((start, end)) => (
                object.body.slice(start..=end),
                Some(format!("bytes {}-{}/{}", start, end, len)),
            ),
            None => (object.body.clone(), None),
        };

        Ok(ObjectBody {
            content_length: Some(body.len() as i64),
            content_range,
            e_tag: Some(format!("\"{:x}\"", len)),
            stream: Box::pin(stream::iter(vec![Ok::<_, std::io::Error>(body)])),
        })
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.check()?;
        self.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        self.check()?;
        let mut objects = self.objects.lock().unwrap();
        let before = objects.len();
        objects.retain(|key, _| !key.starts_with(prefix));
        Ok(before - objects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_resolve_like_http() {
        assert_eq!(resolve_range("bytes=0-3", 10), Some((0, 3)));
        assert_eq!(resolve_range("bytes=4-", 10), Some((4, 9)));
        assert_eq!(resolve_range("bytes=-2", 10), Some((8, 9)));
        assert_eq!(resolve_range("bytes=5-100", 10), Some((5, 9)));
        assert_eq!(resolve_range("bytes=12-", 10), None);
        assert_eq!(resolve_range("items=0-1", 10), None);
    }
}
