// Blob Store Port (Interface)
// Code module bytes and metadata live in an external blob service

use crate::domain::{BlobDescriptor, BlobInfo};
use crate::error::Result;
use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Readable stream of blob bytes
pub type BlobStream = Pin<Box<dyn AsyncRead + Send>>;

/// Blob store collaborator
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open a blob for reading (None if it does not exist)
    async fn open(&self, id: &str) -> Result<Option<BlobStream>>;

    /// Get blob information (None if it does not exist)
    async fn get_info(&self, id: &str) -> Result<Option<BlobInfo>>;

    /// List every stored blob (used at startup to rebuild bindings)
    async fn list(&self) -> Result<Vec<BlobDescriptor>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// In-memory blob store
    #[derive(Default)]
    pub struct InMemoryBlobStore {
        blobs: Mutex<BTreeMap<String, (Vec<u8>, BlobInfo)>>,
    }

    impl InMemoryBlobStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, id: impl Into<String>, bytes: Vec<u8>, info: BlobInfo) {
            self.blobs.lock().unwrap().insert(id.into(), (bytes, info));
        }
    }

    #[async_trait]
    impl BlobStore for InMemoryBlobStore {
        async fn open(&self, id: &str) -> Result<Option<BlobStream>> {
            let bytes = self.blobs.lock().unwrap().get(id).map(|(b, _)| b.clone());
            Ok(bytes.map(|b| Box::pin(Cursor::new(b)) as BlobStream))
        }

        async fn get_info(&self, id: &str) -> Result<Option<BlobInfo>> {
            Ok(self.blobs.lock().unwrap().get(id).map(|(_, i)| i.clone()))
        }

        async fn list(&self) -> Result<Vec<BlobDescriptor>> {
            Ok(self
                .blobs
                .lock()
                .unwrap()
                .iter()
                .map(|(id, (_, info))| BlobDescriptor {
                    id: id.clone(),
                    info: info.clone(),
                })
                .collect())
        }
    }
}
