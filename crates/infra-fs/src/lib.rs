// Conveyor Infrastructure - Filesystem Adapter
// Implements: MessageQueue (durable FIFO queues), BlobStore (code modules)

mod blob_store;
mod index;
mod queue_store;

pub use blob_store::FileBlobStore;
pub use index::{INDEX_FILE, INDEX_TMP_FILE};
pub use queue_store::FileQueueStore;
