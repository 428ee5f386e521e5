// Queue index persistence and load-time recovery

use conveyor_core::domain::message::is_message_file;
use conveyor_core::domain::MessageRef;
use conveyor_core::error::Result;
use std::collections::{HashSet, VecDeque};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

/// Ordered array of message file names
pub const INDEX_FILE: &str = "state.json";

/// Scratch file renamed over the index on every persist
pub const INDEX_TMP_FILE: &str = "state.json.tmp";

/// In-memory view of a queue directory after recovery
#[derive(Debug, Default)]
pub struct LoadedQueue {
    pub refs: VecDeque<MessageRef>,
    pub total_bytes: u64,
}

/// Atomically replace the index with `refs`
pub async fn persist_index(dir: &Path, refs: &VecDeque<MessageRef>) -> Result<()> {
    let names: Vec<&str> = refs.iter().map(|r| r.file_name.as_str()).collect();
    let json = serde_json::to_vec(&names)?;

    let tmp = dir.join(INDEX_TMP_FILE);
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, dir.join(INDEX_FILE)).await?;
    Ok(())
}

/// Read a queue directory back into memory
///
/// Recovery steps:
/// 1. Read the index; when it is missing or unreadable, rebuild it from
///    the message files sorted by name
/// 2. Drop entries whose file no longer exists, taking sizes from disk
/// 3. With `cleanup_orphans`, delete unreferenced message files and a
///    stale index scratch file
pub async fn load_queue(dir: &Path, cleanup_orphans: bool) -> Result<LoadedQueue> {
    tokio::fs::create_dir_all(dir).await?;

    let (names, mut dirty) = match read_index(dir).await? {
        Some(names) => (names, false),
        None => {
            let names = list_message_files(dir).await?;
            if !names.is_empty() {
                warn!(
                    dir = %dir.display(),
                    recovered = %names.len(),
                    "Queue index missing or unreadable, rebuilt from message files"
                );
            }
            (names, true)
        }
    };

    let mut loaded = LoadedQueue::default();
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.clone()) {
            dirty = true;
            continue;
        }
        match tokio::fs::metadata(dir.join(&name)).await {
            Ok(meta) => {
                loaded.total_bytes += meta.len();
                loaded.refs.push_back(MessageRef::new(name, meta.len()));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(dir = %dir.display(), file = %name, "Indexed message file missing, dropping entry");
                seen.remove(&name);
                dirty = true;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if cleanup_orphans {
        sweep_orphans(dir, &seen).await?;
    }

    if dirty {
        persist_index(dir, &loaded.refs).await?;
    }

    Ok(loaded)
}

/// `None` when the index is absent or cannot be parsed
async fn read_index(dir: &Path) -> Result<Option<Vec<String>>> {
    let bytes = match tokio::fs::read(dir.join(INDEX_FILE)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<Vec<String>>(&bytes) {
        Ok(names) => Ok(Some(names)),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Queue index is corrupt");
            Ok(None)
        }
    }
}

async fn list_message_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if is_message_file(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

async fn sweep_orphans(dir: &Path, referenced: &HashSet<String>) -> Result<()> {
    let mut removed = 0usize;
    for name in list_message_files(dir).await? {
        if referenced.contains(&name) {
            continue;
        }
        match tokio::fs::remove_file(dir.join(&name)).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(dir = %dir.display(), file = %name, error = %e, "Failed to delete orphan"),
        }
    }

    match tokio::fs::remove_file(dir.join(INDEX_TMP_FILE)).await {
        Ok(()) => removed += 1,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to delete stale index scratch file"),
    }

    if removed > 0 {
        info!(dir = %dir.display(), removed = %removed, "Orphan sweep complete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write(dir: &Path, name: &str, body: &str) {
        tokio::fs::write(dir.join(name), body).await.unwrap();
    }

    async fn index_names(dir: &Path) -> Vec<String> {
        let bytes = tokio::fs::read(dir.join(INDEX_FILE)).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_directory_gets_empty_index() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("q");

        let loaded = load_queue(&dir, true).await.unwrap();
        assert!(loaded.refs.is_empty());
        assert_eq!(index_names(&dir).await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_sizes_recomputed_from_disk() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "0000000000001_a.bin", "\"abc\"").await;
        write(dir, INDEX_FILE, r#"["0000000000001_a.bin"]"#).await;

        let loaded = load_queue(dir, true).await.unwrap();
        assert_eq!(loaded.refs.len(), 1);
        assert_eq!(loaded.total_bytes, 5);
    }

    #[tokio::test]
    async fn test_missing_files_are_dropped() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "0000000000002_b.bin", "1").await;
        write(
            dir,
            INDEX_FILE,
            r#"["0000000000001_a.bin","0000000000002_b.bin"]"#,
        )
        .await;

        let loaded = load_queue(dir, true).await.unwrap();
        assert_eq!(loaded.refs.len(), 1);
        assert_eq!(index_names(dir).await, vec!["0000000000002_b.bin"]);
    }

    #[tokio::test]
    async fn test_orphans_swept_only_when_enabled() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "0000000000001_a.bin", "1").await;
        write(dir, "0000000000009_orphan.bin", "2").await;
        write(dir, INDEX_TMP_FILE, "[]").await;
        write(dir, INDEX_FILE, r#"["0000000000001_a.bin"]"#).await;

        load_queue(dir, false).await.unwrap();
        assert!(dir.join("0000000000009_orphan.bin").exists());
        assert!(dir.join(INDEX_TMP_FILE).exists());

        load_queue(dir, true).await.unwrap();
        assert!(!dir.join("0000000000009_orphan.bin").exists());
        assert!(!dir.join(INDEX_TMP_FILE).exists());
        assert!(dir.join("0000000000001_a.bin").exists());
    }

    #[tokio::test]
    async fn test_corrupt_index_rebuilt_in_name_order() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "0000000000002_b.bin", "2").await;
        write(dir, "0000000000001_a.bin", "1").await;
        write(dir, INDEX_FILE, "{not json").await;

        let loaded = load_queue(dir, true).await.unwrap();
        let names: Vec<_> = loaded.refs.iter().map(|r| r.file_name.clone()).collect();
        assert_eq!(names, vec!["0000000000001_a.bin", "0000000000002_b.bin"]);
        assert_eq!(index_names(dir).await, names);
    }

    #[tokio::test]
    async fn test_persist_leaves_no_scratch_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        let refs: VecDeque<_> = vec![MessageRef::new("0000000000001_a.bin", 1)].into();

        persist_index(dir, &refs).await.unwrap();
        assert!(!dir.join(INDEX_TMP_FILE).exists());
        assert_eq!(index_names(dir).await, vec!["0000000000001_a.bin"]);
    }
}
