use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shared_types::ReplicaId;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::adapters::NodeInfoFile;
use crate::domain::{diff_snapshots, DirectoryError, DirectoryEvent, DirectoryResult, NodeInfo};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const EVENT_BUFFER: usize = 64;

/// Polls a directory of `*.toml` node-info files.
#[derive(Clone, Debug)]
pub struct DirectoryWatcher {
    dir: PathBuf,
    interval: Duration,
}

impl DirectoryWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start a fresh watch.
    ///
    /// Every call starts from an empty view, so the first poll reports each
    /// present replica as `Discovered`. Polling stops once the returned
    /// stream is dropped. Must be called from within a tokio runtime.
    pub fn watch(&self) -> ReceiverStream<DirectoryEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let dir = self.dir.clone();
        let interval = self.interval;

        tokio::spawn(async move {
            info!("[nc-05] watching {} every {:?}", dir.display(), interval);
            let mut files: BTreeMap<PathBuf, NodeInfo> = BTreeMap::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tx.closed() => break,
                }

                let scan_dir = dir.clone();
                let previous = files.clone();
                let scanned =
                    tokio::task::spawn_blocking(move || scan(&scan_dir, &previous)).await;
                let current = match scanned {
                    Ok(Ok(current)) => current,
                    Ok(Err(e)) => {
                        warn!("[nc-05] {}", e);
                        continue;
                    }
                    Err(e) => {
                        warn!("[nc-05] directory scan task failed: {}", e);
                        continue;
                    }
                };

                for event in diff_snapshots(&by_replica(&files), &by_replica(&current)) {
                    debug!("[nc-05] {:?}", event);
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                files = current;
            }
            debug!("[nc-05] watch of {} stopped", dir.display());
        });

        ReceiverStream::new(rx)
    }
}

/// Read every node-info file in `dir`.
///
/// A file that cannot be read or parsed keeps the entry it had in
/// `previous`, so a half-written file does not look like a departure.
fn scan(
    dir: &Path,
    previous: &BTreeMap<PathBuf, NodeInfo>,
) -> DirectoryResult<BTreeMap<PathBuf, NodeInfo>> {
    let entries = fs::read_dir(dir).map_err(|e| DirectoryError::Io {
        path: dir.display().to_string(),
        error: e.to_string(),
    })?;

    let mut files = BTreeMap::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") || !path.is_file() {
            continue;
        }
        match NodeInfoFile::load(&path) {
            Ok(info) => {
                files.insert(path, info);
            }
            Err(e) => {
                warn!("[nc-05] skipping {}: {}", path.display(), e);
                if let Some(info) = previous.get(&path) {
                    files.insert(path, info.clone());
                }
            }
        }
    }
    Ok(files)
}

/// Index by replica id; on duplicate ids the first file in path order wins.
fn by_replica(files: &BTreeMap<PathBuf, NodeInfo>) -> BTreeMap<ReplicaId, NodeInfo> {
    let mut nodes = BTreeMap::new();
    for (path, info) in files {
        if nodes.contains_key(&info.id) {
            warn!(
                "[nc-05] {} repeats replica {}, ignored",
                path.display(),
                info.id
            );
            continue;
        }
        nodes.insert(info.id, info.clone());
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::Ed25519KeyPair;
    use shared_types::PartyId;
    use tokio_stream::StreamExt;

    const FAST: Duration = Duration::from_millis(20);

    fn node(id: u16, address: &str) -> NodeInfo {
        NodeInfo {
            id: ReplicaId(id),
            address: address.to_string(),
            identity: PartyId::of(&Ed25519KeyPair::from_seed([id as u8 + 1; 32])),
        }
    }

    async fn next(stream: &mut ReceiverStream<DirectoryEvent>) -> DirectoryEvent {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_watch_reports_discover_update_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("n0.toml");
        NodeInfoFile::store(&path, &node(0, "127.0.0.1:7000")).unwrap();

        let mut events = DirectoryWatcher::new(dir.path()).with_interval(FAST).watch();
        assert_eq!(
            next(&mut events).await,
            DirectoryEvent::Discovered(node(0, "127.0.0.1:7000"))
        );

        NodeInfoFile::store(&path, &node(0, "127.0.0.1:7100")).unwrap();
        assert_eq!(
            next(&mut events).await,
            DirectoryEvent::Updated(node(0, "127.0.0.1:7100"))
        );

        fs::remove_file(&path).unwrap();
        assert_eq!(next(&mut events).await, DirectoryEvent::Removed(ReplicaId(0)));
    }

    #[tokio::test]
    async fn test_each_watch_starts_from_empty_view() {
        let dir = tempfile::tempdir().unwrap();
        NodeInfoFile::store(dir.path().join("n1.toml"), &node(1, "h:1")).unwrap();
        let watcher = DirectoryWatcher::new(dir.path()).with_interval(FAST);

        let mut first = watcher.watch();
        assert!(matches!(next(&mut first).await, DirectoryEvent::Discovered(_)));
        drop(first);

        let mut second = watcher.watch();
        assert_eq!(
            next(&mut second).await,
            DirectoryEvent::Discovered(node(1, "h:1"))
        );
    }

    #[test]
    fn test_scan_ignores_other_files_and_keeps_broken_entries() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("n0.toml");
        let broken = dir.path().join("n1.toml");
        NodeInfoFile::store(&good, &node(0, "h:0")).unwrap();
        fs::write(&broken, "id = ").unwrap();
        fs::write(dir.path().join("notes.txt"), "id = 5").unwrap();

        let mut previous = BTreeMap::new();
        previous.insert(broken.clone(), node(1, "h:1"));

        let files = scan(dir.path(), &previous).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[&broken], node(1, "h:1"));
    }

    #[test]
    fn test_duplicate_replica_first_path_wins() {
        let mut files = BTreeMap::new();
        files.insert(PathBuf::from("a.toml"), node(3, "first:1"));
        files.insert(PathBuf::from("b.toml"), node(3, "second:1"));
        assert_eq!(by_replica(&files)[&ReplicaId(3)].address, "first:1");
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan(&dir.path().join("absent"), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, DirectoryError::Io { .. }));
    }
}
