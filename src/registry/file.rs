//! File registry: a route-command file on disk.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;

use crate::config::FileRegistryConfig;
use crate::registry::Backend;

/// Serves the services snapshot from a file. With a poll interval the
/// file is re-read whenever its modification time changes; without one
/// it is read once at startup. There is no manual stream.
pub struct FileBackend {
    cfg: FileRegistryConfig,
}

impl FileBackend {
    pub fn new(cfg: FileRegistryConfig) -> Self {
        Self { cfg }
    }
}

impl Backend for FileBackend {
    fn watch_services(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(1);
        let path = PathBuf::from(&self.cfg.path);
        let poll = Duration::from_secs(self.cfg.poll_interval_secs);

        tokio::spawn(async move {
            let mut last_modified: Option<SystemTime> = None;
            let mut sent_once = false;
            loop {
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => {
                        let modified = tokio::fs::metadata(&path)
                            .await
                            .ok()
                            .and_then(|m| m.modified().ok());
                        if !sent_once || modified != last_modified {
                            last_modified = modified;
                            sent_once = true;
                            if tx.send(content).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Cannot read route file");
                    }
                }
                if poll.is_zero() {
                    // Single shot; keep the channel open so the rebuild
                    // loop does not observe a close.
                    tx.closed().await;
                    return;
                }
                tokio::time::sleep(poll).await;
            }
        });

        rx
    }

    fn watch_manual(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move { tx.closed().await });
        rx
    }
}
