//! Rescan the catalog when the sounds directory changes

use crate::domain::catalog::SoundCatalog;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};
use notify::Watcher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Events arriving this close together trigger a single rescan
pub const DEBOUNCE: Duration = Duration::from_millis(300);

/// File system watcher that keeps a [`SoundCatalog`] in sync with its directory
pub struct SoundsWatcher {
    watcher: Option<notify::RecommendedWatcher>,
    handle: Option<JoinHandle<()>>,
}

impl SoundsWatcher {
    pub fn new(directory: PathBuf, catalog: Arc<SoundCatalog>) -> notify::Result<Self> {
        let (tx, rx) = unbounded::<PathBuf>();

        let filter = catalog.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        notify::EventKind::Create(_)
                            | notify::EventKind::Modify(_)
                            | notify::EventKind::Remove(_)
                    ) {
                        for path in event.paths {
                            if filter.accepts(&path) || path.extension().is_none() {
                                let _ = tx.send(path);
                            }
                        }
                    }
                }
                Err(e) => error!("Sounds watch error: {}", e),
            }
        })?;

        watcher.watch(&directory, notify::RecursiveMode::Recursive)?;
        info!(path = %directory.display(), "Watching sounds directory");

        let handle = thread::Builder::new()
            .name("sounds-watch".to_string())
            .spawn(move || rescan_loop(&directory, &catalog, rx))?;

        Ok(Self {
            watcher: Some(watcher),
            handle: Some(handle),
        })
    }
}

impl Drop for SoundsWatcher {
    fn drop(&mut self) {
        // Dropping the watcher closes the channel and ends the rescan loop
        self.watcher.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn rescan_loop(directory: &Path, catalog: &SoundCatalog, rx: Receiver<PathBuf>) {
    while let Ok(first) = rx.recv() {
        debug!(path = %first.display(), "Sounds directory changed");

        // Coalesce the burst a copy or an editor save produces
        loop {
            match rx.recv_timeout(DEBOUNCE) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        if let Err(e) = catalog.scan(directory) {
            warn!(error = %e, "Rescan after change failed");
        }
    }
}
