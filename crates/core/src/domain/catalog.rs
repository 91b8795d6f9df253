//! Sound catalog built from a directory scan
//!
//! A scan builds a complete [`CatalogSnapshot`] off to the side and swaps it in
//! with a single pointer store, so concurrent lookups see either the old or the
//! new catalog, never a half-built one.

use crate::domain::audio::AudioDecoder;
use crate::domain::error::{Result, SoundboardError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// A file that was skipped, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSound {
    pub path: PathBuf,
    pub reason: String,
}

/// Immutable result of one scan
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    directory: Option<PathBuf>,
    sounds: BTreeMap<String, PathBuf>,
    invalid: Vec<InvalidSound>,
}

impl CatalogSnapshot {
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn sounds(&self) -> &BTreeMap<String, PathBuf> {
        &self.sounds
    }

    pub fn invalid(&self) -> &[InvalidSound] {
        &self.invalid
    }
}

/// Counts reported after a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub valid: usize,
    pub invalid: usize,
}

/// Name to file mapping of playable sounds
pub struct SoundCatalog {
    decoder: Arc<dyn AudioDecoder>,
    extensions: Vec<String>,
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl SoundCatalog {
    /// `extensions` is the accepted allowlist, with or without leading dots
    pub fn new<I, S>(decoder: Arc<dyn AudioDecoder>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();

        Self {
            decoder,
            extensions,
            current: RwLock::new(Arc::new(CatalogSnapshot::default())),
        }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }

    /// Recursively scan `directory` and replace the whole catalog
    ///
    /// Files are visited in file-name order; when two files share a stem the
    /// first one visited wins and the other is listed as invalid. A missing
    /// directory fails and leaves the current catalog in place.
    #[instrument(skip(self), fields(dir = %directory.display()))]
    pub fn scan(&self, directory: &Path) -> Result<ScanSummary> {
        if !directory.is_dir() {
            warn!("Sounds directory not found");
            return Err(SoundboardError::SoundsDirNotFound(directory.to_path_buf()));
        }

        let mut sounds: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut invalid = Vec::new();

        let walker = WalkDir::new(directory)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !self.accepts(path) {
                continue;
            }

            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            if let Some(winner) = sounds.get(&name) {
                warn!(path = %path.display(), name = %name, "Duplicate sound name");
                invalid.push(InvalidSound {
                    path: path.to_path_buf(),
                    reason: format!("duplicate sound name, already provided by {}", winner.display()),
                });
                continue;
            }

            match self.decoder.validate(path) {
                Ok(()) => {
                    debug!(name = %name, "Found valid sound");
                    sounds.insert(name, path.to_path_buf());
                }
                Err(reason) => {
                    warn!(path = %path.display(), reason = %reason, "Invalid audio file");
                    invalid.push(InvalidSound {
                        path: path.to_path_buf(),
                        reason,
                    });
                }
            }
        }

        let summary = ScanSummary {
            valid: sounds.len(),
            invalid: invalid.len(),
        };

        let snapshot = Arc::new(CatalogSnapshot {
            directory: Some(directory.to_path_buf()),
            sounds,
            invalid,
        });
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;

        info!(valid = summary.valid, invalid = summary.invalid, "Scan complete");
        Ok(summary)
    }

    /// The catalog as of the last completed scan
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn lookup(&self, name: &str) -> Option<PathBuf> {
        self.snapshot().sounds.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().sounds.contains_key(name)
    }

    /// Sound names in lexicographic order
    pub fn names(&self) -> Vec<String> {
        self.snapshot().sounds.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().sounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalid_files(&self) -> Vec<InvalidSound> {
        self.snapshot().invalid.clone()
    }
}
