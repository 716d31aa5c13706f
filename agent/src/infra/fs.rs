//! Filesystem implementation of the `QueueStore` port.
//!
//! ```text
//! <home>/data/process/   queued job bodies
//! <home>/data/           started/submitted markers, in-flight event list
//! <home>/data/submit/    outbound results and events
//! ```
//!
//! Writes go to a temp file in the target directory, are synced, then renamed
//! over the destination, so a crash never leaves a partial file under a real
//! name.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

use crate::application::ports::{Key, QueueStore, Slot};
use crate::domain::job::salvage_job_id;

/// Directory-backed queue storage.
#[derive(Debug, Clone)]
pub struct FsStore {
    data: PathBuf,
}

impl FsStore {
    /// Store rooted at `<home>/data`. Directories are created on demand.
    #[must_use]
    pub fn new(home: &Path) -> Self {
        Self {
            data: home.join("data"),
        }
    }

    /// Create the queue directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure_layout(&self) -> Result<()> {
        for slot in [Slot::Process, Slot::Data, Slot::Submit] {
            let dir = self.dir(slot);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating queue directory {}", dir.display()))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn dir(&self, slot: Slot) -> PathBuf {
        match slot {
            Slot::Process => self.data.join("process"),
            Slot::Data => self.data.clone(),
            Slot::Submit => self.data.join("submit"),
        }
    }

    #[must_use]
    pub fn path(&self, key: &Key) -> PathBuf {
        self.dir(key.slot).join(&key.name)
    }
}

impl QueueStore for FsStore {
    fn exists(&self, key: &Key) -> bool {
        self.path(key).is_file()
    }

    fn write(&self, key: &Key, bytes: &[u8]) -> Result<()> {
        let dir = self.dir(key.slot);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating queue directory {}", dir.display()))?;
        let path = self.path(key);
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        tmp.write_all(bytes)
            .with_context(|| format!("writing {}", path.display()))?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("syncing {}", path.display()))?;
        tmp.persist(&path)
            .with_context(|| format!("finalizing {}", path.display()))?;
        Ok(())
    }

    fn read(&self, key: &Key) -> Result<Vec<u8>> {
        let path = self.path(key);
        std::fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }

    fn remove(&self, key: &Key) -> Result<()> {
        let path = self.path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }

    fn list(&self, slot: Slot, ext: &str) -> Result<Vec<String>> {
        let dir = self.dir(slot);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
        };
        let mut found: Vec<(SystemTime, Option<i64>, String)> = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((mtime, salvage_job_id(name), name.to_owned()));
        }
        // Equal timestamps fall back to job id, then name.
        found.sort();
        Ok(found.into_iter().map(|(_, _, name)| name).collect())
    }
}
