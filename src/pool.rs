use anyhow::{Context, Result};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use zip::ZipArchive;

#[derive(Default)]
struct PoolState {
    idle: HashMap<PathBuf, VecDeque<ZipArchive<File>>>,
    opens: HashMap<PathBuf, usize>,
    outstanding: usize,
}

struct PoolInner {
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Keyed pool of opened zip-archive handles, reused across concurrent tasks
/// reading entries from the same archive.
///
/// All map/queue mutation happens under one pool-wide lock; every critical
/// section is O(1). A failed open propagates unmodified and records nothing,
/// so a path is only ever marked known after a successful open.
pub struct ArchivePool {
    inner: Arc<PoolInner>,
}

impl ArchivePool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Check out a handle for `path`: reuse an idle one if present,
    /// otherwise open a new archive. Increments the outstanding count
    /// exactly once per call.
    pub fn checkout(&self, path: &Path) -> Result<PooledArchive> {
        {
            let mut state = self.inner.lock();
            if let Some(archive) = state.idle.get_mut(path).and_then(VecDeque::pop_front) {
                state.outstanding += 1;
                return Ok(PooledArchive {
                    pool: Arc::clone(&self.inner),
                    path: path.to_path_buf(),
                    archive: Some(archive),
                });
            }
        }

        // Open outside the lock; concurrent checkouts for the same path may
        // each open their own handle, which is the intended behavior.
        let file =
            File::open(path).with_context(|| format!("opening archive '{}'", path.display()))?;
        let archive = ZipArchive::new(file)
            .with_context(|| format!("reading archive '{}'", path.display()))?;

        let mut state = self.inner.lock();
        *state.opens.entry(path.to_path_buf()).or_insert(0) += 1;
        state.outstanding += 1;
        Ok(PooledArchive {
            pool: Arc::clone(&self.inner),
            path: path.to_path_buf(),
            archive: Some(archive),
        })
    }

    /// How many times the physical archive at `path` has been opened.
    pub fn open_count(&self, path: &Path) -> usize {
        self.inner.lock().opens.get(path).copied().unwrap_or(0)
    }

    /// Handles currently checked out (issued minus returned).
    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }
}

impl Default for ArchivePool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ArchivePool {
    fn drop(&mut self) {
        // The pool does not own handles held elsewhere; warn instead of
        // failing. Idle handles close when the state map drops.
        let outstanding = self.inner.lock().outstanding;
        if outstanding > 0 {
            eprintln!(
                "Warning: archive pool dropped with {} handle(s) still checked out",
                outstanding
            );
        }
    }
}

/// A checked-out archive handle. Dropping it returns the archive to the
/// pool's idle queue without closing it; the return is idempotent.
pub struct PooledArchive {
    pool: Arc<PoolInner>,
    path: PathBuf,
    archive: Option<ZipArchive<File>>,
}

impl PooledArchive {
    pub fn archive(&mut self) -> &mut ZipArchive<File> {
        // Present from construction until drop; release() is the only taker.
        self.archive.as_mut().expect("archive already released")
    }

    /// Explicit early return; dropping afterwards is a no-op.
    pub fn release(&mut self) {
        if let Some(archive) = self.archive.take() {
            let mut state = self.pool.lock();
            state
                .idle
                .entry(self.path.clone())
                .or_default()
                .push_back(archive);
            state.outstanding -= 1;
        }
    }
}

impl Drop for PooledArchive {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn fixture_zip(dir: &Path) -> PathBuf {
        let path = dir.join("fixture.zip");
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("server.log", FileOptions::default())
            .unwrap();
        writer.write_all(b"one\ntwo\n").unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_sequential_cycles_open_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_zip(dir.path());
        let pool = ArchivePool::new();

        for _ in 0..5 {
            let mut handle = pool.checkout(&path).unwrap();
            assert!(handle.archive().by_name("server.log").is_ok());
        }
        assert_eq!(pool.open_count(&path), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_concurrent_checkouts_open_per_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_zip(dir.path());
        let pool = ArchivePool::new();

        let handles: Vec<_> = (0..4).map(|_| pool.checkout(&path).unwrap()).collect();
        assert_eq!(pool.open_count(&path), 4);
        assert_eq!(pool.outstanding(), 4);
        drop(handles);
        assert_eq!(pool.outstanding(), 0);

        // All four handles are idle now; a fifth cycle reuses one.
        let _handle = pool.checkout(&path).unwrap();
        assert_eq!(pool.open_count(&path), 4);
    }

    #[test]
    fn test_release_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_zip(dir.path());
        let pool = ArchivePool::new();

        let mut handle = pool.checkout(&path).unwrap();
        handle.release();
        handle.release();
        assert_eq!(pool.outstanding(), 0);
        drop(handle);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_failed_open_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.zip");
        let pool = ArchivePool::new();

        assert!(pool.checkout(&missing).is_err());
        assert_eq!(pool.open_count(&missing), 0);
        assert_eq!(pool.outstanding(), 0);
    }
}
