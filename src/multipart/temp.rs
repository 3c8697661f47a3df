//! Shared temp-file allocation for spilled body parts.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::log::warning;

/// Thread-safe allocator of uniquely named files under one base directory.
///
/// Shared across connections; cloning is cheap. The base directory is
/// created eagerly so the first spill cannot fail on a missing path.
#[derive(Debug, Clone)]
pub struct TempFileFactory {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    base: PathBuf,
    counter: AtomicU64,
}

impl TempFileFactory {
    pub fn new(base: impl Into<PathBuf>) -> io::Result<Self> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self {
            inner: Arc::new(Inner { base, counter: AtomicU64::new(0) }),
        })
    }

    pub fn base(&self) -> &Path {
        &self.inner.base
    }

    /// Allocate a fresh file. The file is removed when the returned handle
    /// is dropped, unless it was claimed with [`TempFile::into_path`].
    pub fn create(&self) -> io::Result<TempFile> {
        let seq = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        let name = format!("torii-{}-{seq}.tmp", process::id());
        let path = self.inner.base.join(name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(TempFile { path, file: Some(file) })
    }
}

/// One spilled file; deleted on drop unless claimed.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    file: Option<File>,
}

impl TempFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(data),
            None => Err(io::Error::new(io::ErrorKind::Other, "temp file already closed")),
        }
    }

    /// Flush and close the write handle, keeping the file on disk.
    pub fn finish(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    /// Read the whole file back.
    pub fn read(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        File::open(&self.path)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Claim the backing file: the caller becomes responsible for its
    /// lifetime and it will no longer be deleted on drop.
    pub fn into_path(mut self) -> PathBuf {
        self.file = None;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        self.file = None;
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(_err) = fs::remove_file(&self.path) {
            warning!("failed to remove temp file {}: {_err}", self.path.display());
        }
    }
}

// ===== Test =====

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn create_write_drop_removes() {
        let factory = TempFileFactory::new(std::env::temp_dir().join("torii-test-temp")).unwrap();
        let mut file = factory.create().unwrap();
        file.write_all(b"abc").unwrap();
        file.finish().unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn claimed_file_survives() {
        let factory = TempFileFactory::new(std::env::temp_dir().join("torii-test-temp")).unwrap();
        let mut file = factory.create().unwrap();
        file.write_all(b"abc").unwrap();
        file.finish().unwrap();
        let path = file.into_path();
        assert!(path.exists());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn unique_names() {
        let factory = TempFileFactory::new(std::env::temp_dir().join("torii-test-temp")).unwrap();
        let a = factory.create().unwrap();
        let b = factory.create().unwrap();
        assert_ne!(a.path(), b.path());
    }
}
