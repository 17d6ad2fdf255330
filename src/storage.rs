//! Where finished textures go.

use std::path::{Path, PathBuf};

use crate::util::{Error, Result};

/// Host persistence: write finished files and tell the host to re-scan.
pub trait Storage {
    fn write(&mut self, path: &Path, bytes: &[u8]) -> Result<()>;

    /// Called once after the last write of a bake.
    fn refresh(&mut self) {}
}

/// Plain filesystem storage, paths relative to `root`.
#[derive(Clone, Debug, Default)]
pub struct FsStorage {
    root: PathBuf,
    written: Vec<PathBuf>,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute paths written since the last refresh.
    pub fn pending(&self) -> &[PathBuf] {
        &self.written
    }
}

impl Storage for FsStorage {
    fn write(&mut self, path: &Path, bytes: &[u8]) -> Result<()> {
        let full = self.root.join(path);
        let io = |source| Error::Write {
            path: full.clone(),
            source,
        };
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(&full, bytes).map_err(io)?;
        tracing::debug!("wrote {} ({} bytes)", full.display(), bytes.len());
        self.written.push(full);
        Ok(())
    }

    fn refresh(&mut self) {
        if !self.written.is_empty() {
            tracing::info!("{} file(s) written under {}", self.written.len(), self.root.display());
        }
        self.written.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FsStorage::new(dir.path());
        storage.write(Path::new("a/b/out.png"), b"png").unwrap();
        assert_eq!(std::fs::read(dir.path().join("a/b/out.png")).unwrap(), b"png");
        assert_eq!(storage.pending().len(), 1);
        storage.refresh();
        assert!(storage.pending().is_empty());
    }

    #[test]
    fn test_write_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        // A file where a directory is needed
        std::fs::write(dir.path().join("blocker"), b"").unwrap();
        let mut storage = FsStorage::new(dir.path());
        let err = storage.write(Path::new("blocker/out.png"), b"png").unwrap_err();
        match err {
            Error::Write { path, .. } => assert!(path.ends_with("blocker/out.png")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
