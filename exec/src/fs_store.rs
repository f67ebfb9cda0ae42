use std::path::Path;
use std::path::PathBuf;

use livepatch_core::DocumentStore;
use livepatch_core::error::DocumentError;
use tracing::debug;

/// [`DocumentStore`] over files under a root directory. Paths are relative
/// to the root; only files that already exist can be written.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        // Stay inside the root.
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl DocumentStore for FsDocumentStore {
    fn content(&self, path: &str) -> Option<String> {
        let full = self.resolve(path)?;
        match std::fs::read_to_string(&full) {
            Ok(content) => Some(content),
            Err(err) => {
                debug!(path = %full.display(), %err, "document unreadable");
                None
            }
        }
    }

    fn write(&mut self, path: &str, content: String) -> Result<(), DocumentError> {
        let Some(full) = self.resolve(path).filter(|full| full.is_file()) else {
            return Err(DocumentError::TargetNotFound(path.to_string()));
        };
        std::fs::write(&full, content).map_err(|err| DocumentError::WriteFailed {
            path: path.to_string(),
            message: err.to_string(),
        })
    }
}
