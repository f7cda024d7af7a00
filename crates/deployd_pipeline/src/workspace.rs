//! Attempt-scoped staging for source text.
//!
//! Every attempt stages its fetched or synthesized source into a private
//! tempdir; dropping the workspace removes the directory on every exit
//! path - success, failure, or cancellation.

use std::fs;
use std::path::{Path, PathBuf};

use deployd_protocol::PipelineError;
use tempfile::TempDir;
use tracing::debug;

pub struct SourceWorkspace {
    dir: TempDir,
    entry: PathBuf,
}

impl SourceWorkspace {
    /// Write `source` into a fresh scratch dir as the compilation entry.
    pub fn stage(artifact_id: &str, source: &str) -> Result<Self, PipelineError> {
        let dir = tempfile::Builder::new()
            .prefix("deployd-")
            .tempdir()
            .map_err(|e| {
                PipelineError::Infrastructure(format!("cannot create source workspace: {e}"))
            })?;

        let entry = dir.path().join("input.sol");
        fs::write(&entry, source).map_err(|e| {
            PipelineError::Infrastructure(format!(
                "cannot stage source for '{artifact_id}': {e}"
            ))
        })?;

        debug!(artifact_id, path = %entry.display(), "source staged");
        Ok(Self { dir, entry })
    }

    /// Path of the staged compilation entry file.
    pub fn entry_path(&self) -> &Path {
        &self.entry
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_source_is_readable() {
        let ws = SourceWorkspace::stage("c1", "contract A {}").unwrap();
        let read = fs::read_to_string(ws.entry_path()).unwrap();
        assert_eq!(read, "contract A {}");
    }

    #[test]
    fn drop_removes_the_directory() {
        let path;
        {
            let ws = SourceWorkspace::stage("c1", "contract A {}").unwrap();
            path = ws.root().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
