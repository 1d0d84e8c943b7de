//! Single-instance guard.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("PID file {} already exists; is streamgate already running?", path.display())]
    AlreadyRunning { path: PathBuf },
    #[error("failed to write PID file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Holds the PID file for the life of the process and removes it on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create the file exclusively and write the current PID into it. An
    /// existing file is left untouched.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PidFileError> {
        let path = path.as_ref().to_path_buf();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(PidFileError::AlreadyRunning { path });
            }
            Err(source) => return Err(PidFileError::Io { path, source }),
        };

        // From here on the guard owns the file, so a failed write still removes it.
        let guard = PidFile { path };
        writeln!(file, "{}", std::process::id()).map_err(|source| PidFileError::Io {
            path: guard.path.clone(),
            source,
        })?;
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove PID file");
        }
    }
}
