//! Single plain-text API credential stored under the per-user state directory.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::core::config::data::path_display;

/// Environment variable that takes precedence over the credential file.
pub const API_KEY_ENV: &str = "STREAMCHAT_API_KEY";

#[derive(Debug)]
pub enum CredentialError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Empty,
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::Read { path, source } => {
                write!(f, "Failed to read API key at {}: {}", path_display(path), source)
            }
            CredentialError::Write { path, source } => {
                write!(f, "Failed to write API key at {}: {}", path_display(path), source)
            }
            CredentialError::Empty => write!(f, "API key is empty"),
        }
    }
}

impl StdError for CredentialError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CredentialError::Read { source, .. } | CredentialError::Write { source, .. } => {
                Some(source)
            }
            CredentialError::Empty => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Trimmed key, or `None` when the file is absent or blank.
    pub fn load(&self) -> Result<Option<String>, CredentialError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path).map_err(|source| CredentialError::Read {
            path: self.path.clone(),
            source,
        })?;
        let key = contents.trim();
        Ok((!key.is_empty()).then(|| key.to_string()))
    }

    /// The environment override wins over the stored file.
    pub fn resolve(&self) -> Result<Option<String>, CredentialError> {
        if let Some(key) = std::env::var(API_KEY_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            debug!("Using API key from {API_KEY_ENV}");
            return Ok(Some(key));
        }
        self.load()
    }

    pub fn save(&self, key: &str) -> Result<(), CredentialError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(CredentialError::Empty);
        }
        let write_err = |source| CredentialError::Write {
            path: self.path.clone(),
            source,
        };
        let parent = self.path.parent().filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        // NamedTempFile is created with 0600 on Unix, which persist() keeps.
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(write_err)?;
        temp_file.write_all(key.as_bytes()).map_err(write_err)?;
        temp_file.as_file_mut().sync_all().map_err(write_err)?;
        temp_file
            .persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        debug!(path = %path_display(&self.path), "Saved API key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn absent_or_blank_file_has_no_key() {
        let dir = TempDir::new().expect("temp dir");
        let store = CredentialStore::new(dir.path().join("key.txt"));
        assert_eq!(store.load().expect("load"), None);

        fs::write(store.path(), "  \n").expect("write");
        assert_eq!(store.load().expect("load"), None);
    }

    #[test]
    fn saved_key_is_trimmed_and_reloaded() {
        let dir = TempDir::new().expect("temp dir");
        let store = CredentialStore::new(dir.path().join("state").join("key.txt"));
        store.save("  abc123\n").expect("save");
        assert_eq!(store.load().expect("load").as_deref(), Some("abc123"));
        assert_eq!(fs::read_to_string(store.path()).expect("read"), "abc123");
    }

    #[test]
    fn empty_key_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let store = CredentialStore::new(dir.path().join("key.txt"));
        assert!(matches!(store.save("   "), Err(CredentialError::Empty)));
        assert!(!store.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn saved_key_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("temp dir");
        let store = CredentialStore::new(dir.path().join("key.txt"));
        store.save("secret").expect("save");
        let mode = fs::metadata(store.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
