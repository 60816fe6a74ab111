//! Durable storage for the provider credential.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{Credential, CredentialError};

/// Reads the credential at startup and overwrites it after each refresh.
pub trait CredentialPersistence: Send + Sync {
    fn load(&self) -> Result<Credential, CredentialError>;

    /// Must not return until the credential is durable.
    fn save(&self, credential: &Credential) -> Result<(), CredentialError>;
}

/// Credential stored as a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileCredentialPersistence {
    path: PathBuf,
}

impl JsonFileCredentialPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CredentialPersistence for JsonFileCredentialPersistence {
    fn load(&self) -> Result<Credential, CredentialError> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| CredentialError::Load(format!("{}: {}", self.path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| CredentialError::Load(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let json = serde_json::to_vec_pretty(credential)
            .map_err(|e| CredentialError::Persist(e.to_string()))?;
        let temp = self.temp_path();

        let mut file = File::create(&temp)
            .map_err(|e| CredentialError::Persist(format!("{}: {}", temp.display(), e)))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| CredentialError::Persist(format!("{}: {}", temp.display(), e)))?;
        drop(file);

        fs::rename(&temp, &self.path)
            .map_err(|e| CredentialError::Persist(format!("{}: {}", self.path.display(), e)))?;

        // Make the rename itself durable where the platform allows it
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}
