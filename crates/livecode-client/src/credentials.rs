//! Persisted access token.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use livecode_core::RemoteError;
use livecode_transport::UserRecord;
use thiserror::Error;

use crate::ApiClient;

/// Key the token is stored under.
pub const TOKEN_KEY: &str = "token";

const APP_DIR: &str = "livecode";
const FILE_NAME: &str = "credentials.json";

/// Credential store error.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("Credential file error: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed credential file: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Single access token kept in a small JSON file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store at an explicit path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<config_dir>/livecode/credentials.json`.
    ///
    /// # Errors
    /// Returns `CredentialError::NoConfigDir` if the platform has none.
    pub fn default_location() -> Result<Self, CredentialError> {
        let dir = dirs::config_dir().ok_or(CredentialError::NoConfigDir)?;
        Ok(Self::new(dir.join(APP_DIR).join(FILE_NAME)))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored token, if any.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<String>, CredentialError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut entries: BTreeMap<String, String> = serde_json::from_str(&contents)?;
        Ok(entries.remove(TOKEN_KEY).filter(|token| !token.is_empty()))
    }

    /// Persist `token`, replacing any previous one.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn save(&self, token: &str) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entries = BTreeMap::from([(TOKEN_KEY, token)]);
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    /// Forget the stored token.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Fetch the profile for the stored token.
    ///
    /// A token the server rejects is cleared and `Ok(None)` returned.
    ///
    /// # Errors
    /// Returns error on file or network failures; the token is kept.
    pub async fn restore_profile(&self, api: &ApiClient) -> Result<Option<UserRecord>, CredentialError> {
        let Some(token) = self.load()? else {
            return Ok(None);
        };
        match api.clone().with_token(token).me().await {
            Ok(profile) => Ok(Some(profile)),
            Err(RemoteError::Status { code: 401, .. }) => {
                tracing::info!("Stored token was rejected, clearing it");
                self.clear()?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
