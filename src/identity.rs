//! Persistent user identity
//!
//! Each installation has one stable user id (UUID v4), generated on first use
//! and sent with every think-and-reply request.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// User identity stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable user identifier
    pub user_id: String,

    /// When the identity was created
    pub created_at: DateTime<Utc>,
}

impl UserIdentity {
    /// Generate a fresh identity
    #[must_use]
    pub fn generate() -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Load identity from a file, or create a new one if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns error if file operations fail or JSON is invalid
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let identity: Self = serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("invalid user identity: {e}")))?;

            if Uuid::parse_str(&identity.user_id).is_err() {
                return Err(Error::Config(format!(
                    "invalid user identity: {} is not a uuid",
                    identity.user_id
                )));
            }

            tracing::debug!(user_id = %identity.user_id, "loaded user identity");
            Ok(identity)
        } else {
            let identity = Self::generate();

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            let content = serde_json::to_string_pretty(&identity)?;
            fs::write(path, content)?;

            tracing::info!(user_id = %identity.user_id, "created new user identity");
            Ok(identity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_uuid() {
        let identity = UserIdentity::generate();
        assert!(Uuid::parse_str(&identity.user_id).is_ok());
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");

        let first = UserIdentity::load_or_create(&path).unwrap();
        assert!(path.exists());

        let second = UserIdentity::load_or_create(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_corrupt_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, "{not json").unwrap();

        let result = UserIdentity::load_or_create(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_non_uuid_user_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(
            &path,
            r#"{"user_id":"user_1","created_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        assert!(matches!(
            UserIdentity::load_or_create(&path),
            Err(Error::Config(_))
        ));
    }
}
