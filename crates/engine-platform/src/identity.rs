//! Persistent device identity used by the AUTH flow.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by identity resolution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
    #[error("identity store backend failure: {0}")]
    Backend(String),
}

/// Source of the stable per-install device identifier.
///
/// The identifier is created at most once per install and never destroyed by
/// the engine.
#[async_trait]
pub trait DeviceIdentity: Send + Sync {
    /// Return the device identifier, creating and persisting it on first use.
    async fn resolve_or_create(&self) -> Result<String, IdentityError>;
}

/// File-backed identity: one UUID-v4 in a plain text file.
#[derive(Debug, Clone)]
pub struct FileDeviceIdentity {
    path: PathBuf,
}

impl FileDeviceIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DeviceIdentity for FileDeviceIdentity {
    async fn resolve_or_create(&self) -> Result<String, IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let existing = raw.trim();
                if !existing.is_empty() {
                    return Ok(existing.to_owned());
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(IdentityError::Backend(format!(
                    "failed reading device identity {}: {err}",
                    self.path.display()
                )));
            }
        }

        let id = Uuid::new_v4().to_string();
        write_atomically(&self.path, id.as_bytes())
            .map_err(|err| IdentityError::Backend(err.to_string()))?;
        Ok(id)
    }
}

/// Fixed identity for tests and scripted sessions.
#[derive(Debug, Clone)]
pub struct FixedDeviceIdentity {
    id: String,
}

impl FixedDeviceIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl DeviceIdentity for FixedDeviceIdentity {
    async fn resolve_or_create(&self) -> Result<String, IdentityError> {
        Ok(self.id.clone())
    }
}

/// Write via a temp file and rename, creating parent directories as needed.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating directory {}: {err}", parent.display()))?;
    }

    let temp_path = temp_sibling(path);
    fs::write(&temp_path, contents)
        .map_err(|err| format!("failed writing temp file {}: {err}", temp_path.display()))?;

    if let Err(rename_err) = fs::rename(&temp_path, path) {
        // Windows does not allow replacing existing files via rename.
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                return Err(format!(
                    "failed replacing {} after rename error ({rename_err}): {err}",
                    path.display()
                ));
            }
        }
        fs::rename(&temp_path, path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            format!("failed writing {}: {err}", path.display())
        })?;
    }

    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("tapvolt-file");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn unique_temp_path(label: &str) -> PathBuf {
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        env::temp_dir().join(format!("tapvolt-{label}-{now_nanos}"))
    }

    #[tokio::test]
    async fn creates_identity_once_and_reuses_it() {
        let path = unique_temp_path("device-id");
        let identity = FileDeviceIdentity::new(&path);

        let first = identity
            .resolve_or_create()
            .await
            .expect("first resolve should work");
        Uuid::parse_str(&first).expect("identity should be a uuid");

        let second = identity
            .resolve_or_create()
            .await
            .expect("second resolve should work");
        assert_eq!(first, second);

        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn regenerates_when_the_file_is_blank() {
        let path = unique_temp_path("blank-device-id");
        fs::write(&path, "  \n").expect("seed write should work");

        let identity = FileDeviceIdentity::new(&path);
        let id = identity
            .resolve_or_create()
            .await
            .expect("resolve should work");
        Uuid::parse_str(&id).expect("identity should be a uuid");

        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn fixed_identity_is_stable() {
        let identity = FixedDeviceIdentity::new("device-under-test");
        assert_eq!(
            identity
                .resolve_or_create()
                .await
                .expect("resolve should work"),
            "device-under-test"
        );
    }
}
