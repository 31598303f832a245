use crate::config::error::ConfigError;
use std::borrow::Cow;
use std::io;
use std::path::{Path, PathBuf};

const DATA_DIR_NAME: &str = "aemet_harvest";

pub fn get_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .ok_or(ConfigError::DataDirResolution)
        .map(|p| p.join(DATA_DIR_NAME))
}

pub async fn ensure_dir_exists(path: &Path) -> Result<(), ConfigError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(ConfigError::DataDirCreation(
                    path.to_path_buf(),
                    io::Error::new(io::ErrorKind::AlreadyExists, "path is not a directory"),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::info!("Creating data directory: {}", path.display());
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| ConfigError::DataDirCreation(path.to_path_buf(), e))
        }
        Err(e) => Err(ConfigError::DataDirCreation(path.to_path_buf(), e)),
    }
}

/// Sibling path of `path` with `suffix` appended to the file name.
pub(crate) fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Decodes `bytes` as UTF-8, falling back to ISO-8859-1, which the remote
/// and most official reference lists use.
pub(crate) fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}
