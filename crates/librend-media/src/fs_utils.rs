//! Filesystem helpers for output videos and per-request working paths.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use librend_models::CorrelationId;

use crate::error::{MediaError, MediaResult};

/// Create `path` and its parents if missing.
pub async fn ensure_dir(path: impl AsRef<Path>) -> MediaResult<()> {
    fs::create_dir_all(path.as_ref()).await?;
    Ok(())
}

/// Recursively remove `path`.
///
/// Returns `false` if there was nothing to remove.
pub async fn remove_dir_if_exists(path: impl AsRef<Path>) -> MediaResult<bool> {
    let path = path.as_ref();
    match fs::remove_dir_all(path).await {
        Ok(()) => {
            tracing::debug!("Removed working directory {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Output video path for a request: `<storage>/<correlation_id>.mp4`.
pub fn video_output_path(
    storage_dir: impl AsRef<Path>,
    correlation_id: &CorrelationId,
) -> MediaResult<PathBuf> {
    child_path(storage_dir.as_ref(), correlation_id, ".mp4")
}

/// Per-request working directory: `<screens>/<correlation_id>`.
pub fn working_dir_path(
    screens_dir: impl AsRef<Path>,
    correlation_id: &CorrelationId,
) -> MediaResult<PathBuf> {
    child_path(screens_dir.as_ref(), correlation_id, "")
}

fn child_path(base: &Path, correlation_id: &CorrelationId, suffix: &str) -> MediaResult<PathBuf> {
    if !correlation_id.is_path_safe() {
        return Err(MediaError::UnsafePath {
            base: base.to_path_buf(),
            name: correlation_id.as_str().to_string(),
        });
    }
    Ok(base.join(format!("{}{}", correlation_id.as_str(), suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_remove_dir_if_exists() {
        let dir = TempDir::new().unwrap();
        let screens = dir.path().join("abc");
        fs::create_dir_all(screens.join("frames")).await.unwrap();
        fs::write(screens.join("frames").join("0001.png"), b"png").await.unwrap();

        assert!(remove_dir_if_exists(&screens).await.unwrap());
        assert!(!screens.exists());
        assert!(!remove_dir_if_exists(&screens).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_dir_creates_parents() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("storage").join("libras");

        ensure_dir(&nested).await.unwrap();
        ensure_dir(&nested).await.unwrap();

        assert!(nested.is_dir());
    }

    #[test]
    fn test_video_output_path() {
        let path = video_output_path("/storage/libras", &CorrelationId::from("abc")).unwrap();
        assert_eq!(path, PathBuf::from("/storage/libras/abc.mp4"));

        let dir = working_dir_path("/tmp/vlibras/screens", &CorrelationId::from("abc")).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/vlibras/screens/abc"));
    }

    #[test]
    fn test_paths_stay_under_their_base() {
        for id in ["/etc", "../abc", "abc/../../x", ""] {
            let id = CorrelationId::from(id);
            assert!(matches!(
                working_dir_path("/tmp/vlibras/screens", &id),
                Err(MediaError::UnsafePath { .. })
            ));
            assert!(matches!(
                video_output_path("/storage/libras", &id),
                Err(MediaError::UnsafePath { .. })
            ));
        }
    }
}
