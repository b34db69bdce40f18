//! Video Artifacts
//!
//! Turns side-channel payloads into playable `.webm` files on disk. A
//! terminal cannot play video, so the transcript lists the file paths and
//! the user opens them with whatever player they like.
//!
//! Each session writes into its own `session-<uuid>` directory under the
//! artifact root, and files are named `video-<message index>-<n>.webm`.
//! Materializing a message again first removes its earlier files, so the
//! attachment list always matches what is on disk. Other sessions sharing
//! the root are never touched.

use std::path::{Path, PathBuf};

use thiserror::Error;
use vidchat_core::{PayloadError, SideChannelPayload};

/// MIME type of materialized videos
pub const VIDEO_MIME: &str = "video/webm";

/// A decoded video written to disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoArtifact {
    /// File location
    pub path: PathBuf,
    /// Size in bytes
    pub size: usize,
    /// MIME type
    pub mime: &'static str,
}

impl VideoArtifact {
    /// Human-readable size ("1.2 MB")
    pub fn size_label(&self) -> String {
        #[allow(clippy::cast_precision_loss)]
        let size = self.size as f64;
        if size >= 1024.0 * 1024.0 {
            format!("{:.1} MB", size / (1024.0 * 1024.0))
        } else if size >= 1024.0 {
            format!("{:.1} KB", size / 1024.0)
        } else {
            format!("{} B", self.size)
        }
    }
}

/// Failures turning payloads into files
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// A payload was not valid base64
    #[error("Video {index} could not be decoded: {source}")]
    Decode {
        /// Position of the payload in the data frame
        index: usize,
        /// Underlying decode error
        source: PayloadError,
    },

    /// Writing to the artifact directory failed
    #[error("Failed to write {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
}

/// Default artifact directory (`$XDG_CACHE_HOME/vidchat/videos`)
pub fn default_artifact_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("vidchat")
        .join("videos")
}

/// Fresh directory under `root` for one session's videos.
///
/// The directory is created on first write.
pub fn session_artifact_dir(root: &Path) -> PathBuf {
    root.join(format!("session-{}", uuid::Uuid::new_v4().simple()))
}

/// Path of the `n`th video attached to a message
pub fn artifact_path(dir: &Path, message_index: usize, n: usize) -> PathBuf {
    dir.join(format!("video-{message_index}-{n}.webm"))
}

/// Decode payloads and write them as `.webm` files.
///
/// Every payload is decoded before anything is written, so a bad payload
/// leaves the directory untouched. Payloads with an empty `video` field are
/// skipped.
///
/// # Errors
///
/// Returns [`ArtifactError::Decode`] for invalid base64 and
/// [`ArtifactError::Io`] if the directory or a file cannot be written.
pub async fn materialize_videos(
    dir: &Path,
    message_index: usize,
    payloads: &[SideChannelPayload],
) -> Result<Vec<VideoArtifact>, ArtifactError> {
    let decoded = payloads
        .iter()
        .enumerate()
        .filter(|(_, p)| p.has_video())
        .map(|(index, p)| {
            p.decode_video()
                .map_err(|source| ArtifactError::Decode { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ArtifactError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

    clear_message_artifacts(dir, message_index).await?;

    let mut artifacts = Vec::with_capacity(decoded.len());
    for (n, bytes) in decoded.into_iter().enumerate() {
        let path = artifact_path(dir, message_index, n);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Video written");
        artifacts.push(VideoArtifact {
            path,
            size: bytes.len(),
            mime: VIDEO_MIME,
        });
    }

    Ok(artifacts)
}

/// Remove earlier videos written for a message
async fn clear_message_artifacts(dir: &Path, message_index: usize) -> Result<(), ArtifactError> {
    let prefix = format!("video-{message_index}-");
    let io_err = |source| ArtifactError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(".webm") {
            let path = entry.path();
            tokio::fs::remove_file(&path)
                .await
                .map_err(|source| ArtifactError::Io { path, source })?;
        }
    }
    Ok(())
}
