#![forbid(unsafe_code)]

//! Temporary files that receive a download and are streamed back to the
//! client.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use axum::body::Body;
use futures::StreamExt;
use tempfile::TempPath;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::ExtractError;

pub const MEDIA_SUFFIX: &str = ".mp4";
const TEMP_PREFIX: &str = "tubefetch-";

/// What happens to a finished download after it has been sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Remove the file once the response body is done.
    #[default]
    Delete,
    /// Leave the file in the temp directory.
    Keep,
}

impl RetentionPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delete" | "remove" | "cleanup" => Some(Self::Delete),
            "keep" | "retain" => Some(Self::Keep),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Keep => "keep",
        }
    }
}

/// A uniquely named output path reserved for one download.
///
/// The placeholder file is created and closed right away; the extractor
/// reopens it by path. [`DownloadTarget::discard`] removes the placeholder
/// together with any sibling files the extractor left behind (`.part`,
/// `.fNNN.mp4`). All of that directory work runs on the blocking pool.
pub struct DownloadTarget {
    path: PathBuf,
    guard: Option<TempPath>,
    retention: RetentionPolicy,
}

/// A finished download ready to be used as a response body.
pub struct MediaBody {
    pub body: Body,
    pub len: u64,
}

impl DownloadTarget {
    pub fn allocate(dir: &Path, retention: RetentionPolicy) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(MEDIA_SUFFIX)
            .tempfile_in(dir)?;
        let guard = file.into_temp_path();
        Ok(Self {
            path: guard.to_path_buf(),
            guard: Some(guard),
            retention,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the finished file as a streaming body. With
    /// [`RetentionPolicy::Delete`] the file lives exactly as long as the body.
    /// On error the target is discarded before returning.
    pub async fn into_body(mut self) -> Result<MediaBody, ExtractError> {
        let (file, len) = match open_output(&self.path).await {
            Ok(opened) => opened,
            Err(err) => {
                self.discard().await;
                return Err(err);
            }
        };

        let guard = match (self.retention, self.guard.take()) {
            (RetentionPolicy::Keep, Some(guard)) => {
                guard.keep().map_err(|err| ExtractError::Io(err.error))?;
                None
            }
            (_, guard) => guard,
        };
        let path = self.path.clone();
        off_runtime(move || sweep_leftovers(&path)).await;

        let stream = ReaderStream::new(file).map(move |chunk| {
            let _held = &guard;
            chunk
        });

        Ok(MediaBody {
            body: Body::from_stream(stream),
            len,
        })
    }

    /// Removes the placeholder and every leftover sharing its stem.
    pub async fn discard(mut self) {
        let path = self.path.clone();
        let guard = self.guard.take();
        off_runtime(move || remove_all(&path, guard)).await;
    }
}

impl Drop for DownloadTarget {
    fn drop(&mut self) {
        // Only a cancelled request gets here with the placeholder still held.
        let Some(guard) = self.guard.take() else {
            return;
        };
        let path = self.path.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_all(&path, Some(guard)));
            }
            Err(_) => remove_all(&path, Some(guard)),
        }
    }
}

async fn open_output(path: &Path) -> Result<(File, u64), ExtractError> {
    let file = File::open(path).await?;
    let len = file.metadata().await?.len();
    if len == 0 {
        return Err(ExtractError::Failed(
            "extractor reported success but wrote no data".to_string(),
        ));
    }
    Ok((file, len))
}

async fn off_runtime(task: impl FnOnce() + Send + 'static) {
    if let Err(err) = tokio::task::spawn_blocking(task).await {
        warn!(error = %err, "temp file cleanup task failed");
    }
}

fn remove_all(path: &Path, guard: Option<TempPath>) {
    sweep_leftovers(path);
    if let Some(guard) = guard
        && let Err(err) = guard.close()
        && err.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %err, "failed to remove temp file");
    }
}

/// Removes files next to `path` that share its stem, e.g. the per-stream
/// downloads yt-dlp writes before merging.
fn sweep_leftovers(path: &Path) {
    let (Some(dir), Some(stem)) = (path.parent(), path.file_stem().and_then(|s| s.to_str()))
    else {
        return;
    };
    let prefix = format!("{stem}.");
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let candidate = entry.path();
        if candidate == path {
            continue;
        }
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        match fs::remove_file(&candidate) {
            Ok(()) => debug!(path = %candidate.display(), "removed extractor leftover"),
            Err(err) => warn!(path = %candidate.display(), error = %err, "failed to remove leftover"),
        }
    }
}
