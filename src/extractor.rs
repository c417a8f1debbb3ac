#![forbid(unsafe_code)]

//! Bridge to the external extraction tool.
//!
//! yt-dlp does all the site-specific work: page scraping, format selection
//! and muxing. This module only renders the two option shapes the service
//! needs into command-line arguments, runs the tool as a child process and
//! turns its exit status into an [`ExtractError`].

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Output, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{error::ExtractError, metadata::MetadataResult};

/// Format selector handed to the tool for downloads.
pub const BEST_FORMAT: &str = "bestvideo+bestaudio/best";
/// Container the selected streams are merged into.
pub const MERGE_FORMAT: &str = "mp4";

/// Options for a metadata-only run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataOptions {
    pub quiet: bool,
    pub skip_download: bool,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            quiet: true,
            skip_download: true,
        }
    }
}

impl MetadataOptions {
    fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--dump-single-json".into()];
        if self.skip_download {
            args.push("--skip-download".into());
        }
        if self.quiet {
            args.push("--quiet".into());
            args.push("--no-warnings".into());
        }
        args
    }
}

/// Options for a download run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Output template. A literal path here: the service pre-allocates it.
    pub outtmpl: PathBuf,
    pub format: String,
    pub merge_output_format: String,
}

impl DownloadOptions {
    /// Best video and best audio, merged into an mp4 at `outtmpl`.
    pub fn best_mp4(outtmpl: impl Into<PathBuf>) -> Self {
        Self {
            outtmpl: outtmpl.into(),
            format: BEST_FORMAT.to_string(),
            merge_output_format: MERGE_FORMAT.to_string(),
        }
    }

    fn to_args(&self) -> Vec<OsString> {
        vec![
            "--format".into(),
            self.format.clone().into(),
            "--merge-output-format".into(),
            self.merge_output_format.clone().into(),
            "--output".into(),
            self.outtmpl.clone().into_os_string(),
            // The placeholder already exists and is empty; without this the
            // tool reports it as "already downloaded" and does nothing.
            "--force-overwrites".into(),
            "--no-progress".into(),
        ]
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &'static str;

    /// Reads page metadata without fetching media.
    async fn extract_info(
        &self,
        url: &str,
        options: &MetadataOptions,
    ) -> Result<MetadataResult, ExtractError>;

    /// Downloads and muxes media into `options.outtmpl`.
    async fn download(&self, url: &str, options: &DownloadOptions) -> Result<(), ExtractError>;
}

/// [`Extractor`] backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: Vec<OsString>, url: &str) -> Result<Output, ExtractError> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            // Everything after `--` is a URL, even if it starts with a dash.
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!(?command, "running extractor");

        let pending = command.output();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| ExtractError::Timeout(limit.as_secs()))?,
            None => pending.await,
        };
        let output = result.map_err(|source| ExtractError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(status = %output.status, %stderr, "extractor exited with failure");
            return Err(ExtractError::from_stderr(&stderr));
        }
        Ok(output)
    }
}

#[async_trait]
impl Extractor for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn extract_info(
        &self,
        url: &str,
        options: &MetadataOptions,
    ) -> Result<MetadataResult, ExtractError> {
        info!(url, "extracting metadata");
        let output = self.run(options.to_args(), url).await?;
        MetadataResult::from_info_json(&output.stdout)
    }

    async fn download(&self, url: &str, options: &DownloadOptions) -> Result<(), ExtractError> {
        info!(url, output = %options.outtmpl.display(), "downloading media");
        self.run(options.to_args(), url).await?;
        Ok(())
    }
}

/// Runs `<program> <flag>` and returns the first line it prints. Used at
/// startup to report whether yt-dlp and ffmpeg are installed.
pub async fn program_version(program: &Path, flag: &str) -> Result<String, ExtractError> {
    let output = Command::new(program)
        .arg(flag)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ExtractError::Spawn {
            program: program.display().to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(ExtractError::Failed(format!(
            "{} {} exited with {}",
            program.display(),
            flag,
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or("unknown")
        .trim()
        .to_string())
}

#[cfg(test)]
pub(crate) mod stub {
    use std::fs;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Writes a fake `yt-dlp` into `dir`. The URL decides the behaviour:
    /// `unsupported`, `offline`, `broken` (fails mid-merge leaving a `.part`),
    /// `silent` (succeeds without writing), `bare` (metadata without title or
    /// thumbnail) and `slow` (sleeps before answering). Anything else succeeds
    /// and writes `video:<url>` to the output path.
    pub(crate) fn install_ytdlp_stub(dir: &Path) -> std::io::Result<PathBuf> {
        let script_path = dir.join("yt-dlp");
        let script = r#"#!/usr/bin/env bash
set -eu
output=""
mode="download"
url=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    --version)
      echo "2025.01.01"
      exit 0
      ;;
    --output)
      shift
      output="$1"
      ;;
    --dump-single-json)
      mode="info"
      ;;
    --)
      shift
      url="$1"
      ;;
  esac
  shift
done

case "$url" in
  *unsupported*)
    echo "ERROR: Unsupported URL: $url" >&2
    exit 1
    ;;
  *offline*)
    echo "ERROR: [generic] Unable to download webpage: <urlopen error [Errno -2] Name or service not known>" >&2
    exit 1
    ;;
  *slow*)
    sleep 5
    ;;
esac

if [[ "$mode" == "info" ]]; then
  case "$url" in
    *bare*)
      printf '{"id": "bare", "formats": []}\n'
      ;;
    *)
      name="${url##*/}"
      printf '{"id": "%s", "title": "Title of %s", "thumbnail": "https://img.example/%s.jpg", "duration": 12}\n' "$name" "$name" "$name"
      ;;
  esac
  exit 0
fi

case "$url" in
  *broken*)
    echo "partial" > "${output%.mp4}.f137.mp4.part"
    echo "WARNING: [generic] Unable to download webpage: HTTP Error 429: Too Many Requests. Retrying (1/3)..." >&2
    echo "ERROR: Postprocessing: Conversion failed!" >&2
    exit 1
    ;;
  *silent*)
    exit 0
    ;;
esac

printf 'video:%s' "$url" > "$output"
exit 0
"#;
        fs::write(&script_path, script)?;
        #[cfg(unix)]
        {
            let mut perms = fs::metadata(&script_path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms)?;
        }
        Ok(script_path)
    }
}
