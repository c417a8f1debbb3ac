#![forbid(unsafe_code)]

//! HTTP server that fronts yt-dlp.
//!
//! Settings come from the command line, then the environment, then `.env`.
//! The server does not refuse to start when yt-dlp or ffmpeg are missing; it
//! logs a warning and requests fail with an `internal` error instead.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tubefetch::{
    FetchService,
    config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings},
    extractor::program_version,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct BackendArgs {
    /// Address to listen on (default 0.0.0.0)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (default 5000)
    #[arg(long)]
    port: Option<u16>,

    /// Path or name of the yt-dlp executable
    #[arg(long)]
    ytdlp: Option<PathBuf>,

    /// Directory that receives download temp files
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// What to do with a download once it is sent: delete or keep
    #[arg(long)]
    retention: Option<String>,

    /// Abort extractor runs after this many seconds (0 disables)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Env file to read settings from
    #[arg(long)]
    env_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl BackendArgs {
    fn overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host.clone(),
            port: self.port,
            ytdlp: self.ytdlp.clone(),
            temp_dir: self.temp_dir.clone(),
            retention: self.retention.clone(),
            timeout_secs: self.timeout_secs,
            env_path: self.env_file.clone(),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
    }
}

/// Reports tool availability. Missing tools are logged, not fatal.
async fn check_tools(settings: &RuntimeSettings) {
    match program_version(&settings.ytdlp, "--version").await {
        Ok(version) => info!(program = %settings.ytdlp.display(), %version, "yt-dlp available"),
        Err(err) => warn!(error = %err, "yt-dlp unavailable; every request will fail"),
    }
    match program_version(Path::new("ffmpeg"), "-version").await {
        Ok(version) => info!(%version, "ffmpeg available"),
        Err(err) => warn!(error = %err, "ffmpeg unavailable; merging video and audio will fail"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BackendArgs::parse();
    init_tracing(args.log_format);

    let settings = resolve_runtime_settings(args.overrides())?;
    tokio::fs::create_dir_all(&settings.temp_dir)
        .await
        .with_context(|| format!("creating temp dir {}", settings.temp_dir.display()))?;
    check_tools(&settings).await;

    info!(
        temp_dir = %settings.temp_dir.display(),
        retention = settings.retention.as_str(),
        timeout_secs = settings.timeout.map(|limit| limit.as_secs()),
        "configuration loaded"
    );

    let app = FetchService::from_settings(&settings).router();

    let addr = SocketAddr::new(settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;

    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        warn!("failed to install Ctrl+C handler: {}", err);
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(extra: &[&str]) -> BackendArgs {
        let argv = std::iter::once("backend").chain(extra.iter().copied());
        BackendArgs::try_parse_from(argv).expect("parsed args")
    }

    #[test]
    fn backend_args_default_to_none() {
        let args = parse(&[]);
        assert!(args.host.is_none());
        assert!(args.port.is_none());
        assert_eq!(args.log_format, LogFormat::Pretty);
    }

    #[test]
    fn backend_args_override_settings() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join("missing.env");
        let env_file = env_file.to_str().unwrap();
        let args = parse(&[
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--ytdlp",
            "/opt/yt-dlp",
            "--temp-dir",
            "/srv/tubefetch",
            "--retention",
            "keep",
            "--timeout-secs",
            "30",
            "--env-file",
            env_file,
            "--log-format",
            "json",
        ]);
        assert_eq!(args.log_format, LogFormat::Json);

        let settings = resolve_runtime_settings(args.overrides()).unwrap();
        assert_eq!(settings.host.to_string(), "127.0.0.1");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.ytdlp, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(settings.temp_dir, PathBuf::from("/srv/tubefetch"));
        assert_eq!(settings.retention.as_str(), "keep");
        assert_eq!(settings.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn backend_args_reject_bad_port() {
        let argv = ["backend", "--port", "99999"];
        assert!(BackendArgs::try_parse_from(argv).is_err());
    }
}
