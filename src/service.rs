#![forbid(unsafe_code)]

//! HTTP surface: `GET /info`, `POST /download` and a liveness probe.
//!
//! [`FetchService`] is built once at startup and handed to the router as
//! state. It holds no request-scoped data; every request gets its own temp
//! file and its own extractor run.

use std::{path::PathBuf, sync::Arc};

use axum::{
    Form, Json, Router,
    extract::{FromRequest, Multipart, Query, Request, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::RuntimeSettings,
    error::{ApiError, ApiResult, ExtractError},
    extractor::{DownloadOptions, Extractor, MetadataOptions, YtDlp},
    media::{DownloadTarget, MediaBody, RetentionPolicy},
    metadata::MetadataResult,
};

/// Filename every download is offered under, whatever the source.
pub const ATTACHMENT_NAME: &str = "video.mp4";
const CONTENT_DISPOSITION_VALUE: &str = "attachment; filename=\"video.mp4\"";

#[derive(Clone)]
pub struct FetchService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    extractor: Arc<dyn Extractor>,
    temp_dir: PathBuf,
    retention: RetentionPolicy,
}

impl FetchService {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        temp_dir: impl Into<PathBuf>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                extractor,
                temp_dir: temp_dir.into(),
                retention,
            }),
        }
    }

    /// Wires a yt-dlp backed service from resolved settings.
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        let ytdlp = YtDlp::new(settings.ytdlp.clone()).with_timeout(settings.timeout);
        Self::new(
            Arc::new(ytdlp),
            settings.temp_dir.clone(),
            settings.retention,
        )
    }

    pub async fn info(&self, url: &str) -> ApiResult<MetadataResult> {
        let meta = self
            .inner
            .extractor
            .extract_info(url, &MetadataOptions::default())
            .await?;
        Ok(meta)
    }

    /// Downloads `url` into a fresh temp file and returns it as a body.
    pub async fn download(&self, url: &str) -> ApiResult<MediaBody> {
        let target = DownloadTarget::allocate(&self.inner.temp_dir, self.inner.retention)
            .map_err(ExtractError::from)?;
        let options = DownloadOptions::best_mp4(target.path());
        if let Err(err) = self.inner.extractor.download(url, &options).await {
            target.discard().await;
            return Err(err.into());
        }
        let media = target.into_body().await?;
        info!(
            url,
            bytes = media.len,
            extractor = self.inner.extractor.name(),
            retention = self.inner.retention.as_str(),
            "download ready"
        );
        Ok(media)
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/info", get(get_info))
            .route("/download", post(post_download))
            .route("/healthz", get(healthz))
            .fallback(not_found)
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }
}

/// Raw `key=value` pairs. Keeps repeated keys instead of rejecting them.
type Pairs = Vec<(String, String)>;

/// Every `url` value sent with a request, in arrival order.
#[derive(Debug, Default)]
pub struct UrlParams {
    values: Vec<String>,
}

impl UrlParams {
    fn from_pairs(pairs: Pairs) -> Self {
        Self {
            values: pairs
                .into_iter()
                .filter(|(key, _)| key == "url")
                .map(|(_, value)| value)
                .collect(),
        }
    }

    /// The first non-blank `url`, trimmed.
    fn require_url(self) -> ApiResult<String> {
        self.values
            .into_iter()
            .map(|url| url.trim().to_string())
            .find(|url| !url.is_empty())
            .ok_or_else(|| ApiError::bad_input("missing required parameter `url`"))
    }
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("multipart/form-data")
        })
}

/// Reads `url` from a urlencoded or a multipart form body.
impl<S> FromRequest<S> for UrlParams
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_multipart(req.headers()) {
            let Form(pairs) = Form::<Pairs>::from_request(req, state)
                .await
                .map_err(|err| ApiError::bad_input(err.body_text()))?;
            return Ok(Self::from_pairs(pairs));
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|err| ApiError::bad_input(err.body_text()))?;
        let mut values = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::bad_input(err.body_text()))?
        {
            // File parts and other fields are skipped unread.
            if field.name() != Some("url") {
                continue;
            }
            let value = field
                .text()
                .await
                .map_err(|err| ApiError::bad_input(err.body_text()))?;
            values.push(value);
        }
        Ok(Self { values })
    }
}

async fn get_info(
    State(service): State<FetchService>,
    params: Result<Query<Pairs>, QueryRejection>,
) -> ApiResult<Json<MetadataResult>> {
    let Query(pairs) = params.map_err(|err| ApiError::bad_input(err.body_text()))?;
    let url = UrlParams::from_pairs(pairs).require_url()?;
    Ok(Json(service.info(&url).await?))
}

async fn post_download(
    State(service): State<FetchService>,
    params: UrlParams,
) -> ApiResult<Response> {
    let url = params.require_url()?;
    let MediaBody { body, len } = service.download(&url).await?;

    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static(CONTENT_DISPOSITION_VALUE),
    );
    Ok(response)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}
