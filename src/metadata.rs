#![forbid(unsafe_code)]

//! Metadata returned by `/info`.
//!
//! yt-dlp's `--dump-single-json` payload is large; only the two fields the API
//! exposes are read, everything else is ignored.

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// Title and thumbnail of a media page. Both serialize as `null` when the
/// extractor did not provide them, so the JSON object always has exactly these
/// two keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataResult {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl MetadataResult {
    pub fn from_info_json(raw: &[u8]) -> Result<Self, ExtractError> {
        Ok(serde_json::from_slice(raw)?)
    }
}
