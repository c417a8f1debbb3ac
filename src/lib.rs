#![forbid(unsafe_code)]

//! A small HTTP front for yt-dlp: look up a page's title and thumbnail, or
//! download its best video and audio merged into an mp4.

pub mod config;
pub mod error;
pub mod extractor;
pub mod media;
pub mod metadata;
pub mod service;

pub use service::FetchService;
