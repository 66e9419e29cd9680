//! Post sources. Each fetcher pulls authored posts from one remote service and
//! stages their images in a private directory that outlives the fetch.

use crate::error::{PostbookError, Result};
use crate::post::Post;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod graph_feed;
pub mod publication;
#[cfg(test)]
mod test_server;

pub use graph_feed::GraphFeedFetcher;
pub use publication::PublicationFetcher;

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; posts-to-pdf-book/1.0)";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Upper bound on returned posts.
    pub limit: usize,
    /// Inclusive lower bound on the post date.
    pub since: Option<NaiveDateTime>,
    /// Inclusive upper bound on the post date.
    pub until: Option<NaiveDateTime>,
    pub download_images: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            since: None,
            until: None,
            download_images: true,
        }
    }
}

impl FetchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_since(mut self, since: Option<NaiveDateTime>) -> Self {
        self.since = since;
        self
    }

    pub fn with_until(mut self, until: Option<NaiveDateTime>) -> Self {
        self.until = until;
        self
    }

    pub fn with_download_images(mut self, download: bool) -> Self {
        self.download_images = download;
        self
    }

    pub fn contains(&self, date: NaiveDateTime) -> bool {
        in_window(date, self.since, self.until)
    }
}

pub trait SourceFetcher {
    /// Posts sorted ascending by date. Partial results are returned when a
    /// page request fails midway.
    fn fetch_posts(&self, options: &FetchOptions) -> Result<Vec<Post>>;

    /// Best effort: a failed download is logged and yields `None`.
    fn download_image(&self, url: &str, staging_dir: &Path) -> Option<PathBuf>;
}

pub fn in_window(
    date: NaiveDateTime,
    since: Option<NaiveDateTime>,
    until: Option<NaiveDateTime>,
) -> bool {
    since.is_none_or(|since| date >= since) && until.is_none_or(|until| date <= until)
}

/// Parses the ISO-8601 variants the services emit. Offsets are dropped and
/// the wall-clock time in that offset is kept.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.naive_local());
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Malformed or missing dates fall back to the time of the fetch.
pub fn parse_timestamp_or_now(raw: &str) -> NaiveDateTime {
    parse_timestamp(raw).unwrap_or_else(|| {
        debug!("unparseable post date {raw:?}; using current time");
        Local::now().naive_local()
    })
}

/// Creates a directory for downloaded images. It is not removed on drop:
/// the renderer reads the staged files after the fetch returns.
pub fn staging_dir(prefix: &str) -> Result<PathBuf> {
    let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
    Ok(dir.keep())
}

pub(crate) fn http_client(cookie: Option<&str>) -> Result<Client> {
    let mut headers = HeaderMap::new();
    if let Some(cookie) = cookie {
        let value = HeaderValue::from_str(cookie).map_err(|err| {
            PostbookError::InvalidConfiguration(format!("session cookie: {err}"))
        })?;
        headers.insert(header::COOKIE, value);
    }
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()?)
}

pub(crate) fn image_extension(content_type: &str) -> &'static str {
    if content_type.contains("png") {
        ".png"
    } else if content_type.contains("gif") {
        ".gif"
    } else if content_type.contains("webp") {
        ".webp"
    } else {
        ".jpg"
    }
}

/// Stable file stem for a remote image URL.
pub(crate) fn staged_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("img_{hex}")
}

pub(crate) fn download_with(client: &Client, url: &str, staging_dir: &Path) -> Option<PathBuf> {
    match try_download(client, url, staging_dir) {
        Ok(path) => Some(path),
        Err(err) => {
            warn!("Warning: Could not download image {url}: {err}");
            None
        }
    }
}

fn try_download(client: &Client, url: &str, staging_dir: &Path) -> Result<PathBuf> {
    let response = client
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()?
        .error_for_status()?;
    let ext = image_extension(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(""),
    );
    let bytes = response.bytes()?;
    let path = staging_dir.join(format!("{}{ext}", staged_name(url)));
    std::fs::write(&path, &bytes)?;
    debug!(
        "Downloaded image: {url} -> {} ({} bytes)",
        path.display(),
        bytes.len()
    );
    Ok(path)
}
