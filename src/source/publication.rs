use super::{FetchOptions, SourceFetcher, download_with, http_client, parse_timestamp_or_now, staging_dir};
use crate::error::Result;
use crate::extract::HtmlContentExtractor;
use crate::post::{ContentBlock, Post, sort_posts};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const MAX_BATCH: usize = 50;

// Body container of a rendered public post page, bounded by the
// subscription widget or page footer that follows it.
static PAGE_BODY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)<div[^>]*class="[^"]*body[^"]*"[^>]*>(.*?)</div>\s*(?:<div[^>]*class="[^"]*subscription|footer)"#,
    )
    .expect("page body pattern is valid")
});

/// One record of the publication's post listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PostMeta {
    pub id: Option<serde_json::Value>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub canonical_url: Option<String>,
    pub body_html: Option<String>,
    pub post_date: Option<String>,
    pub published_at: Option<String>,
}

impl PostMeta {
    fn id_segment(&self) -> Option<String> {
        match self.id.as_ref()? {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    fn date_raw(&self) -> &str {
        [&self.post_date, &self.published_at]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|raw| !raw.is_empty())
            .unwrap_or("")
    }

    fn embedded_body(&self) -> Option<&str> {
        self.body_html.as_deref().filter(|body| !body.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct PostDetail {
    #[serde(default)]
    body_html: Option<String>,
}

/// Markup-based source: an offset-paginated listing API plus per-post bodies.
pub struct PublicationFetcher {
    base_url: String,
    client: Client,
    extractor: HtmlContentExtractor,
}

impl PublicationFetcher {
    pub fn new(base_url: &str, cookie: Option<&str>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(cookie)?,
            extractor: HtmlContentExtractor::default(),
        })
    }

    pub fn with_extractor(mut self, extractor: HtmlContentExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    pub fn post_url(&self, meta: &PostMeta) -> String {
        match meta.canonical_url.as_deref() {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!(
                "{}/p/{}",
                self.base_url,
                meta.slug.as_deref().unwrap_or_default()
            ),
        }
    }

    /// Pages through the listing until a short or empty page. A failed page
    /// ends the loop and keeps what was already fetched.
    pub fn fetch_post_list(&self, limit: usize) -> Vec<PostMeta> {
        let batch_size = limit.min(MAX_BATCH);
        let mut metas: Vec<PostMeta> = Vec::new();
        if batch_size == 0 {
            return metas;
        }
        let url = self.api_url("/posts");
        let mut offset = 0usize;
        while metas.len() < limit {
            let response = match self
                .client
                .get(&url)
                .query(&[("offset", offset), ("limit", batch_size)])
                .send()
            {
                Ok(response) => response,
                Err(err) => {
                    warn!("Publication API error for {url}: {err}");
                    break;
                }
            };
            let status = response.status();
            if !status.is_success() {
                warn!("Publication API error: {status} for {url} (offset {offset})");
                break;
            }
            let batch: Vec<PostMeta> = match response.json() {
                Ok(batch) => batch,
                Err(err) => {
                    warn!("Publication API returned malformed JSON for {url}: {err}");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            let received = batch.len();
            offset += received;
            metas.extend(batch);
            info!("Fetched {} post metadata entries...", metas.len());
            if received < batch_size {
                break;
            }
        }
        metas.truncate(limit);
        metas
    }

    /// Body markup: embedded on the listing record, then the per-post API,
    /// then the scraped public page.
    fn fetch_body(&self, meta: &PostMeta, post_url: &str) -> String {
        if let Some(body) = meta.embedded_body() {
            return body.to_string();
        }
        if let Some(id) = meta.id_segment() {
            if let Some(body) = self.fetch_detail_body(&id) {
                return body;
            }
        }
        match self.fetch_page(post_url) {
            Ok(page) => page_body(&page).to_string(),
            Err(err) => {
                warn!(
                    "Warning: Could not fetch post {}: {err}",
                    meta.slug.as_deref().unwrap_or(post_url)
                );
                String::new()
            }
        }
    }

    fn fetch_detail_body(&self, id: &str) -> Option<String> {
        let url = self.api_url(&format!("/posts/{id}"));
        let detail: PostDetail = self
            .client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json::<PostDetail>())
            .map_err(|err| debug!("post detail {url} unavailable: {err}"))
            .ok()?;
        detail.body_html.filter(|body| !body.is_empty())
    }

    fn fetch_page(&self, url: &str) -> Result<String> {
        Ok(self.client.get(url).send()?.error_for_status()?.text()?)
    }

    /// Swaps remote image sources for staged files. Failed downloads drop
    /// the block; with no staging directory every image is dropped.
    fn stage_images(&self, blocks: Vec<ContentBlock>, staging: Option<&Path>) -> Vec<ContentBlock> {
        blocks
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Image(src) => {
                    let dir = staging?;
                    let url = src.to_string_lossy();
                    self.download_image(&url, dir).map(ContentBlock::Image)
                }
                text => Some(text),
            })
            .collect()
    }
}

impl SourceFetcher for PublicationFetcher {
    fn fetch_posts(&self, options: &FetchOptions) -> Result<Vec<Post>> {
        let metas = self.fetch_post_list(options.limit);
        let staging = if options.download_images {
            Some(staging_dir("publication_images_")?)
        } else {
            None
        };

        let mut posts = Vec::new();
        for (i, meta) in metas.iter().enumerate() {
            let title = meta
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            let date = parse_timestamp_or_now(meta.date_raw());
            if !options.contains(date) {
                continue;
            }

            info!("Fetching post {}/{}: {title}", i + 1, metas.len());
            let post_url = self.post_url(meta);
            let body = self.fetch_body(meta, &post_url);
            let blocks = self.extractor.extract(&body);
            let content = self.stage_images(blocks, staging.as_deref());
            debug!(
                "Post '{title}': date={date}, images={}",
                content.iter().filter(|b| b.as_image().is_some()).count()
            );

            posts.push(
                Post::new(title, date)
                    .with_subtitle(meta.subtitle.clone().filter(|s| !s.is_empty()))
                    .with_url(Some(post_url))
                    .with_content(content),
            );
        }

        sort_posts(&mut posts);
        info!("Fetched {} posts total.", posts.len());
        Ok(posts)
    }

    fn download_image(&self, url: &str, staging_dir: &Path) -> Option<PathBuf> {
        download_with(&self.client, url, staging_dir)
    }
}

/// Body region of a scraped public page, or the whole page when the
/// container cannot be found.
pub fn page_body(page: &str) -> &str {
    PAGE_BODY_RE
        .captures(page)
        .and_then(|caps| caps.get(1))
        .map_or(page, |m| m.as_str())
}
