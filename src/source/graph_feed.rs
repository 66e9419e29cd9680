use super::{FetchOptions, SourceFetcher, download_with, http_client, parse_timestamp_or_now, staging_dir};
use crate::error::{PostbookError, Result};
use crate::post::{ContentBlock, Post, sort_posts};
use chrono::{Duration, NaiveDateTime};
use log::{debug, info, warn};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const GRAPH_API_BASE: &str = "https://graph.facebook.com/v22.0/me/posts";

pub const FIELDS: &[&str] = &[
    "message",
    "created_time",
    "backdated_time",
    "is_hidden",
    "full_picture",
    "attachments{media,type,subattachments{media,type}}",
];

const MAX_PAGE: usize = 100;
const TITLE_MAX_CHARS: usize = 100;
const TITLE_MIN_CHARS: usize = 30;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawPost {
    pub message: Option<String>,
    pub created_time: Option<String>,
    pub backdated_time: Option<String>,
    pub is_hidden: bool,
    pub full_picture: Option<String>,
    pub attachments: Option<AttachmentList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AttachmentList {
    pub data: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Attachment {
    pub media: Option<Media>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub subattachments: Option<AttachmentList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Media {
    pub image: Option<MediaImage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MediaImage {
    pub src: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeedPage {
    data: Vec<RawPost>,
    paging: Option<Paging>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Paging {
    next: Option<String>,
}

impl Attachment {
    fn image_src(&self) -> Option<&str> {
        self.media.as_ref()?.image.as_ref()?.src.as_deref()
    }
}

impl RawPost {
    fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    fn is_backdated(&self) -> bool {
        self.backdated_time.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// The intended date when one was set, otherwise the creation date.
    pub fn effective_date(&self) -> NaiveDateTime {
        let raw = if self.is_backdated() {
            self.backdated_time.as_deref()
        } else {
            self.created_time.as_deref()
        };
        parse_timestamp_or_now(raw.unwrap_or(""))
    }

    /// Image URLs in attachment order. Multi-image posts use their
    /// sub-attachments; the summary picture is used only when no attachment
    /// carries an image, since it usually duplicates the first one.
    pub fn image_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        for attachment in self.attachments.iter().flat_map(|list| &list.data) {
            let subs = attachment
                .subattachments
                .as_ref()
                .map(|list| list.data.as_slice())
                .unwrap_or_default();
            if subs.is_empty() {
                push_unique(&mut urls, attachment.image_src());
            } else {
                for sub in subs {
                    push_unique(&mut urls, sub.image_src());
                }
            }
        }
        if urls.is_empty() {
            push_unique(&mut urls, self.full_picture.as_deref());
        }
        urls
    }
}

fn push_unique(urls: &mut Vec<String>, src: Option<&str>) {
    if let Some(src) = src.filter(|s| !s.is_empty()) {
        if !urls.iter().any(|u| u == src) {
            urls.push(src.to_string());
        }
    }
}

/// Feed-API source paginated by the cursor URLs the API returns.
///
/// The API filters `since`/`until` on creation time, so the server-side
/// window is widened by the search margins and the requested bounds are
/// applied here against each post's effective date.
pub struct GraphFeedFetcher {
    token: String,
    client: Client,
    api_base: String,
    search_start_days: i64,
    search_end_days: i64,
}

impl GraphFeedFetcher {
    pub fn new(token: &str) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(PostbookError::InvalidConfiguration(
                "graph access token required: set GRAPH_ACCESS_TOKEN or pass --graph-token"
                    .to_string(),
            ));
        }
        Ok(Self {
            token: token.to_string(),
            client: http_client(None)?,
            api_base: GRAPH_API_BASE.to_string(),
            search_start_days: 90,
            search_end_days: 90,
        })
    }

    /// Days added before `since` and after `until` in the server query.
    pub fn with_search_margins(mut self, start_days: i64, end_days: i64) -> Self {
        self.search_start_days = start_days;
        self.search_end_days = end_days;
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn base_params(&self, options: &FetchOptions) -> Vec<(String, String)> {
        let mut params = vec![
            ("access_token".to_string(), self.token.clone()),
            (
                "limit".to_string(),
                options.limit.clamp(1, MAX_PAGE).to_string(),
            ),
            ("include_hidden".to_string(), "true".to_string()),
            ("fields".to_string(), FIELDS.join(",")),
        ];
        let (since, until) = query_window(
            options.since,
            options.until,
            self.search_start_days,
            self.search_end_days,
        );
        if let Some(since) = since {
            params.push(("since".to_string(), since.to_string()));
        }
        if let Some(until) = until {
            params.push(("until".to_string(), until.to_string()));
        }
        params
    }

    /// Follows `paging.next` until it runs out. Errors end the loop and keep
    /// the posts gathered so far.
    pub fn fetch_raw_posts(&self, options: &FetchOptions) -> Vec<RawPost> {
        let base = self.base_params(options);
        let mut raw_posts = Vec::new();
        let mut next = Some(self.api_base.clone());
        while let Some(url) = next.take() {
            let request_url = match page_request(&base, &url) {
                Ok(request_url) => request_url,
                Err(err) => {
                    warn!("Graph API cursor rejected: {err}");
                    break;
                }
            };
            let response = match self.client.get(request_url).send() {
                Ok(response) => response,
                Err(err) => {
                    warn!("Graph API request failed: {err}");
                    break;
                }
            };
            let status = response.status();
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                warn!("Graph API error: {status} {body}");
                break;
            }
            let page: FeedPage = match response.json() {
                Ok(page) => page,
                Err(err) => {
                    warn!("Graph API returned malformed JSON: {err}");
                    break;
                }
            };
            raw_posts.extend(page.data);
            next = page.paging.and_then(|paging| paging.next);
            info!("Fetched {} feed posts so far...", raw_posts.len());
        }
        raw_posts
    }

    fn build_post(&self, raw: &RawPost, date: NaiveDateTime, staging: Option<&Path>) -> Post {
        let message = raw.message();
        let title = derive_title(message, date);
        let mut content = Vec::new();
        if let Some(dir) = staging {
            for url in raw.image_urls() {
                if let Some(path) = self.download_image(&url, dir) {
                    content.push(ContentBlock::Image(path));
                }
            }
        }
        let images = content.len();
        if !message.is_empty() {
            content.push(ContentBlock::text(message));
        }
        debug!("Post '{title}': date={date}, images={images}");
        Post::new(title, date).with_content(content)
    }
}

impl SourceFetcher for GraphFeedFetcher {
    fn fetch_posts(&self, options: &FetchOptions) -> Result<Vec<Post>> {
        let raw_posts = self.fetch_raw_posts(options);

        let hidden = raw_posts.iter().filter(|raw| raw.is_hidden).count();
        let backdated = raw_posts.iter().filter(|raw| raw.is_backdated()).count();
        if hidden > 0 {
            info!("  Including {hidden} hidden post(s)");
        }
        if backdated > 0 {
            info!("  Found {backdated} backdated post(s)");
        }

        let total = raw_posts.len();
        let mut dated: Vec<(NaiveDateTime, RawPost)> = raw_posts
            .into_iter()
            .map(|raw| (raw.effective_date(), raw))
            .filter(|(date, _)| options.contains(*date))
            .collect();
        let skipped = total - dated.len();
        if skipped > 0 {
            debug!("Skipped {skipped} post(s) outside date range (from widened API query)");
        }
        keep_newest(&mut dated, options.limit);

        let staging = if options.download_images {
            Some(staging_dir("graph_feed_images_")?)
        } else {
            None
        };
        let mut posts: Vec<Post> = dated
            .iter()
            .map(|(date, raw)| self.build_post(raw, *date, staging.as_deref()))
            .collect();
        sort_posts(&mut posts);
        info!("Fetched {} feed posts total.", posts.len());
        Ok(posts)
    }

    fn download_image(&self, url: &str, staging_dir: &Path) -> Option<PathBuf> {
        download_with(&self.client, url, staging_dir)
    }
}

/// Server-side `since`/`until` as Unix seconds, widened by the margins.
pub fn query_window(
    since: Option<NaiveDateTime>,
    until: Option<NaiveDateTime>,
    start_days: i64,
    end_days: i64,
) -> (Option<i64>, Option<i64>) {
    (
        since.map(|since| (since - Duration::days(start_days)).and_utc().timestamp()),
        until.map(|until| (until + Duration::days(end_days)).and_utc().timestamp()),
    )
}

/// Builds the request for one page. Parameters embedded in a cursor URL
/// override the base parameters; base parameters it lacks are re-added.
pub fn page_request(base: &[(String, String)], url: &str) -> Result<Url> {
    let mut parsed = Url::parse(url)
        .map_err(|err| PostbookError::InvalidConfiguration(format!("bad page url: {err}")))?;
    let cursor: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
    let mut merged: Vec<(String, String)> = base
        .iter()
        .filter(|(key, _)| !cursor.iter().any(|(k, _)| k == key))
        .cloned()
        .collect();
    merged.extend(cursor);
    parsed.query_pairs_mut().clear().extend_pairs(&merged);
    Ok(parsed)
}

/// Sorts ascending by date and drops the oldest entries beyond `limit`.
fn keep_newest<T>(dated: &mut Vec<(NaiveDateTime, T)>, limit: usize) {
    dated.sort_by_key(|(date, _)| *date);
    let excess = dated.len().saturating_sub(limit);
    dated.drain(..excess);
}

/// Title from the first line of a message, shortened at a sentence end or
/// word boundary when it runs past 100 characters.
pub fn derive_title(message: &str, date: NaiveDateTime) -> String {
    let first_line = message.trim().split('\n').next().unwrap_or("").trim();
    if first_line.is_empty() {
        return format!("Post from {}", date.format("%Y-%m-%d"));
    }
    let chars: Vec<char> = first_line.chars().collect();
    if chars.len() <= TITLE_MAX_CHARS {
        return first_line.to_string();
    }
    for sep in [". ", "! ", "? "] {
        if let Some(idx) = find_chars(&chars, sep, TITLE_MIN_CHARS) {
            if idx <= TITLE_MAX_CHARS {
                return chars[..=idx].iter().collect();
            }
        }
    }
    let head: String = chars[..TITLE_MAX_CHARS].iter().collect();
    let mut title = head
        .rsplit_once(' ')
        .map_or_else(|| head.clone(), |(before, _)| before.to_string());
    if title.chars().count() < TITLE_MIN_CHARS {
        title = head;
    }
    title.push_str("...");
    title
}

/// Char index of the first occurrence of `needle` at or after `from`.
fn find_chars(haystack: &[char], needle: &str, from: usize) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    haystack
        .windows(needle.len())
        .enumerate()
        .skip(from)
        .find(|(_, window)| *window == needle.as_slice())
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_server::{Reply, TestServer};
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("valid date")
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn backdated_post_survives_widened_window() {
        let since = Some(day(2019, 1, 1));
        let until = Some(day(2019, 12, 31));
        let (from, to) = query_window(since, until, 90, 90);
        assert_eq!(from, Some(day(2018, 10, 3).and_utc().timestamp()));
        assert_eq!(to, Some(day(2020, 3, 30).and_utc().timestamp()));

        let raw = RawPost {
            created_time: Some("2024-01-01T10:00:00+0000".to_string()),
            backdated_time: Some("2019-06-01T12:00:00+0000".to_string()),
            message: Some("Summer trip".to_string()),
            ..RawPost::default()
        };
        let options = FetchOptions::default().with_since(since).with_until(until);
        let effective = raw.effective_date();
        assert_eq!(effective.date(), NaiveDate::from_ymd_opt(2019, 6, 1).expect("date"));
        assert!(options.contains(effective));
        let created = parse_timestamp_or_now("2024-01-01T10:00:00+0000");
        assert!(!options.contains(created), "creation date alone would drop it");
    }

    #[test]
    fn cursor_params_override_and_keep_base_params() {
        let base = pairs(&[
            ("access_token", "tok"),
            ("limit", "100"),
            ("fields", "message,created_time"),
            ("since", "1538524800"),
        ]);
        let url = page_request(
            &base,
            "https://graph.example.test/v22.0/me/posts?limit=25&after=QVFI&access_token=tok",
        )
        .expect("page url");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |key: &str| {
            query
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
        };
        assert_eq!(get("limit"), vec!["25"]);
        assert_eq!(get("after"), vec!["QVFI"]);
        assert_eq!(get("access_token"), vec!["tok"]);
        assert_eq!(get("fields"), vec!["message,created_time"]);
        assert_eq!(get("since"), vec!["1538524800"]);
        assert_eq!(url.path(), "/v22.0/me/posts");
    }

    #[test]
    fn base_params_request_hidden_posts_and_fields() {
        let fetcher = GraphFeedFetcher::new("tok").expect("fetcher");
        let options = FetchOptions::default()
            .with_limit(500)
            .with_until(Some(day(2019, 12, 31)));
        let params = fetcher.base_params(&options);
        let value = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(value("limit").as_deref(), Some("100"));
        assert_eq!(value("include_hidden").as_deref(), Some("true"));
        assert!(value("fields").expect("fields").contains("subattachments{media,type}"));
        assert_eq!(value("since"), None);
        assert_eq!(
            value("until"),
            Some(day(2020, 3, 30).and_utc().timestamp().to_string())
        );
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(
            GraphFeedFetcher::new("  "),
            Err(PostbookError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn short_first_lines_become_the_title() {
        let date = day(2021, 5, 4);
        assert_eq!(derive_title("  Hello there\nmore text", date), "Hello there");
        assert_eq!(derive_title("", date), "Post from 2021-05-04");
        assert_eq!(derive_title("\n\n  ", date), "Post from 2021-05-04");
    }

    #[test]
    fn long_titles_break_after_a_sentence() {
        let line = format!("{}. {}", "a".repeat(40), "b ".repeat(60));
        let title = derive_title(&line, day(2021, 1, 1));
        assert_eq!(title, format!("{}.", "a".repeat(40)));

        // A sentence end before char 30 is ignored.
        let early = format!("Hi. {}", "word ".repeat(30));
        let title = derive_title(&early, day(2021, 1, 1));
        assert!(title.ends_with("..."), "{title:?}");
        assert!(title.starts_with("Hi. word"));
    }

    #[test]
    fn long_titles_without_sentences_break_at_a_word() {
        let line = "word ".repeat(30);
        let title = derive_title(&line, day(2021, 1, 1));
        assert_eq!(title, format!("{}...", "word ".repeat(19) + "word"));
        assert!(title.chars().count() <= TITLE_MAX_CHARS + 3);

        let unbroken = format!("{} {}", "x".repeat(10), "y".repeat(120));
        let title = derive_title(&unbroken, day(2021, 1, 1));
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3, "hard cut");
    }

    #[test]
    fn titles_count_characters_not_bytes() {
        let line = "é".repeat(150);
        let title = derive_title(&line, day(2021, 1, 1));
        assert_eq!(title, format!("{}...", "é".repeat(100)));
    }

    #[test]
    fn subattachments_win_over_summary_picture() {
        let json = r#"{
            "message": "Beach day",
            "created_time": "2023-07-01T10:00:00+0000",
            "is_hidden": true,
            "full_picture": "https://cdn.test/one.jpg",
            "attachments": {"data": [
                {"type": "album", "subattachments": {"data": [
                    {"media": {"image": {"src": "https://cdn.test/one.jpg"}}, "type": "photo"},
                    {"media": {"image": {"src": "https://cdn.test/two.jpg"}}, "type": "photo"},
                    {"media": {"image": {"src": "https://cdn.test/one.jpg"}}, "type": "photo"}
                ]}},
                {"type": "photo", "media": {"image": {"src": "https://cdn.test/three.jpg"}}}
            ]}
        }"#;
        let raw: RawPost = serde_json::from_str(json).expect("raw post");
        assert!(raw.is_hidden);
        assert_eq!(
            raw.image_urls(),
            vec![
                "https://cdn.test/one.jpg",
                "https://cdn.test/two.jpg",
                "https://cdn.test/three.jpg",
            ]
        );
    }

    #[test]
    fn summary_picture_is_the_fallback() {
        let raw = RawPost {
            full_picture: Some("https://cdn.test/pic.jpg".to_string()),
            attachments: Some(AttachmentList {
                data: vec![Attachment {
                    kind: Some("share".to_string()),
                    ..Attachment::default()
                }],
            }),
            ..RawPost::default()
        };
        assert_eq!(raw.image_urls(), vec!["https://cdn.test/pic.jpg"]);
        assert!(RawPost::default().image_urls().is_empty());
    }

    #[test]
    fn newest_posts_are_kept_after_filtering() {
        let mut dated = vec![
            (day(2020, 3, 1), "c"),
            (day(2020, 1, 1), "a"),
            (day(2020, 4, 1), "d"),
            (day(2020, 2, 1), "b"),
        ];
        keep_newest(&mut dated, 2);
        let names: Vec<&str> = dated.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["c", "d"]);
    }

    #[test]
    fn images_follow_download_setting_and_lead_the_text() {
        let fetcher = GraphFeedFetcher::new("tok").expect("fetcher");
        let raw = RawPost {
            message: Some("Caption".to_string()),
            full_picture: Some("https://cdn.test/pic.jpg".to_string()),
            ..RawPost::default()
        };
        let post = fetcher.build_post(&raw, day(2022, 2, 2), None);
        assert_eq!(post.content, vec![ContentBlock::text("Caption")]);
        assert_eq!(post.title, "Caption");
        assert_eq!(post.url, None);
    }

    fn feed_post(message: &str, created: &str) -> serde_json::Value {
        serde_json::json!({ "message": message, "created_time": created })
    }

    fn query_of(target: &str) -> Vec<(String, String)> {
        Url::parse(&format!("http://stub.test{target}"))
            .map(|url| url.query_pairs().into_owned().collect())
            .unwrap_or_default()
    }

    fn values(query: &[(String, String)], key: &str) -> Vec<String> {
        query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn two_page_feed(second: Reply) -> TestServer {
        TestServer::start(move |base, target| {
            if target.contains("after=CUR1") {
                return second.clone();
            }
            let page = serde_json::json!({
                "data": [
                    feed_post("One", "2019-03-01T10:00:00+0000"),
                    feed_post("Two", "2019-04-01T10:00:00+0000"),
                ],
                "paging": { "next": format!("{base}/me/posts?after=CUR1&limit=25") },
            });
            Reply::json(page.to_string())
        })
    }

    #[test]
    fn cursor_pages_are_followed_with_merged_params() {
        let last_page = serde_json::json!({
            "data": [feed_post("Three", "2019-05-01T10:00:00+0000")],
        });
        let server = two_page_feed(Reply::json(last_page.to_string()));
        let fetcher = GraphFeedFetcher::new("tok")
            .expect("fetcher")
            .with_api_base(format!("{}/me/posts", server.url()));

        let raw = fetcher.fetch_raw_posts(&FetchOptions::default());
        let messages: Vec<&str> = raw.iter().map(RawPost::message).collect();
        assert_eq!(messages, vec!["One", "Two", "Three"]);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        let first = query_of(&requests[0]);
        assert_eq!(values(&first, "limit"), vec!["50"]);
        assert!(values(&first, "after").is_empty());
        let second = query_of(&requests[1]);
        assert_eq!(values(&second, "after"), vec!["CUR1"]);
        assert_eq!(values(&second, "limit"), vec!["25"], "cursor limit wins");
        assert_eq!(values(&second, "access_token"), vec!["tok"]);
        assert_eq!(values(&second, "include_hidden"), vec!["true"]);
    }

    #[test]
    fn failed_cursor_page_keeps_earlier_posts() {
        for failure in [Reply::status(500), Reply::json("{\"data\": [")] {
            let label = failure.body.clone();
            let server = two_page_feed(failure);
            let fetcher = GraphFeedFetcher::new("tok")
                .expect("fetcher")
                .with_api_base(format!("{}/me/posts", server.url()));
            let raw = fetcher.fetch_raw_posts(&FetchOptions::default());
            assert_eq!(raw.len(), 2, "second page answered {label:?}");
            assert_eq!(server.requests().len(), 2);
        }
    }

    #[test]
    fn fetched_feed_is_filtered_by_effective_date_and_limited() {
        let last_page = serde_json::json!({
            "data": [{
                "message": "Backdated trip",
                "created_time": "2024-01-01T10:00:00+0000",
                "backdated_time": "2019-06-01T12:00:00+0000",
            }],
        });
        let server = two_page_feed(Reply::json(last_page.to_string()));
        let fetcher = GraphFeedFetcher::new("tok")
            .expect("fetcher")
            .with_api_base(format!("{}/me/posts", server.url()));
        let options = FetchOptions::default()
            .with_limit(2)
            .with_since(Some(day(2019, 3, 15)))
            .with_until(Some(day(2019, 12, 31)))
            .with_download_images(false);

        let posts = fetcher.fetch_posts(&options).expect("posts");
        let titles: Vec<&str> = posts.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Two", "Backdated trip"]);
        assert_eq!(posts[1].content, vec![ContentBlock::text("Backdated trip")]);
    }
}
