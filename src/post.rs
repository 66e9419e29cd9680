use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One unit of post content. Order inside [`Post::content`] is reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ContentBlock {
    Text(String),
    /// Path of a staged local image file.
    Image(PathBuf),
}

impl ContentBlock {
    pub fn text(value: impl Into<String>) -> Self {
        ContentBlock::Text(value.into())
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        ContentBlock::Image(path.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(value) => Some(value),
            ContentBlock::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&Path> {
        match self {
            ContentBlock::Image(path) => Some(path),
            ContentBlock::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub title: String,
    /// Naive local timestamp; sources drop any offset after parsing.
    pub date: NaiveDateTime,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl Post {
    pub fn new(title: impl Into<String>, date: NaiveDateTime) -> Self {
        Self {
            title: title.into(),
            date,
            subtitle: None,
            url: None,
            content: Vec::new(),
        }
    }

    pub fn with_subtitle(mut self, subtitle: Option<String>) -> Self {
        self.subtitle = subtitle;
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn with_content(mut self, content: Vec<ContentBlock>) -> Self {
        self.content = content;
        self
    }

    pub fn images(&self) -> impl Iterator<Item = &Path> {
        self.content.iter().filter_map(ContentBlock::as_image)
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(ContentBlock::as_text)
    }
}

/// Stable ascending sort by date; posts sharing a date keep their input order.
pub fn sort_posts(posts: &mut [Post]) {
    posts.sort_by_key(|post| post.date);
}
