//! Saving fetched posts for later runs, and copying their photos out.

use crate::error::{PostbookError, Result};
use crate::post::{Post, sort_posts};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

const MAX_SLUG_CHARS: usize = 80;
const ISO_DATETIME: &str = "%Y-%m-%dT%H:%M:%S%.f";

static NON_SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^a-z0-9]+").expect("slug pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
    Csv,
}

impl Format {
    fn of(path: &Path) -> Result<Format> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(Format::Json),
            "yaml" | "yml" => Ok(Format::Yaml),
            "csv" => Ok(Format::Csv),
            _ => Err(PostbookError::UnsupportedFormat(format!(".{ext}"))),
        }
    }
}

/// Writes posts as `.json`, `.yaml`/`.yml`, or a flattened `.csv` that keeps
/// only the concatenated text.
pub fn save_posts(posts: &[Post], path: &Path) -> Result<()> {
    let format = Format::of(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut writer, posts)?;
            writer.write_all(b"\n")?;
        }
        Format::Yaml => serde_yaml::to_writer(&mut writer, posts)?,
        Format::Csv => write_csv(posts, &mut writer)?,
    }
    writer.flush()?;
    info!("Saved {} posts to {}", posts.len(), path.display());
    Ok(())
}

fn write_csv<W: Write>(posts: &[Post], out: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(out);
    csv.write_record(["title", "date", "subtitle", "url", "text"])?;
    for post in posts {
        let text = post.texts().collect::<Vec<_>>().join("\n\n");
        let date = post.date.format(ISO_DATETIME).to_string();
        csv.write_record([
            post.title.as_str(),
            date.as_str(),
            post.subtitle.as_deref().unwrap_or(""),
            post.url.as_deref().unwrap_or(""),
            text.as_str(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Reads a `.json` or `.yaml`/`.yml` file written by [`save_posts`]. The
/// result is sorted by date.
pub fn load_posts(path: &Path) -> Result<Vec<Post>> {
    let mut posts: Vec<Post> = match Format::of(path)? {
        Format::Json => serde_json::from_reader(BufReader::new(File::open(path)?))?,
        Format::Yaml => serde_yaml::from_reader(BufReader::new(File::open(path)?))?,
        Format::Csv => return Err(PostbookError::UnsupportedFormat(".csv".to_string())),
    };
    sort_posts(&mut posts);
    info!("Loaded {} posts from {}", posts.len(), path.display());
    Ok(posts)
}

/// Title reduced to lowercase ASCII words joined by hyphens. Styled letter
/// variants are decomposed to their plain forms first; anything else outside
/// `a-z0-9` is dropped, not transliterated.
pub fn title_slug(title: &str) -> String {
    let normalized: String = title.nfkd().collect::<String>().to_lowercase();
    NON_SLUG_RE
        .replace_all(&normalized, "-")
        .trim_matches('-')
        .chars()
        .take(MAX_SLUG_CHARS)
        .collect()
}

/// Export file name for image `index` (1-based) of a post with `count` images.
pub fn photo_file_name(post: &Post, source: &Path, index: usize, count: usize) -> String {
    let date = post.date.format("%Y-%m-%d");
    let slug = title_slug(&post.title);
    let ext = source
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or_else(|| ".jpg".to_string(), |ext| format!(".{ext}"));
    if count > 1 {
        format!("{date}_{slug}_{index}{ext}")
    } else {
        format!("{date}_{slug}{ext}")
    }
}

/// Copies every post image into `dir`, named by post date and title.
/// Returns the copied paths.
pub fn export_photos(posts: &[Post], dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for post in posts {
        let images: Vec<&Path> = post.images().collect();
        for (i, source) in images.iter().enumerate() {
            let dest = dir.join(photo_file_name(post, source, i + 1, images.len()));
            fs::copy(source, &dest)?;
            written.push(dest);
        }
    }
    info!("Saved {} photo(s) to {}", written.len(), dir.display());
    Ok(written)
}
