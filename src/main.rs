use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, ValueEnum};
use log::{debug, info};
use postbook::{
    BookRenderer, FetchOptions, GlyphFallbackRenderer, GraphFeedFetcher, PaperSize,
    PhotoCollation, Post, PublicationFetcher, RasterizerConfig, RenderConfig, SourceFetcher,
    export_photos, load_posts, save_posts,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SourceKind {
    /// Publication listing API plus post pages
    Publication,
    /// Social graph feed of the token's owner
    GraphFeed,
    /// Posts saved earlier with --save-posts
    File,
}

/// Pull posts from a publication or a social feed and typeset them as a PDF book.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Where to pull posts from
    #[arg(long, value_enum)]
    source: SourceKind,

    /// Publication base URL (e.g. https://example.pub.test)
    #[arg(long)]
    publication_url: Option<String>,

    /// Session cookie for subscriber-only publication content
    #[arg(long)]
    publication_cookie: Option<String>,

    /// Graph feed access token
    #[arg(long, env = "GRAPH_ACCESS_TOKEN", hide_env_values = true)]
    graph_token: Option<String>,

    /// Book title (default: derived from the source)
    #[arg(long)]
    title: Option<String>,

    /// Output PDF path
    #[arg(long, default_value = "book.pdf")]
    output: PathBuf,

    /// Start date filter (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    since: Option<NaiveDateTime>,

    /// End date filter (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    until: Option<NaiveDateTime>,

    /// Days before --since to widen the graph feed query, catching backdated posts
    #[arg(long, default_value_t = 90)]
    search_start: i64,

    /// Days after --until to widen the graph feed query, catching backdated posts
    #[arg(long, default_value_t = 90)]
    search_end: i64,

    /// Maximum number of posts to fetch
    #[arg(long, default_value_t = 50)]
    limit: usize,

    /// Skip image downloads
    #[arg(long)]
    no_images: bool,

    /// Paper size: letter, a4, legal, a3, a5 or tabloid
    #[arg(long, default_value = "letter", value_parser = PaperSize::from_str)]
    paper_size: PaperSize,

    /// Columns for post content
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=3))]
    columns: u8,

    /// Columns for the table of contents
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=3))]
    toc_columns: u8,

    /// 'end' gathers photos into a gallery, 'per-post' tiles them after each post's text
    #[arg(long, value_parser = ["end", "per-post"])]
    collate_photos: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Save fetched posts to a file (.json, .yaml, .yml, .csv)
    #[arg(long, value_name = "FILE")]
    save_posts: Option<PathBuf>,

    /// Saved posts file to read with --source file
    #[arg(long, value_name = "PATH")]
    input_file: Option<PathBuf>,

    /// Copy post photos into a directory, named by post date and title
    #[arg(long, value_name = "DIR")]
    save_photos: Option<PathBuf>,
}

fn parse_day(raw: &str) -> Result<NaiveDateTime, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("expected YYYY-MM-DD, got '{raw}'"))
}

/// "https://example.pub.test" becomes "Example".
fn title_from_url(url: &str) -> String {
    let host = url.split("//").last().unwrap_or(url);
    let label = host.split(['.', '/']).next().unwrap_or(host);
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => "Posts".to_string(),
    }
}

fn fetch(cli: &Cli) -> Result<(Vec<Post>, String)> {
    let options = FetchOptions::default()
        .with_limit(cli.limit)
        .with_since(cli.since)
        .with_until(cli.until)
        .with_download_images(!cli.no_images);

    match cli.source {
        SourceKind::File => {
            let Some(path) = &cli.input_file else {
                bail!("--input-file is required when --source is 'file'");
            };
            let posts = load_posts(path)
                .with_context(|| format!("failed to load posts from {}", path.display()))?;
            Ok((posts, "Posts".to_string()))
        }
        SourceKind::Publication => {
            let Some(url) = &cli.publication_url else {
                bail!("--publication-url is required for the publication source");
            };
            let fetcher = PublicationFetcher::new(url, cli.publication_cookie.as_deref())?;
            info!("Fetching posts from {url}...");
            let posts = fetcher.fetch_posts(&options)?;
            Ok((posts, title_from_url(url)))
        }
        SourceKind::GraphFeed => {
            let token = cli.graph_token.as_deref().unwrap_or_default();
            let fetcher = GraphFeedFetcher::new(token)
                .context("a graph feed token is required (--graph-token or GRAPH_ACCESS_TOKEN)")?
                .with_search_margins(cli.search_start, cli.search_end);
            info!("Fetching posts from the graph feed...");
            let posts = fetcher.fetch_posts(&options)?;
            Ok((posts, "Graph Feed Memories".to_string()))
        }
    }
}

fn try_main(cli: Cli) -> Result<()> {
    debug!("Source: {:?}", cli.source);
    debug!(
        "Paper size: {}, Columns: {}, TOC columns: {}",
        cli.paper_size, cli.columns, cli.toc_columns
    );

    let (posts, default_title) = fetch(&cli)?;
    if posts.is_empty() {
        info!("No posts found matching the criteria.");
        return Ok(());
    }

    if let Some(path) = &cli.save_posts {
        save_posts(&posts, path)
            .with_context(|| format!("failed to save posts to {}", path.display()))?;
    }
    if let Some(dir) = &cli.save_photos {
        export_photos(&posts, dir)
            .with_context(|| format!("failed to save photos to {}", dir.display()))?;
    }

    let collation = cli
        .collate_photos
        .as_deref()
        .map(PhotoCollation::from_str)
        .transpose()?
        .unwrap_or_default();
    let config = RenderConfig::default()
        .with_title(cli.title.clone().unwrap_or(default_title))
        .with_paper(cli.paper_size)
        .with_columns(cli.columns.into())
        .with_toc_columns(cli.toc_columns.into())
        .with_collation(collation)
        .with_glyphs(Arc::new(GlyphFallbackRenderer::new(&RasterizerConfig::default())));

    info!("Rendering {} posts to PDF...", posts.len());
    BookRenderer::new(config)?
        .render(&posts, &cli.output)
        .with_context(|| format!("failed to render {}", cli.output.display()))?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    if let Err(err) = try_main(cli) {
        eprintln!("Error: {err:#}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publication_host_becomes_default_title() {
        assert_eq!(title_from_url("https://example.pub.test"), "Example");
        assert_eq!(title_from_url("https://WRITER.example.com/"), "Writer");
        assert_eq!(title_from_url("plainname"), "Plainname");
    }

    #[test]
    fn day_arguments_parse_to_midnight() {
        let day = parse_day("2019-01-01").expect("date");
        assert_eq!(day.to_string(), "2019-01-01 00:00:00");
        assert!(parse_day("01/01/2019").is_err());
    }

    #[test]
    fn cli_accepts_the_documented_flags() {
        let cli = Cli::try_parse_from([
            "postbook",
            "--source",
            "graph-feed",
            "--graph-token",
            "t",
            "--since",
            "2019-01-01",
            "--columns",
            "2",
            "--paper-size",
            "a4",
            "--collate-photos",
            "per-post",
        ])
        .expect("parse");
        assert_eq!(cli.source, SourceKind::GraphFeed);
        assert_eq!(cli.columns, 2);
        assert_eq!(cli.paper_size, PaperSize::A4);
        assert_eq!(cli.limit, 50);
        assert!(Cli::try_parse_from(["postbook", "--source", "file", "--columns", "4"]).is_err());
    }
}
