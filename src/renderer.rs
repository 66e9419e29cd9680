use crate::canvas::{Canvas, Document};
use crate::doc_template::DocTemplate;
use crate::error::{PostbookError, Result};
use crate::flowable::{
    Flowable, ImageFlowable, PageMarker, Paragraph, PhotoGridFlowable, Spacer, TextAlign,
    TextStyle, TocEntryFlowable,
};
use crate::font::BuiltinFont;
use crate::glyph::{GlyphFallbackRenderer, Inline};
use crate::page_template::{DocContext, PageTemplate, column_rects};
use crate::pdf;
use crate::photo::{PhotoLayoutEngine, SizedImage, fit};
use crate::post::{ContentBlock, Post};
use crate::toc::{PageTracker, display_page, toc_page_offset};
use crate::types::{Color, Margins, PaperSize, Pt, Size};
use chrono::{Local, NaiveDate};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

pub const TEMPLATE_SINGLE: &str = "single";
pub const TEMPLATE_TOC: &str = "toc";
pub const TEMPLATE_BODY: &str = "body";

const MAX_COLUMNS: usize = 3;

static PARAGRAPH_BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\n+").expect("paragraph break pattern is valid"));

/// Where post images end up in the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhotoCollation {
    /// Each image where it appears in the post.
    #[default]
    Inline,
    /// Tiled together after the post's text.
    PerPost,
    /// Collected into a gallery section after the last post.
    End,
}

impl PhotoCollation {
    pub fn as_str(self) -> &'static str {
        match self {
            PhotoCollation::Inline => "inline",
            PhotoCollation::PerPost => "per-post",
            PhotoCollation::End => "end",
        }
    }
}

impl fmt::Display for PhotoCollation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhotoCollation {
    type Err = PostbookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(PhotoCollation::Inline),
            "per-post" => Ok(PhotoCollation::PerPost),
            "end" => Ok(PhotoCollation::End),
            other => Err(PostbookError::InvalidConfiguration(format!(
                "unknown photo collation '{other}' (expected inline, per-post or end)"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct RenderConfig {
    pub title: String,
    pub paper: PaperSize,
    pub columns: usize,
    pub toc_columns: usize,
    pub collation: PhotoCollation,
    pub margin: Pt,
    pub gutter: Pt,
    /// Date printed on the title page. Defaults to today.
    pub generated_on: Option<NaiveDate>,
    pub glyphs: Arc<GlyphFallbackRenderer>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            title: "My Posts".to_string(),
            paper: PaperSize::Letter,
            columns: 1,
            toc_columns: 1,
            collation: PhotoCollation::Inline,
            margin: Pt::inches(0.75),
            gutter: Pt::inches(0.25),
            generated_on: None,
            glyphs: Arc::new(GlyphFallbackRenderer::disabled()),
        }
    }
}

impl RenderConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_paper(mut self, paper: PaperSize) -> Self {
        self.paper = paper;
        self
    }

    pub fn with_columns(mut self, columns: usize) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_toc_columns(mut self, toc_columns: usize) -> Self {
        self.toc_columns = toc_columns;
        self
    }

    pub fn with_collation(mut self, collation: PhotoCollation) -> Self {
        self.collation = collation;
        self
    }

    pub fn with_generated_on(mut self, date: Option<NaiveDate>) -> Self {
        self.generated_on = date;
        self
    }

    pub fn with_glyphs(mut self, glyphs: Arc<GlyphFallbackRenderer>) -> Self {
        self.glyphs = glyphs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("columns", self.columns), ("toc columns", self.toc_columns)] {
            if !(1..=MAX_COLUMNS).contains(&value) {
                return Err(PostbookError::InvalidConfiguration(format!(
                    "{name} must be between 1 and {MAX_COLUMNS}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Paragraph styles of the book.
#[derive(Debug, Clone)]
struct BookStyles {
    book_title: TextStyle,
    book_subtitle: TextStyle,
    chapter_title: TextStyle,
    chapter_date: TextStyle,
    body: TextStyle,
    toc_entry: TextStyle,
    toc_heading: TextStyle,
    gallery_caption: TextStyle,
}

impl Default for BookStyles {
    fn default() -> Self {
        use BuiltinFont::{Helvetica, HelveticaBold};
        Self {
            book_title: TextStyle::new(HelveticaBold, 28.0, 34.0)
                .with_align(TextAlign::Center)
                .with_space_after(20.0),
            book_subtitle: TextStyle::new(Helvetica, 14.0, 18.0)
                .with_color(Color::from_hex(0x666666))
                .with_align(TextAlign::Center)
                .with_space_after(12.0),
            chapter_title: TextStyle::new(HelveticaBold, 18.0, 22.0).with_space_after(6.0),
            chapter_date: TextStyle::new(Helvetica, 10.0, 14.0)
                .with_color(Color::from_hex(0x888888))
                .with_space_after(12.0),
            body: TextStyle::new(Helvetica, 11.0, 15.0).with_space_after(8.0),
            toc_entry: TextStyle::new(Helvetica, 11.0, 16.0),
            toc_heading: TextStyle::new(HelveticaBold, 20.0, 24.0)
                .with_align(TextAlign::Center)
                .with_space_after(20.0),
            gallery_caption: TextStyle::new(Helvetica, 10.0, 14.0)
                .with_color(Color::from_hex(0x666666))
                .with_space_before(12.0)
                .with_space_after(4.0),
        }
    }
}

/// Which pass a story is assembled for. Only the final pass carries a TOC.
enum Pass<'a> {
    Discovery,
    Final { discovered: &'a PageTracker },
}

/// Images one post contributes to the gallery section.
struct GalleryGroup {
    caption: String,
    images: Vec<PathBuf>,
}

/// Lays out posts as a paginated book: title page, table of contents, one
/// chapter per post and an optional photo gallery.
///
/// Rendering runs twice. The discovery pass lays the book out without a TOC
/// to learn the page each post starts on; the final pass adds the TOC with
/// those pages shifted by the estimated TOC length.
pub struct BookRenderer {
    config: RenderConfig,
    styles: BookStyles,
    photos: PhotoLayoutEngine,
}

impl BookRenderer {
    pub fn new(config: RenderConfig) -> Result<Self> {
        config.validate()?;
        let renderer = Self {
            config,
            styles: BookStyles::default(),
            photos: PhotoLayoutEngine::default(),
        };
        let size = renderer.page_size();
        debug!(
            "Paper size: {} ({:.1}x{:.1})",
            renderer.config.paper,
            size.width.to_f32(),
            size.height.to_f32()
        );
        debug!(
            "Columns: {}, TOC columns: {}, body col width: {:.1}",
            renderer.config.columns,
            renderer.config.toc_columns,
            renderer.body_column_width().to_f32()
        );
        if renderer.config.collation != PhotoCollation::Inline {
            debug!("Photo collation: {}", renderer.config.collation);
        }
        Ok(renderer)
    }

    fn page_size(&self) -> Size {
        self.config.paper.size()
    }

    fn margins(&self) -> Margins {
        Margins::all(self.config.margin)
    }

    fn usable_width(&self) -> Pt {
        self.page_size().width - self.config.margin * 2
    }

    fn usable_height(&self) -> Pt {
        self.page_size().height - self.config.margin * 2
    }

    fn body_column_width(&self) -> Pt {
        column_rects(
            self.page_size(),
            self.margins(),
            self.config.columns,
            self.config.gutter,
        )
        .first()
        .map_or_else(|| self.usable_width(), |rect| rect.width)
    }

    fn page_templates(&self) -> Vec<PageTemplate> {
        let size = self.page_size();
        [
            (TEMPLATE_SINGLE, 1),
            (TEMPLATE_TOC, self.config.toc_columns),
            (TEMPLATE_BODY, self.config.columns),
        ]
        .into_iter()
        .map(|(name, columns)| {
            PageTemplate::with_columns(name, size, self.margins(), columns, self.config.gutter)
                .set_on_page(draw_page_number)
        })
        .collect()
    }

    /// Renders `posts` (expected in ascending date order) and writes the PDF.
    /// An empty list writes nothing.
    pub fn render(&self, posts: &[Post], output: &Path) -> Result<()> {
        let Some(document) = self.render_document(posts)? else {
            info!("No posts to render.");
            return Ok(());
        };
        pdf::write_pdf(&document, &self.config.title, output)?;
        info!("PDF saved to {}", output.display());
        Ok(())
    }

    /// Runs both layout passes and returns the final page list.
    pub fn render_document(&self, posts: &[Post]) -> Result<Option<Document>> {
        if posts.is_empty() {
            return Ok(None);
        }
        debug!("Starting render: {} posts", posts.len());
        let generated_on = self
            .config
            .generated_on
            .unwrap_or_else(|| Local::now().date_naive());

        debug!("Building pass 1 (page count)...");
        let mut discovered = PageTracker::new();
        self.build_story(posts, generated_on, Pass::Discovery)?
            .build(&mut discovered)?;
        debug!(
            "Pass 1 complete. Post pages: {:?}",
            (0..posts.len()).map(|i| discovered.page_of(i)).collect::<Vec<_>>()
        );

        debug!("Building pass 2 (final PDF)...");
        let mut placed = PageTracker::new();
        let document = self
            .build_story(posts, generated_on, Pass::Final { discovered: &discovered })?
            .build(&mut placed)?;
        for index in 0..posts.len() {
            let shown = display_page(&discovered, index, posts.len());
            let actual = placed.page_of(index);
            if shown != actual {
                debug!("TOC entry {index} shows page {shown:?}, post starts on {actual:?}");
            }
        }
        Ok(Some(document))
    }

    fn build_story(&self, posts: &[Post], generated_on: NaiveDate, pass: Pass<'_>) -> Result<DocTemplate> {
        let mut doc = DocTemplate::new(self.page_templates());
        self.add_title_page(&mut doc, posts, generated_on);

        if let Pass::Final { discovered } = pass {
            self.add_toc(&mut doc, posts, discovered);
        }

        doc.next_template(TEMPLATE_BODY);
        let mut gallery = Vec::new();
        for (index, post) in posts.iter().enumerate() {
            doc.add_flowable(Box::new(PageMarker::new(index)));
            for flowable in self.chapter(post, index, &mut gallery) {
                doc.add_flowable(flowable);
            }
            doc.page_break();
        }

        if !gallery.is_empty() {
            self.add_gallery(&mut doc, &gallery);
        }
        debug!("story holds {} items", doc.story_len());
        Ok(doc)
    }

    fn paragraph(&self, text: &str, style: &TextStyle) -> Paragraph {
        Paragraph::from_inlines(self.config.glyphs.process(text)).with_style(style.clone())
    }

    fn add_title_page(&self, doc: &mut DocTemplate, posts: &[Post], generated_on: NaiveDate) {
        let subtitle = &self.styles.book_subtitle;
        doc.add_flowable(Box::new(Spacer::new_pt(Pt::inches(2.0))));
        doc.add_flowable(Box::new(self.paragraph(&self.config.title, &self.styles.book_title)));
        doc.add_flowable(Box::new(Spacer::new_pt(Pt::inches(0.3))));

        if let (Some(first), Some(last)) = (posts.first(), posts.last()) {
            let range = format!(
                "{} \u{2013} {}",
                first.date.format("%B %Y"),
                last.date.format("%B %Y")
            );
            doc.add_flowable(Box::new(Paragraph::new(range).with_style(subtitle.clone())));
            doc.add_flowable(Box::new(Spacer::new_pt(Pt::inches(0.2))));
            doc.add_flowable(Box::new(
                Paragraph::new(format!("{} posts", posts.len())).with_style(subtitle.clone()),
            ));
        }

        doc.add_flowable(Box::new(Spacer::new_pt(Pt::inches(1.0))));
        doc.add_flowable(Box::new(
            Paragraph::new(format!("Generated {}", generated_on.format("%Y-%m-%d")))
                .with_style(subtitle.clone()),
        ));
        doc.page_break();
    }

    fn add_toc(&self, doc: &mut DocTemplate, posts: &[Post], discovered: &PageTracker) {
        debug!(
            "TOC: {} entries, estimated {} TOC pages",
            posts.len(),
            toc_page_offset(posts.len())
        );
        doc.next_template(TEMPLATE_TOC);
        doc.add_flowable(Box::new(
            Paragraph::new("Table of Contents").with_style(self.styles.toc_heading.clone()),
        ));

        let entry_style = self.styles.toc_entry.clone();
        for (index, post) in posts.iter().enumerate() {
            let page_label = display_page(discovered, index, posts.len())
                .map_or_else(|| "?".to_string(), |page| page.to_string());
            let entry = self
                .paragraph(&post.title, &entry_style.clone().with_color(Color::LINK_BLUE))
                .with_colored(
                    vec![Inline::Text(format!(" ({})", post.date.format("%Y-%m-%d")))],
                    Color::from_hex(0x888888),
                )
                .with_link(anchor_name(index));
            doc.add_flowable(Box::new(TocEntryFlowable::new(
                entry,
                Paragraph::new(page_label).with_style(entry_style.clone()),
                Pt::inches(0.6),
            )));
        }
        doc.page_break();
    }

    fn chapter(&self, post: &Post, index: usize, gallery: &mut Vec<GalleryGroup>) -> Vec<Box<dyn Flowable>> {
        let mut out: Vec<Box<dyn Flowable>> = Vec::new();
        out.push(Box::new(
            self.paragraph(&post.title, &self.styles.chapter_title)
                .with_anchor(anchor_name(index)),
        ));

        let mut date_line = post.date.format("%B %d, %Y").to_string();
        if let Some(subtitle) = post.subtitle.as_deref().filter(|s| !s.is_empty()) {
            date_line.push_str(" \u{2014} ");
            date_line.push_str(subtitle);
        }
        out.push(Box::new(self.paragraph(&date_line, &self.styles.chapter_date)));

        let mut deferred = Vec::new();
        for block in &post.content {
            match block {
                ContentBlock::Text(text) => {
                    for para in PARAGRAPH_BREAK_RE.split(text.trim()) {
                        let para = para.trim();
                        if !para.is_empty() {
                            out.push(Box::new(self.paragraph(para, &self.styles.body)));
                        }
                    }
                }
                ContentBlock::Image(path) => match self.config.collation {
                    PhotoCollation::Inline => out.extend(self.inline_image(path)),
                    PhotoCollation::PerPost | PhotoCollation::End => deferred.push(path.clone()),
                },
            }
        }

        if deferred.is_empty() {
            return out;
        }
        match self.config.collation {
            PhotoCollation::End => gallery.push(GalleryGroup {
                caption: post.title.clone(),
                images: deferred,
            }),
            _ => out.extend(self.photo_tile(&deferred, self.body_column_width())),
        }
        out
    }

    fn inline_image(&self, path: &Path) -> Vec<Box<dyn Flowable>> {
        let Some(image) = SizedImage::probe(path) else {
            return Vec::new();
        };
        let (width, height) = fit(
            image.width_px,
            image.height_px,
            self.body_column_width(),
            Pt::inches(4.0),
        );
        padded(Box::new(ImageFlowable::new_pt(width, height, image.path)))
    }

    fn photo_tile(&self, paths: &[PathBuf], max_width: Pt) -> Vec<Box<dyn Flowable>> {
        self.photos
            .layout(paths, max_width, self.usable_height())
            .map(|layout| padded(Box::new(PhotoGridFlowable::new(layout))))
            .unwrap_or_default()
    }

    fn add_gallery(&self, doc: &mut DocTemplate, gallery: &[GalleryGroup]) {
        doc.next_template(TEMPLATE_SINGLE);
        doc.page_break();
        doc.add_flowable(Box::new(
            Paragraph::new("Photo Gallery").with_style(self.styles.toc_heading.clone()),
        ));
        doc.add_flowable(Box::new(Spacer::new_pt(Pt::inches(0.3))));
        for group in gallery {
            doc.add_flowable(Box::new(Spacer::new_pt(Pt::inches(0.2))));
            doc.add_flowable(Box::new(
                self.paragraph(&group.caption, &self.styles.gallery_caption),
            ));
            for flowable in self.photo_tile(&group.images, self.usable_width()) {
                doc.add_flowable(flowable);
            }
        }
    }
}

pub fn anchor_name(index: usize) -> String {
    format!("post_{index}")
}

fn padded(content: Box<dyn Flowable>) -> Vec<Box<dyn Flowable>> {
    vec![
        Box::new(Spacer::new_pt(Pt::inches(0.15))),
        content,
        Box::new(Spacer::new_pt(Pt::inches(0.15))),
    ]
}

/// Centred "- N -" footer, half an inch above the bottom edge.
fn draw_page_number(canvas: &mut Canvas, ctx: &DocContext) {
    let font = BuiltinFont::Helvetica;
    let size = Pt::from_f32(9.0);
    let text = format!("- {} -", ctx.page_number);
    let width = font.measure(size, &text);
    canvas.save_state();
    canvas.set_font(font);
    canvas.set_font_size(size);
    canvas.set_fill_color(Color::BLACK);
    canvas.draw_string(
        (ctx.page_size.width - width).mul_ratio(1, 2),
        ctx.page_size.height - Pt::inches(0.5),
        text,
    );
    canvas.restore_state();
}
