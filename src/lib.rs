mod canvas;
mod doc_template;
mod error;
mod extract;
mod flowable;
mod font;
mod frame;
mod glyph;
mod page_template;
mod pdf;
mod photo;
mod post;
mod renderer;
pub mod source;
mod store;
mod toc;
mod types;

pub use canvas::{Canvas, Command, Document, Page};
pub use doc_template::{DocTemplate, META_PAGE_TEMPLATE_KEY, StoryItem};
pub use error::{PostbookError, Result};
pub use extract::{FooterRule, HtmlContentExtractor};
pub use flowable::{
    Flowable, ImageFlowable, KeepTogether, PageMarker, Paragraph, PhotoGridFlowable, Spacer,
    TextAlign, TextStyle, TocEntryFlowable,
};
pub use font::BuiltinFont;
pub use frame::{AddResult, Frame};
pub use glyph::{GlyphFallbackRenderer, GlyphRasterizer, HelperRasterizer, Inline, RasterizerConfig};
pub use page_template::{DocContext, OnPageCallback, PageTemplate};
pub use pdf::{document_to_pdf, page_strings, write_pdf};
pub use photo::{ImagePlacement, PhotoLayout, PhotoLayoutEngine, PhotoRow, SizedImage, fit};
pub use post::{ContentBlock, Post, sort_posts};
pub use renderer::{BookRenderer, PhotoCollation, RenderConfig};
pub use source::{FetchOptions, GraphFeedFetcher, PublicationFetcher, SourceFetcher};
pub use store::{export_photos, load_posts, photo_file_name, save_posts, title_slug};
pub use toc::{ENTRIES_PER_PAGE, PageTracker, display_page, toc_page_offset};
pub use types::{Color, Margins, PaperSize, Pt, Rect, Size};
