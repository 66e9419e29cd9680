use crate::canvas::{Canvas, Document};
use crate::error::{PostbookError, Result};
use crate::flowable::Flowable;
use crate::frame::{AddResult, Frame};
use crate::page_template::{DocContext, PageTemplate};
use crate::toc::PageTracker;
use log::debug;

/// Page meta key naming the template a page was laid out with.
pub const META_PAGE_TEMPLATE_KEY: &str = "page_template";

pub enum StoryItem {
    Flowable(Box<dyn Flowable>),
    /// Template used from the next page that starts.
    NextTemplate(String),
    /// Ends the current page. A page with nothing placed yet is left open.
    PageBreak,
}

struct OpenPage {
    frames: Vec<Frame>,
    frame_index: usize,
    placed: bool,
}

/// Paginates a story of flowables through named page templates.
///
/// Pages start lazily, when the first flowable after a break needs one, so a
/// template switch followed by a break always lands on a fresh page.
pub struct DocTemplate {
    page_templates: Vec<PageTemplate>,
    story: Vec<StoryItem>,
}

impl DocTemplate {
    pub fn new(page_templates: Vec<PageTemplate>) -> Self {
        Self {
            page_templates,
            story: Vec::new(),
        }
    }

    pub fn add_flowable(&mut self, flowable: Box<dyn Flowable>) {
        self.story.push(StoryItem::Flowable(flowable));
    }

    pub fn next_template(&mut self, name: impl Into<String>) {
        self.story.push(StoryItem::NextTemplate(name.into()));
    }

    pub fn page_break(&mut self) {
        self.story.push(StoryItem::PageBreak);
    }

    pub fn story_len(&self) -> usize {
        self.story.len()
    }

    fn template_index(&self, name: &str) -> Result<usize> {
        self.page_templates
            .iter()
            .position(|template| template.name == name)
            .ok_or_else(|| PostbookError::UnknownPageTemplate(name.to_string()))
    }

    /// Lays out the story. Markers placed along the way record their pages in
    /// `tracker`.
    pub fn build(mut self, tracker: &mut PageTracker) -> Result<Document> {
        let Some(first) = self.page_templates.first() else {
            return Err(PostbookError::MissingPageTemplate);
        };
        let mut canvas = Canvas::new(first.page_size);
        let mut pending = 0usize;
        let mut page: Option<OpenPage> = None;

        let story = std::mem::take(&mut self.story);
        for item in story {
            match item {
                StoryItem::NextTemplate(name) => {
                    pending = self.template_index(&name)?;
                }
                StoryItem::PageBreak => {
                    if page.as_ref().is_some_and(|open| open.placed) {
                        debug!("page break: explicit, leaving page {}", canvas.page_number());
                        canvas.show_page();
                        page = None;
                    }
                }
                StoryItem::Flowable(flowable) => {
                    self.place(flowable, &mut canvas, &mut page, pending, tracker)?;
                }
            }
        }

        Ok(canvas.finish())
    }

    fn place(
        &self,
        flowable: Box<dyn Flowable>,
        canvas: &mut Canvas,
        page: &mut Option<OpenPage>,
        pending: usize,
        tracker: &mut PageTracker,
    ) -> Result<()> {
        let mut current = flowable;
        loop {
            let needs_page = page
                .as_ref()
                .is_none_or(|open| open.frame_index >= open.frames.len());
            if needs_page {
                if page.is_some() {
                    debug!(
                        "page break: frames exhausted on page {} by {}",
                        canvas.page_number(),
                        current.debug_name()
                    );
                    canvas.show_page();
                }
                *page = Some(self.start_page(canvas, pending)?);
            }
            let Some(open) = page.as_mut() else {
                return Err(PostbookError::MissingPageTemplate);
            };

            let is_last_frame = open.frame_index + 1 >= open.frames.len();
            let frame = &mut open.frames[open.frame_index];
            let rect = frame.rect();
            let name = current.debug_name();
            match frame.add(current, canvas, tracker) {
                AddResult::Placed => {
                    open.placed = true;
                    return Ok(());
                }
                AddResult::Split(rest) => {
                    debug!("split {name} in frame {} of page {}", open.frame_index, canvas.page_number());
                    open.placed = true;
                    open.frame_index += 1;
                    current = rest;
                }
                AddResult::Overflow(rest) => {
                    if !open.placed && is_last_frame {
                        let size = rest.wrap(rect.width, rect.height);
                        return Err(PostbookError::UnplaceableFlowable(format!(
                            "{name} size={}x{}pt frame={}x{}pt",
                            size.width.to_f32(),
                            size.height.to_f32(),
                            rect.width.to_f32(),
                            rect.height.to_f32(),
                        )));
                    }
                    open.frame_index += 1;
                    current = rest;
                }
            }
        }
    }

    fn start_page(&self, canvas: &mut Canvas, template_index: usize) -> Result<OpenPage> {
        let template = &self.page_templates[template_index];
        let frames = template.instantiate_frames();
        if frames.is_empty() {
            return Err(PostbookError::InvalidConfiguration(format!(
                "page template '{}' has no frames",
                template.name
            )));
        }
        if let Some(callback) = template.on_page() {
            let context = DocContext::new(canvas.page_number(), template.page_size);
            callback(canvas, &context);
        }
        canvas.meta(META_PAGE_TEMPLATE_KEY, template.name.clone());
        Ok(OpenPage {
            frames,
            frame_index: 0,
            placed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Command;
    use crate::flowable::{ImageFlowable, PageMarker};
    use crate::types::{Pt, Rect, Size};

    fn page_size() -> Size {
        Size::from_points(200.0, 140.0)
    }

    fn template(name: &str, columns: usize) -> PageTemplate {
        let mut t = PageTemplate::new(name, page_size());
        for col in 0..columns {
            t = t.with_frame(Rect::new(
                Pt::from_f32(10.0 + 90.0 * col as f32),
                Pt::from_f32(20.0),
                Pt::from_f32(80.0),
                Pt::from_f32(100.0),
            ));
        }
        t
    }

    fn photo(height: f32) -> Box<dyn Flowable> {
        Box::new(ImageFlowable::new_pt(
            Pt::from_f32(40.0),
            Pt::from_f32(height),
            "/tmp/p.png",
        ))
    }

    fn image_xs(doc: &Document, page: usize) -> Vec<Pt> {
        doc.pages[page]
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawImage { x, .. } => Some(*x),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn content_flows_to_the_next_page() {
        let mut doc = DocTemplate::new(vec![template("single", 1)]);
        doc.add_flowable(photo(60.0));
        doc.add_flowable(photo(60.0));
        let out = doc.build(&mut PageTracker::new()).expect("build");
        assert_eq!(out.page_count(), 2);
        assert_eq!(image_xs(&out, 0).len(), 1);
        assert_eq!(image_xs(&out, 1).len(), 1);
    }

    #[test]
    fn columns_fill_before_the_page_turns() {
        let mut doc = DocTemplate::new(vec![template("body", 2)]);
        for _ in 0..3 {
            doc.add_flowable(photo(60.0));
        }
        let out = doc.build(&mut PageTracker::new()).expect("build");
        assert_eq!(out.page_count(), 2);
        let first = image_xs(&out, 0);
        assert_eq!(first.len(), 2);
        assert!(first[1] > first[0] + Pt::from_f32(80.0), "second image in column two");
        assert_eq!(image_xs(&out, 1).len(), 1);
    }

    #[test]
    fn template_switch_applies_from_the_next_page() {
        let mut doc = DocTemplate::new(vec![template("single", 1), template("body", 2)]);
        doc.add_flowable(photo(20.0));
        doc.next_template("body");
        doc.add_flowable(photo(20.0));
        doc.page_break();
        doc.add_flowable(photo(20.0));
        let out = doc.build(&mut PageTracker::new()).expect("build");
        assert_eq!(out.page_count(), 2);
        assert_eq!(out.pages[0].meta(META_PAGE_TEMPLATE_KEY), Some("single"));
        assert_eq!(image_xs(&out, 0).len(), 2);
        assert_eq!(out.pages[1].meta(META_PAGE_TEMPLATE_KEY), Some("body"));
    }

    #[test]
    fn break_on_an_unused_page_is_ignored() {
        let mut doc = DocTemplate::new(vec![template("single", 1)]);
        doc.page_break();
        doc.add_flowable(photo(20.0));
        doc.page_break();
        doc.page_break();
        let out = doc.build(&mut PageTracker::new()).expect("build");
        assert_eq!(out.page_count(), 1);
    }

    #[test]
    fn on_page_callback_sees_page_numbers() {
        let footer = template("single", 1).set_on_page(|canvas, ctx| {
            canvas.draw_string(Pt::ZERO, ctx.page_size.height, format!("- {} -", ctx.page_number));
        });
        let mut doc = DocTemplate::new(vec![footer]);
        doc.add_flowable(photo(80.0));
        doc.add_flowable(photo(80.0));
        let out = doc.build(&mut PageTracker::new()).expect("build");
        assert_eq!(out.pages[0].text(), "- 1 -");
        assert_eq!(out.pages[1].text(), "- 2 -");
    }

    #[test]
    fn markers_after_a_break_record_the_new_page() {
        let mut doc = DocTemplate::new(vec![template("single", 1)]);
        doc.add_flowable(Box::new(PageMarker::new(0)));
        doc.add_flowable(photo(20.0));
        doc.page_break();
        doc.add_flowable(Box::new(PageMarker::new(1)));
        doc.add_flowable(photo(20.0));
        let mut tracker = PageTracker::new();
        doc.build(&mut tracker).expect("build");
        assert_eq!(tracker.page_of(0), Some(1));
        assert_eq!(tracker.page_of(1), Some(2));
    }

    #[test]
    fn oversized_flowable_is_forced_onto_an_empty_frame() {
        let mut doc = DocTemplate::new(vec![template("single", 1)]);
        doc.add_flowable(photo(20.0));
        doc.add_flowable(photo(500.0));
        let out = doc.build(&mut PageTracker::new()).expect("build");
        assert_eq!(out.page_count(), 2);
    }

    #[test]
    fn unknown_and_missing_templates_are_errors() {
        let mut doc = DocTemplate::new(vec![template("single", 1)]);
        doc.next_template("gallery");
        assert!(matches!(
            doc.build(&mut PageTracker::new()),
            Err(PostbookError::UnknownPageTemplate(name)) if name == "gallery"
        ));
        let doc = DocTemplate::new(Vec::new());
        assert!(matches!(
            doc.build(&mut PageTracker::new()),
            Err(PostbookError::MissingPageTemplate)
        ));
    }
}
