use crate::canvas::Canvas;
use crate::font::BuiltinFont;
use crate::glyph::{GLYPH_SIZE, GLYPH_VALIGN, Inline};
use crate::photo::{PhotoLayout, PhotoRow};
use crate::toc::PageTracker;
use crate::types::{Color, Pt, Rect, Size};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeepTogether {
    #[default]
    Auto,
    /// Move to the next frame rather than start in a partly filled one.
    Always,
}

pub trait Flowable: FlowableClone + Send + Sync {
    fn wrap(&self, avail_width: Pt, avail_height: Pt) -> Size;
    fn split(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)>;
    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, avail_height: Pt);

    fn keep_together(&self) -> KeepTogether {
        KeepTogether::Auto
    }

    /// Called after the frame has committed this unit to `page_number`.
    fn on_placed(&self, _page_number: usize, _tracker: &mut PageTracker) {}

    fn debug_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

pub trait FlowableClone {
    fn clone_box(&self) -> Box<dyn Flowable>;
}

impl<T> FlowableClone for T
where
    T: 'static + Flowable + Clone,
{
    fn clone_box(&self) -> Box<dyn Flowable> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Flowable> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font: BuiltinFont,
    pub font_size: Pt,
    pub leading: Pt,
    pub color: Color,
    pub align: TextAlign,
    pub space_before: Pt,
    pub space_after: Pt,
}

impl Default for TextStyle {
    fn default() -> Self {
        let font_size = Pt::from_f32(12.0);
        Self {
            font: BuiltinFont::Helvetica,
            font_size,
            leading: font_size.mul_ratio(6, 5),
            color: Color::BLACK,
            align: TextAlign::Left,
            space_before: Pt::ZERO,
            space_after: Pt::ZERO,
        }
    }
}

impl TextStyle {
    pub fn new(font: BuiltinFont, font_size: f32, leading: f32) -> Self {
        Self {
            font,
            font_size: Pt::from_f32(font_size),
            leading: Pt::from_f32(leading),
            ..Self::default()
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_align(mut self, align: TextAlign) -> Self {
        self.align = align;
        self
    }

    pub fn with_space_before(mut self, space: f32) -> Self {
        self.space_before = Pt::from_f32(space);
        self
    }

    pub fn with_space_after(mut self, space: f32) -> Self {
        self.space_after = Pt::from_f32(space);
        self
    }
}

/// A run of paragraph content with an optional colour override.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub inline: Inline,
    pub color: Option<Color>,
}

impl Span {
    pub fn new(inline: Inline, color: Option<Color>) -> Self {
        Self { inline, color }
    }
}

#[derive(Debug, Clone, Default)]
struct Line {
    spans: Vec<Span>,
    width: Pt,
}

enum Token {
    Word(Vec<Span>),
    Space,
    Break,
}

fn push_text(spans: &mut Vec<Span>, text: &str, color: Option<Color>) {
    if let Some(Span {
        inline: Inline::Text(last),
        color: last_color,
    }) = spans.last_mut()
    {
        if *last_color == color {
            last.push_str(text);
            return;
        }
    }
    spans.push(Span::new(Inline::Text(text.to_string()), color));
}

fn push_span(spans: &mut Vec<Span>, span: Span) {
    match span.inline {
        Inline::Text(text) => push_text(spans, &text, span.color),
        Inline::Glyph(_) => spans.push(span),
    }
}

fn tokenize(spans: &[Span]) -> Vec<Token> {
    fn flush(tokens: &mut Vec<Token>, word: &mut Vec<Span>) {
        if !word.is_empty() {
            tokens.push(Token::Word(std::mem::take(word)));
        }
    }

    let mut tokens = Vec::new();
    let mut word: Vec<Span> = Vec::new();
    let mut buf = [0u8; 4];
    for span in spans {
        match &span.inline {
            Inline::Glyph(_) => word.push(span.clone()),
            Inline::Text(text) => {
                for ch in text.chars() {
                    if ch == '\n' {
                        flush(&mut tokens, &mut word);
                        tokens.push(Token::Break);
                    } else if ch.is_whitespace() {
                        flush(&mut tokens, &mut word);
                        if !matches!(tokens.last(), Some(Token::Space)) {
                            tokens.push(Token::Space);
                        }
                    } else {
                        push_text(&mut word, ch.encode_utf8(&mut buf), span.color);
                    }
                }
            }
        }
    }
    flush(&mut tokens, &mut word);
    tokens
}

/// Wrapped text block. Content is a sequence of text and inline glyph-image
/// spans; `\n` in text forces a line break.
#[derive(Debug, Clone)]
pub struct Paragraph {
    spans: Vec<Span>,
    style: TextStyle,
    anchor: Option<String>,
    link: Option<String>,
    keep_together: KeepTogether,
    layout_cache: Arc<Mutex<Option<(i64, Arc<Vec<Line>>)>>>,
}

impl Paragraph {
    pub fn new(text: impl Into<String>) -> Self {
        Self::from_inlines(vec![Inline::Text(text.into())])
    }

    pub fn from_inlines(inlines: Vec<Inline>) -> Self {
        Self::from_spans(
            inlines
                .into_iter()
                .map(|inline| Span::new(inline, None))
                .collect(),
        )
    }

    fn from_spans(spans: Vec<Span>) -> Self {
        Self {
            spans,
            style: TextStyle::default(),
            anchor: None,
            link: None,
            keep_together: KeepTogether::Auto,
            layout_cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Appends inline content drawn in `color` instead of the style colour.
    pub fn with_colored(mut self, inlines: Vec<Inline>, color: Color) -> Self {
        for inline in inlines {
            push_span(&mut self.spans, Span::new(inline, Some(color)));
        }
        self.invalidate();
        self
    }

    pub fn with_style(mut self, style: TextStyle) -> Self {
        self.style = style;
        self.invalidate();
        self
    }

    /// Named destination emitted at the paragraph's top-left corner.
    pub fn with_anchor(mut self, name: impl Into<String>) -> Self {
        self.anchor = Some(name.into());
        self
    }

    /// Makes every line a link to the named destination.
    pub fn with_link(mut self, target: impl Into<String>) -> Self {
        self.link = Some(target.into());
        self
    }

    pub fn with_keep_together(mut self, keep: KeepTogether) -> Self {
        self.keep_together = keep;
        self
    }

    pub fn style(&self) -> &TextStyle {
        &self.style
    }

    /// Plain text with glyph images dropped.
    pub fn text(&self) -> String {
        self.spans
            .iter()
            .filter_map(|span| match &span.inline {
                Inline::Text(text) => Some(text.as_str()),
                Inline::Glyph(_) => None,
            })
            .collect()
    }

    fn invalidate(&mut self) {
        self.layout_cache = Arc::new(Mutex::new(None));
    }

    fn span_width(&self, span: &Span) -> Pt {
        match &span.inline {
            Inline::Text(text) => self.style.font.measure(self.style.font_size, text),
            Inline::Glyph(_) => Pt::from_f32(GLYPH_SIZE),
        }
    }

    fn spans_width(&self, spans: &[Span]) -> Pt {
        spans.iter().map(|span| self.span_width(span)).sum()
    }

    /// Cuts a word wider than the line into chunks that fit.
    fn break_word(&self, word: Vec<Span>, avail_width: Pt) -> Vec<Line> {
        let mut chunks = Vec::new();
        let mut current = Line::default();
        let mut buf = [0u8; 4];
        for span in word {
            match &span.inline {
                Inline::Glyph(_) => {
                    let w = self.span_width(&span);
                    if !current.spans.is_empty() && current.width + w > avail_width {
                        chunks.push(std::mem::take(&mut current));
                    }
                    current.width += w;
                    current.spans.push(span);
                }
                Inline::Text(text) => {
                    for ch in text.chars() {
                        let piece = ch.encode_utf8(&mut buf);
                        let w = self.style.font.measure(self.style.font_size, piece);
                        if !current.spans.is_empty() && current.width + w > avail_width {
                            chunks.push(std::mem::take(&mut current));
                        }
                        current.width += w;
                        push_text(&mut current.spans, piece, span.color);
                    }
                }
            }
        }
        if !current.spans.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    fn layout_lines(&self, avail_width: Pt) -> Arc<Vec<Line>> {
        let key = avail_width.to_milli_i64();
        if let Ok(cache) = self.layout_cache.lock() {
            if let Some((cached_key, lines)) = cache.as_ref() {
                if *cached_key == key {
                    return lines.clone();
                }
            }
        }

        let space_width = self.style.font.measure(self.style.font_size, " ");
        let mut lines: Vec<Line> = Vec::new();
        let mut current = Line::default();
        let mut pending_space = false;
        for token in tokenize(&self.spans) {
            match token {
                Token::Break => {
                    lines.push(std::mem::take(&mut current));
                    pending_space = false;
                }
                Token::Space => {
                    pending_space = !current.spans.is_empty();
                }
                Token::Word(word) => {
                    let word_width = self.spans_width(&word);
                    let mut gap = if pending_space { space_width } else { Pt::ZERO };
                    pending_space = false;
                    if !current.spans.is_empty() && current.width + gap + word_width > avail_width
                    {
                        lines.push(std::mem::take(&mut current));
                        gap = Pt::ZERO;
                    }
                    if current.spans.is_empty() && word_width > avail_width {
                        let mut chunks = self.break_word(word, avail_width);
                        if let Some(last) = chunks.pop() {
                            lines.extend(chunks);
                            current = last;
                        }
                        continue;
                    }
                    if gap > Pt::ZERO {
                        push_text(&mut current.spans, " ", None);
                    }
                    current.width += gap + word_width;
                    for span in word {
                        push_span(&mut current.spans, span);
                    }
                }
            }
        }
        if !current.spans.is_empty() {
            lines.push(current);
        }

        let lines = Arc::new(lines);
        if let Ok(mut cache) = self.layout_cache.lock() {
            *cache = Some((key, lines.clone()));
        }
        lines
    }

    fn lines_to_spans(lines: &[Line]) -> Vec<Span> {
        let mut spans = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if idx > 0 {
                push_text(&mut spans, "\n", None);
            }
            for span in &line.spans {
                push_span(&mut spans, span.clone());
            }
        }
        spans
    }
}

impl Flowable for Paragraph {
    fn wrap(&self, avail_width: Pt, _avail_height: Pt) -> Size {
        let lines = self.layout_lines(avail_width);
        let height =
            self.style.space_before + self.style.leading * (lines.len() as i32) + self.style.space_after;
        Size {
            width: avail_width,
            height,
        }
    }

    fn split(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        if self.keep_together == KeepTogether::Always {
            return None;
        }
        let lines = self.layout_lines(avail_width);
        let lh = self.style.leading.to_milli_i64();
        let ah = (avail_height - self.style.space_before).to_milli_i64();
        if lh <= 0 || ah <= 0 {
            return None;
        }
        let max_lines = (ah / lh) as usize;
        if max_lines == 0 || max_lines >= lines.len() {
            return None;
        }
        let mut split_at = max_lines;
        // Avoid leaving a single widow line when there is room to give.
        if lines.len() - split_at == 1 && split_at > 2 {
            split_at -= 1;
        }

        let first = Paragraph {
            spans: Self::lines_to_spans(&lines[..split_at]),
            style: TextStyle {
                space_after: Pt::ZERO,
                ..self.style.clone()
            },
            anchor: self.anchor.clone(),
            link: self.link.clone(),
            keep_together: self.keep_together,
            layout_cache: Arc::new(Mutex::new(None)),
        };
        let second = Paragraph {
            spans: Self::lines_to_spans(&lines[split_at..]),
            style: TextStyle {
                space_before: Pt::ZERO,
                ..self.style.clone()
            },
            anchor: None,
            link: self.link.clone(),
            keep_together: self.keep_together,
            layout_cache: Arc::new(Mutex::new(None)),
        };
        Some((Box::new(first), Box::new(second)))
    }

    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, _avail_height: Pt) {
        let lines = self.layout_lines(avail_width);
        let top = y + self.style.space_before;
        if let Some(anchor) = &self.anchor {
            canvas.anchor(anchor.clone(), x, top);
        }
        canvas.set_font(self.style.font);
        canvas.set_font_size(self.style.font_size);

        let leading = self.style.leading;
        let descent = self.style.font.descent(self.style.font_size);
        let glyph_size = Pt::from_f32(GLYPH_SIZE);
        let glyph_drop = -Pt::from_f32(GLYPH_VALIGN);
        let mut line_top = top;
        for line in lines.iter() {
            let offset = match self.style.align {
                TextAlign::Left => Pt::ZERO,
                TextAlign::Center => (avail_width - line.width).max(Pt::ZERO).mul_ratio(1, 2),
                TextAlign::Right => (avail_width - line.width).max(Pt::ZERO),
            };
            let baseline = line_top + leading - descent;
            let mut cursor_x = x + offset;
            for span in &line.spans {
                let width = self.span_width(span);
                match &span.inline {
                    Inline::Text(text) => {
                        canvas.set_fill_color(span.color.unwrap_or(self.style.color));
                        canvas.draw_string(cursor_x, baseline, text.clone());
                    }
                    Inline::Glyph(path) => {
                        let bottom = baseline + glyph_drop;
                        canvas.draw_image(
                            cursor_x,
                            bottom - glyph_size,
                            glyph_size,
                            glyph_size,
                            path.clone(),
                        );
                    }
                }
                cursor_x += width;
            }
            if let Some(target) = &self.link {
                canvas.link(Rect::new(x + offset, line_top, line.width, leading), target.clone());
            }
            line_top += leading;
        }
    }

    fn keep_together(&self) -> KeepTogether {
        self.keep_together
    }
}

#[derive(Debug, Clone)]
pub struct Spacer {
    height: Pt,
}

impl Spacer {
    pub fn new(height: f32) -> Self {
        Self::new_pt(Pt::from_f32(height))
    }

    pub fn new_pt(height: Pt) -> Self {
        Self { height }
    }
}

impl Flowable for Spacer {
    fn wrap(&self, avail_width: Pt, avail_height: Pt) -> Size {
        // Spacers never push content to the next frame on their own.
        Size {
            width: avail_width,
            height: self.height.max(Pt::ZERO).min(avail_height.max(Pt::ZERO)),
        }
    }

    fn split(
        &self,
        _avail_width: Pt,
        _avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        None
    }

    fn draw(&self, _canvas: &mut Canvas, _x: Pt, _y: Pt, _avail_width: Pt, _avail_height: Pt) {}
}

/// A single picture, centred horizontally in its frame.
#[derive(Debug, Clone)]
pub struct ImageFlowable {
    pub width: Pt,
    pub height: Pt,
    pub path: PathBuf,
}

impl ImageFlowable {
    pub fn new_pt(width: Pt, height: Pt, path: impl Into<PathBuf>) -> Self {
        Self {
            width,
            height,
            path: path.into(),
        }
    }
}

impl Flowable for ImageFlowable {
    fn wrap(&self, _avail_width: Pt, _avail_height: Pt) -> Size {
        Size {
            width: self.width,
            height: self.height,
        }
    }

    fn split(
        &self,
        _avail_width: Pt,
        _avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        None
    }

    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, _avail_height: Pt) {
        let offset = (avail_width - self.width).max(Pt::ZERO).mul_ratio(1, 2);
        canvas.draw_image(x + offset, y, self.width, self.height, self.path.clone());
    }

    fn keep_together(&self) -> KeepTogether {
        KeepTogether::Always
    }
}

/// Photo tiles produced by the photo layout engine. Splits between rows.
#[derive(Debug, Clone)]
pub struct PhotoGridFlowable {
    layout: PhotoLayout,
}

impl PhotoGridFlowable {
    pub fn new(layout: PhotoLayout) -> Self {
        Self { layout }
    }

    fn with_rows(&self, rows: Vec<PhotoRow>) -> Self {
        Self {
            layout: PhotoLayout {
                width: self.layout.width,
                rows,
            },
        }
    }
}

impl Flowable for PhotoGridFlowable {
    fn wrap(&self, _avail_width: Pt, _avail_height: Pt) -> Size {
        Size {
            width: self.layout.width,
            height: self.layout.height(),
        }
    }

    fn split(
        &self,
        _avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        let mut used = Pt::ZERO;
        let mut fit = 0usize;
        for row in &self.layout.rows {
            if used + row.height > avail_height {
                break;
            }
            used += row.height;
            fit += 1;
        }
        if fit == 0 || fit >= self.layout.rows.len() {
            return None;
        }
        let (head, tail) = self.layout.rows.split_at(fit);
        Some((
            Box::new(self.with_rows(head.to_vec())),
            Box::new(self.with_rows(tail.to_vec())),
        ))
    }

    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, _avail_height: Pt) {
        let offset = (avail_width - self.layout.width).max(Pt::ZERO).mul_ratio(1, 2);
        for placement in self.layout.placements() {
            canvas.draw_image(
                x + offset + placement.x,
                y + placement.y,
                placement.width,
                placement.height,
                placement.path,
            );
        }
    }
}

/// TOC row: the entry paragraph on the left, the page number right-aligned
/// in a fixed-width column.
#[derive(Debug, Clone)]
pub struct TocEntryFlowable {
    entry: Paragraph,
    page_label: Paragraph,
    number_width: Pt,
}

impl TocEntryFlowable {
    pub fn new(entry: Paragraph, page_label: Paragraph, number_width: Pt) -> Self {
        let label_style = page_label.style().clone().with_align(TextAlign::Right);
        Self {
            entry,
            page_label: page_label.with_style(label_style),
            number_width,
        }
    }

    fn entry_width(&self, avail_width: Pt) -> Pt {
        (avail_width - self.number_width).max(Pt::from_f32(1.0))
    }
}

impl Flowable for TocEntryFlowable {
    fn wrap(&self, avail_width: Pt, avail_height: Pt) -> Size {
        let entry = self.entry.wrap(self.entry_width(avail_width), avail_height);
        let label = self.page_label.wrap(self.number_width, avail_height);
        Size {
            width: avail_width,
            height: entry.height.max(label.height),
        }
    }

    fn split(
        &self,
        _avail_width: Pt,
        _avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        None
    }

    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, avail_height: Pt) {
        let entry_width = self.entry_width(avail_width);
        self.entry.draw(canvas, x, y, entry_width, avail_height);
        self.page_label
            .draw(canvas, x + entry_width, y, self.number_width, avail_height);
    }

    fn keep_together(&self) -> KeepTogether {
        KeepTogether::Always
    }
}

/// Zero-size unit that records the page it is committed to.
#[derive(Debug, Clone)]
pub struct PageMarker {
    index: usize,
}

impl PageMarker {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl Flowable for PageMarker {
    fn wrap(&self, _avail_width: Pt, _avail_height: Pt) -> Size {
        Size {
            width: Pt::ZERO,
            height: Pt::ZERO,
        }
    }

    fn split(
        &self,
        _avail_width: Pt,
        _avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        None
    }

    fn draw(&self, _canvas: &mut Canvas, _x: Pt, _y: Pt, _avail_width: Pt, _avail_height: Pt) {}

    fn on_placed(&self, page_number: usize, tracker: &mut PageTracker) {
        tracker.record(self.index, page_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Command;

    fn body_style() -> TextStyle {
        TextStyle::new(BuiltinFont::Helvetica, 10.0, 12.0)
    }

    #[test]
    fn paragraph_wraps_on_word_boundaries() {
        // "aaaa" is 4 * 5.56 = 22.24pt at 10pt.
        let para = Paragraph::new("aaaa aaaa aaaa").with_style(body_style());
        let size = para.wrap(Pt::from_f32(50.0), Pt::from_f32(1000.0));
        assert_eq!(size.height, Pt::from_f32(24.0), "two words per line");
        let one_line = para.wrap(Pt::from_f32(200.0), Pt::from_f32(1000.0));
        assert_eq!(one_line.height, Pt::from_f32(12.0));
    }

    #[test]
    fn hard_breaks_and_blank_lines_are_kept() {
        let para = Paragraph::new("one\n\nthree").with_style(body_style());
        let size = para.wrap(Pt::from_f32(500.0), Pt::from_f32(1000.0));
        assert_eq!(size.height, Pt::from_f32(36.0));
    }

    #[test]
    fn overlong_words_are_broken_by_character() {
        let para = Paragraph::new("a".repeat(30)).with_style(body_style());
        // 30 * 5.56 = 166.8pt into 60pt columns -> 10 chars per line.
        let size = para.wrap(Pt::from_f32(60.0), Pt::from_f32(1000.0));
        assert_eq!(size.height, Pt::from_f32(36.0));
    }

    #[test]
    fn split_keeps_anchor_on_first_part_only() {
        let para = Paragraph::new("l1\nl2\nl3\nl4\nl5\nl6")
            .with_style(body_style().with_space_before(4.0).with_space_after(6.0))
            .with_anchor("post_0");
        let (first, second) = para
            .split(Pt::from_f32(200.0), Pt::from_f32(4.0 + 12.0 * 3.0 + 5.0))
            .expect("paragraph should split");
        assert_eq!(
            first.wrap(Pt::from_f32(200.0), Pt::from_f32(1000.0)).height,
            Pt::from_f32(40.0)
        );
        assert_eq!(
            second.wrap(Pt::from_f32(200.0), Pt::from_f32(1000.0)).height,
            Pt::from_f32(42.0)
        );

        let mut canvas = Canvas::new(Size::from_points(300.0, 300.0));
        first.draw(&mut canvas, Pt::ZERO, Pt::ZERO, Pt::from_f32(200.0), Pt::from_f32(300.0));
        second.draw(&mut canvas, Pt::ZERO, Pt::from_f32(100.0), Pt::from_f32(200.0), Pt::from_f32(300.0));
        let doc = canvas.finish();
        let anchors = doc.pages[0]
            .commands
            .iter()
            .filter(|c| matches!(c, Command::Anchor { .. }))
            .count();
        assert_eq!(anchors, 1);
        assert_eq!(doc.pages[0].text(), "l1\nl2\nl3\nl4\nl5\nl6");
    }

    #[test]
    fn inline_glyphs_are_drawn_as_images_on_the_text_line() {
        let para = Paragraph::from_inlines(vec![
            Inline::Text("hi ".to_string()),
            Inline::Glyph(PathBuf::from("/tmp/g.png")),
            Inline::Text(" there".to_string()),
        ])
        .with_style(TextStyle::new(BuiltinFont::Helvetica, 11.0, 15.0));
        let mut canvas = Canvas::new(Size::from_points(300.0, 300.0));
        para.draw(&mut canvas, Pt::ZERO, Pt::ZERO, Pt::from_f32(300.0), Pt::from_f32(300.0));
        let doc = canvas.finish();
        let image = doc.pages[0].commands.iter().find_map(|c| match c {
            Command::DrawImage { y, width, path, .. } => Some((*y, *width, path.clone())),
            _ => None,
        });
        let (y, width, path) = image.expect("glyph image drawn");
        assert_eq!(width, Pt::from_f32(GLYPH_SIZE));
        assert_eq!(path, PathBuf::from("/tmp/g.png"));
        assert!(y >= Pt::ZERO && y < Pt::from_f32(15.0), "glyph sits on the first line");
    }

    #[test]
    fn colored_spans_switch_fill_color() {
        let grey = Color::from_hex(0x888888);
        let para = Paragraph::new("Title")
            .with_colored(vec![Inline::Text(" (2024-01-01)".to_string())], grey)
            .with_link("post_3");
        let mut canvas = Canvas::new(Size::from_points(300.0, 300.0));
        para.draw(&mut canvas, Pt::ZERO, Pt::ZERO, Pt::from_f32(300.0), Pt::from_f32(300.0));
        let doc = canvas.finish();
        let commands = &doc.pages[0].commands;
        assert!(commands.contains(&Command::SetFillColor(grey)));
        assert!(
            commands
                .iter()
                .any(|c| matches!(c, Command::Link { target, .. } if target == "post_3"))
        );
    }

    #[test]
    fn toc_entry_right_aligns_page_number() {
        let style = TextStyle::new(BuiltinFont::Helvetica, 11.0, 16.0);
        let row = TocEntryFlowable::new(
            Paragraph::new("A post").with_style(style.clone()),
            Paragraph::new("15").with_style(style),
            Pt::inches(0.6),
        );
        let width = Pt::from_f32(400.0);
        assert_eq!(row.wrap(width, Pt::from_f32(100.0)).height, Pt::from_f32(16.0));
        let mut canvas = Canvas::new(Size::from_points(500.0, 500.0));
        row.draw(&mut canvas, Pt::ZERO, Pt::ZERO, width, Pt::from_f32(100.0));
        let doc = canvas.finish();
        let number_x = doc.pages[0].commands.iter().find_map(|c| match c {
            Command::DrawString { x, text, .. } if text == "15" => Some(*x),
            _ => None,
        });
        let expected = width - BuiltinFont::Helvetica.measure(Pt::from_f32(11.0), "15");
        assert_eq!(number_x, Some(expected));
    }

    #[test]
    fn spacer_is_clamped_to_remaining_height() {
        let spacer = Spacer::new(144.0);
        let size = spacer.wrap(Pt::from_f32(100.0), Pt::from_f32(50.0));
        assert_eq!(size.height, Pt::from_f32(50.0));
    }
}
