use crate::font::BuiltinFont;
use crate::types::{Color, Pt, Rect, Size};
use std::path::PathBuf;

/// Page drawing command. Coordinates are y-down from the top-left corner of
/// the page; the PDF writer flips them.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    SetFillColor(Color),
    SetFont(BuiltinFont),
    SetFontSize(Pt),
    /// `y` is the text baseline.
    DrawString {
        x: Pt,
        y: Pt,
        text: String,
    },
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        path: PathBuf,
    },
    /// Named destination for in-document links.
    Anchor {
        name: String,
        x: Pt,
        y: Pt,
    },
    Link {
        rect: Rect,
        target: String,
    },
    // Non-rendered metadata. Ignored by the PDF writer.
    Meta {
        key: String,
        value: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub commands: Vec<Command>,
}

impl Page {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.commands.iter().find_map(|command| match command {
            Command::Meta { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn text(&self) -> String {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::DrawString { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A fully laid-out document: one command list per physical page.
#[derive(Debug, Clone)]
pub struct Document {
    pub page_size: Size,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// 1-based page number holding the named anchor.
    pub fn anchor_page(&self, name: &str) -> Option<usize> {
        self.pages.iter().position(|page| {
            page.commands
                .iter()
                .any(|command| matches!(command, Command::Anchor { name: n, .. } if n == name))
        })
        .map(|idx| idx + 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GraphicsState {
    fill_color: Color,
    font: BuiltinFont,
    font_size: Pt,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            font: BuiltinFont::Helvetica,
            font_size: Pt::from_f32(12.0),
        }
    }
}

pub struct Canvas {
    page_size: Size,
    pages: Vec<Page>,
    current: Page,
    state_stack: Vec<GraphicsState>,
    current_state: GraphicsState,
}

impl Canvas {
    pub fn new(page_size: Size) -> Self {
        Self {
            page_size,
            pages: Vec::new(),
            current: Page::default(),
            state_stack: Vec::new(),
            current_state: GraphicsState::default(),
        }
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    /// 1-based number of the page currently being drawn.
    pub fn page_number(&self) -> usize {
        self.pages.len() + 1
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.current_state.clone());
        self.current.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
            self.current.commands.push(Command::RestoreState);
        }
    }

    pub fn meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.current.commands.push(Command::Meta {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.current.commands.push(Command::SetFillColor(color));
    }

    pub fn set_font(&mut self, font: BuiltinFont) {
        if self.current_state.font == font {
            return;
        }
        self.current_state.font = font;
        self.current.commands.push(Command::SetFont(font));
    }

    pub fn set_font_size(&mut self, size: Pt) {
        if self.current_state.font_size == size {
            return;
        }
        self.current_state.font_size = size;
        self.current.commands.push(Command::SetFontSize(size));
    }

    pub fn draw_string(&mut self, x: Pt, y: Pt, text: impl Into<String>) {
        self.current.commands.push(Command::DrawString {
            x,
            y,
            text: text.into(),
        });
    }

    pub fn draw_image(&mut self, x: Pt, y: Pt, width: Pt, height: Pt, path: impl Into<PathBuf>) {
        self.current.commands.push(Command::DrawImage {
            x,
            y,
            width,
            height,
            path: path.into(),
        });
    }

    pub fn anchor(&mut self, name: impl Into<String>, x: Pt, y: Pt) {
        self.current.commands.push(Command::Anchor {
            name: name.into(),
            x,
            y,
        });
    }

    pub fn link(&mut self, rect: Rect, target: impl Into<String>) {
        self.current.commands.push(Command::Link {
            rect,
            target: target.into(),
        });
    }

    pub fn show_page(&mut self) {
        let current = std::mem::take(&mut self.current);
        self.pages.push(current);
        self.state_stack.clear();
        self.current_state = GraphicsState::default();
    }

    pub fn is_current_empty(&self) -> bool {
        self.current.commands.is_empty()
    }

    pub fn finish(mut self) -> Document {
        if !self.current.commands.is_empty() || self.pages.is_empty() {
            self.show_page();
        }
        Document {
            page_size: self.page_size,
            pages: self.pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redundant_state_changes_are_not_recorded() {
        let mut canvas = Canvas::new(Size::from_points(100.0, 100.0));
        canvas.set_font(BuiltinFont::Helvetica);
        canvas.set_font_size(Pt::from_f32(12.0));
        canvas.set_fill_color(Color::BLACK);
        assert!(canvas.is_current_empty(), "defaults should be implicit");
        canvas.set_font(BuiltinFont::HelveticaBold);
        canvas.set_font(BuiltinFont::HelveticaBold);
        let doc = canvas.finish();
        assert_eq!(doc.pages[0].commands, vec![Command::SetFont(BuiltinFont::HelveticaBold)]);
    }

    #[test]
    fn page_numbers_advance_with_show_page() {
        let mut canvas = Canvas::new(Size::from_points(100.0, 100.0));
        assert_eq!(canvas.page_number(), 1);
        canvas.anchor("post_0", Pt::ZERO, Pt::ZERO);
        canvas.show_page();
        canvas.anchor("post_1", Pt::ZERO, Pt::ZERO);
        assert_eq!(canvas.page_number(), 2);
        let doc = canvas.finish();
        assert_eq!(doc.page_count(), 2);
        assert_eq!(doc.anchor_page("post_1"), Some(2));
        assert_eq!(doc.anchor_page("missing"), None);
    }

    #[test]
    fn finishing_an_empty_canvas_yields_one_blank_page() {
        let doc = Canvas::new(Size::from_points(10.0, 10.0)).finish();
        assert_eq!(doc.page_count(), 1);
        assert!(doc.pages[0].commands.is_empty());
    }
}
