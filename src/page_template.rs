use crate::canvas::Canvas;
use crate::frame::Frame;
use crate::types::{Margins, Pt, Rect, Size};
use std::sync::Arc;

/// What an on-page callback knows about the page it decorates.
#[derive(Debug, Clone)]
pub struct DocContext {
    pub page_number: usize,
    pub page_size: Size,
}

impl DocContext {
    pub fn new(page_number: usize, page_size: Size) -> Self {
        Self {
            page_number,
            page_size,
        }
    }
}

pub type OnPageCallback = Arc<dyn Fn(&mut Canvas, &DocContext) + Send + Sync>;

#[derive(Clone)]
pub struct PageTemplate {
    pub name: String,
    pub page_size: Size,
    frames: Vec<Rect>,
    on_page: Option<OnPageCallback>,
}

impl PageTemplate {
    pub fn new(name: impl Into<String>, page_size: Size) -> Self {
        Self {
            name: name.into(),
            page_size,
            frames: Vec::new(),
            on_page: None,
        }
    }

    /// Template whose content area is split into `columns` equal frames with
    /// `gutter` between neighbours.
    pub fn with_columns(
        name: impl Into<String>,
        page_size: Size,
        margins: Margins,
        columns: usize,
        gutter: Pt,
    ) -> Self {
        let mut template = Self::new(name, page_size);
        for rect in column_rects(page_size, margins, columns, gutter) {
            template = template.with_frame(rect);
        }
        template
    }

    pub fn with_frame(mut self, rect: Rect) -> Self {
        self.frames.push(rect);
        self
    }

    pub fn set_on_page<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Canvas, &DocContext) + Send + Sync + 'static,
    {
        self.on_page = Some(Arc::new(callback));
        self
    }

    pub fn on_page(&self) -> Option<&OnPageCallback> {
        self.on_page.as_ref()
    }

    pub fn frame_rects(&self) -> &[Rect] {
        &self.frames
    }

    pub fn instantiate_frames(&self) -> Vec<Frame> {
        self.frames.iter().map(|rect| Frame::new(*rect)).collect()
    }
}

/// Splits the area inside `margins` into `columns` equal-width frames.
pub fn column_rects(page_size: Size, margins: Margins, columns: usize, gutter: Pt) -> Vec<Rect> {
    let columns = columns.max(1);
    let usable_w = page_size.width - margins.left - margins.right;
    let usable_h = page_size.height - margins.top - margins.bottom;
    let gaps = columns as i32 - 1;
    let col_w = (usable_w - gutter * gaps).mul_ratio(1, columns as i32);
    (0..columns)
        .map(|i| {
            let x = margins.left + (col_w + gutter) * (i as i32);
            Rect::new(x, margins.top, col_w, usable_h)
        })
        .collect()
}
