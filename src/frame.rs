use crate::canvas::Canvas;
use crate::flowable::{Flowable, KeepTogether};
use crate::toc::PageTracker;
use crate::types::{Pt, Rect};

pub enum AddResult {
    Placed,
    Split(Box<dyn Flowable>),
    Overflow(Box<dyn Flowable>),
}

/// One rectangular flow region of a page. Content stacks top-down from the
/// frame's top edge.
pub struct Frame {
    rect: Rect,
    cursor_y: Pt,
}

impl Frame {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            cursor_y: Pt::ZERO,
        }
    }

    pub fn remaining_height(&self) -> Pt {
        (self.rect.height - self.cursor_y).max(Pt::ZERO)
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn is_empty(&self) -> bool {
        self.cursor_y <= Pt::ZERO
    }

    pub fn add(
        &mut self,
        flowable: Box<dyn Flowable>,
        canvas: &mut Canvas,
        tracker: &mut PageTracker,
    ) -> AddResult {
        let avail_width = self.rect.width;
        let avail_height = self.remaining_height();
        let size = flowable.wrap(avail_width, avail_height);

        // A full frame rejects even zero-height markers so they commit on the
        // page where the following content lands.
        if avail_height <= Pt::ZERO && !self.is_empty() {
            return AddResult::Overflow(flowable);
        }

        if flowable.keep_together() == KeepTogether::Always
            && size.height > avail_height
            && !self.is_empty()
        {
            return AddResult::Overflow(flowable);
        }

        if size.height <= avail_height {
            self.place(flowable.as_ref(), canvas, tracker, size.height);
            return AddResult::Placed;
        }

        if let Some((first, second)) = flowable.split(avail_width, avail_height) {
            let first_size = first.wrap(avail_width, avail_height);
            if first_size.height > Pt::ZERO && first_size.height <= avail_height {
                self.place(first.as_ref(), canvas, tracker, first_size.height);
                return AddResult::Split(second);
            }
        }

        // Taller than a whole frame and unsplittable: place it anyway so
        // pagination keeps moving.
        if self.is_empty() {
            self.place(flowable.as_ref(), canvas, tracker, self.rect.height);
            return AddResult::Placed;
        }

        AddResult::Overflow(flowable)
    }

    fn place(
        &mut self,
        flowable: &dyn Flowable,
        canvas: &mut Canvas,
        tracker: &mut PageTracker,
        height: Pt,
    ) {
        let x = self.rect.x;
        let y = self.rect.y + self.cursor_y;
        flowable.draw(canvas, x, y, self.rect.width, self.remaining_height());
        flowable.on_placed(canvas.page_number(), tracker);
        self.cursor_y += height;
    }
}
