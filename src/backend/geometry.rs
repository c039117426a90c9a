//! Page-space geometry shared by the backends: character boxes, quads and
//! conversion to page-relative rectangles.

use crate::engine::capability::PageSize;
use crate::engine::types::TextRect;

/// Axis-aligned rectangle in page points, origin top-left
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PageRect {
    #[must_use]
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Bounding box of a quad given as `[upper-left, upper-right,
    /// lower-left, lower-right]` corner points
    #[must_use]
    pub fn from_quad(corners: [(f32, f32); 4]) -> Self {
        let [ul, ur, ll, lr] = corners;
        Self {
            x0: ul.0.min(ll.0),
            y0: ul.1.min(ur.1),
            x1: ur.0.max(lr.0),
            y1: ll.1.max(lr.1),
        }
    }

    /// Scale a page-relative rectangle up to page points
    #[must_use]
    pub fn from_relative(rect: TextRect, page: PageSize) -> Self {
        let x0 = rect.x * page.width;
        let y0 = rect.y * page.height;
        Self {
            x0,
            y0,
            x1: x0 + rect.width * page.width,
            y1: y0 + rect.height * page.height,
        }
    }

    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    #[must_use]
    pub fn contains(&self, (x, y): (f32, f32)) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Page-relative rectangle, clamped to `[0, 1]`
    #[must_use]
    pub fn to_relative(&self, page: PageSize) -> TextRect {
        if page.is_empty() {
            return TextRect::new(0.0, 0.0, 0.0, 0.0);
        }
        TextRect::new(
            self.x0 / page.width,
            self.y0 / page.height,
            (self.x1 - self.x0) / page.width,
            (self.y1 - self.y0) / page.height,
        )
        .clamped_unit()
    }
}

/// One character and its box on the page
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CharBox {
    pub ch: char,
    pub bounds: PageRect,
}

/// Characters whose centre falls inside `area`, per line.
///
/// Returns the selected text (lines joined with `\n`) and one rectangle per
/// line that contributed characters, or `None` when nothing is covered.
#[must_use]
pub fn select_chars(lines: &[Vec<CharBox>], area: PageRect) -> Option<(String, Vec<PageRect>)> {
    let mut text = String::new();
    let mut rects = Vec::new();

    for line in lines {
        let mut covered: Option<PageRect> = None;
        let mut line_text = String::new();
        for ch in line.iter().filter(|c| area.contains(c.bounds.center())) {
            line_text.push(ch.ch);
            covered = Some(covered.map_or(ch.bounds, |r| r.union(ch.bounds)));
        }

        let Some(rect) = covered else {
            continue;
        };
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(line_text.trim_end());
        rects.push(rect);
    }

    (!rects.is_empty()).then_some((text, rects))
}

/// Flatten rectangles into `[x, y, w, h, ..]` page-relative values
#[must_use]
pub fn flatten_relative(rects: &[PageRect], page: PageSize) -> Vec<f32> {
    rects
        .iter()
        .flat_map(|r| {
            let rel = r.to_relative(page);
            [rel.x, rel.y, rel.width, rel.height]
        })
        .collect()
}
