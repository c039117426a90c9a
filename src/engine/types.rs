//! Value types handed across the session boundary

use std::fmt;

use serde::Serialize;

/// Opaque identifier of an engine session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Rectangle in page-relative coordinates.
///
/// `x`/`y` is the top-left corner; all four values are fractions of the page
/// width and height in `[0, 1]` when produced by the accelerated capability.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TextRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl TextRect {
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Group a flat `[x, y, w, h, x, y, w, h, ..]` list into rectangles.
    /// A trailing partial group is dropped.
    #[must_use]
    pub fn from_flat(values: &[f32]) -> Vec<Self> {
        values
            .chunks_exact(4)
            .map(|c| Self::new(c[0], c[1], c[2], c[3]))
            .collect()
    }

    /// Clamp every component into `[0, 1]`
    #[must_use]
    pub fn clamped_unit(self) -> Self {
        let unit = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self::new(
            unit(self.x),
            unit(self.y),
            unit(self.width),
            unit(self.height),
        )
    }
}

/// A single search match
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub page_index: usize,
    /// Zero-based occurrence counter within the page scan
    pub match_index: usize,
    /// Surrounding context or the verbatim match
    pub text: String,
    /// Match geometry; absent when the producer has none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rects: Option<Vec<TextRect>>,
}

/// Text picked up under a selection rectangle.
/// Only ever constructed with at least one rectangle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextSelection {
    pub text: String,
    pub rects: Vec<TextRect>,
}

/// Node of the document bookmark forest
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineNode {
    pub title: String,
    /// Destination page, `-1` when the bookmark has no resolvable page
    pub page_index: i32,
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    /// Total number of nodes in this subtree, including `self`
    #[must_use]
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Self::subtree_len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_flat_drops_partial_group() {
        let rects = TextRect::from_flat(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert_eq!(rects, vec![TextRect::new(0.1, 0.2, 0.3, 0.4)]);
        assert!(TextRect::from_flat(&[0.1, 0.2, 0.3]).is_empty());
    }

    #[test]
    fn clamped_unit_handles_out_of_range_and_nan() {
        let rect = TextRect::new(-0.5, 1.5, f32::NAN, 0.25).clamped_unit();
        assert_eq!(rect, TextRect::new(0.0, 1.0, 0.0, 0.25));
    }

    #[test]
    fn hit_serializes_without_absent_rects() {
        let hit = SearchHit {
            page_index: 1,
            match_index: 0,
            text: "needle".to_string(),
            rects: None,
        };
        let json = serde_json::to_string(&hit).unwrap();
        assert_eq!(json, r#"{"pageIndex":1,"matchIndex":0,"text":"needle"}"#);
    }

    #[test]
    fn subtree_len_counts_nested_children() {
        let node = OutlineNode {
            title: "root".into(),
            page_index: 0,
            children: vec![
                OutlineNode::default(),
                OutlineNode {
                    children: vec![OutlineNode::default()],
                    ..OutlineNode::default()
                },
            ],
        };
        assert_eq!(node.subtree_len(), 4);
    }
}
