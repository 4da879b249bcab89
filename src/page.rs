//! The platform seam: everything the recorder and player need from a page.

use crate::model::{Point, Viewport};
use crate::synthetic::SyntheticEvent;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One level of an element's ancestry, used to fingerprint it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageEntry {
    /// Lowercase tag name.
    pub tag: String,
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    pub test_id: Option<String>,
    pub data_id: Option<String>,
    /// 1-based position among element siblings with the same tag.
    pub same_tag_index: usize,
    pub same_tag_count: usize,
}

/// Form-relevant state of an element.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementState {
    pub tag: String,
    /// The `type` attribute, if any.
    pub input_type: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: f64,
}

impl ComputedStyle {
    /// Hidden by style alone, regardless of geometry.
    pub fn hides(&self) -> bool {
        self.display == "none" || self.visibility == "hidden" || self.opacity == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Zero-sized boxes are treated as not rendered.
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Midpoint, in the same viewport coordinates as the box.
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// A live document the engines can query and drive.
///
/// `Node` is an opaque element handle. Handles may go stale when the page
/// mutates; operations on a stale handle fail with [`crate::Error::Dispatch`]
/// or report the element as absent.
#[async_trait]
pub trait Page: Send + Sync {
    type Node: Clone + PartialEq + fmt::Debug + Send + Sync;

    async fn url(&self) -> Result<String>;
    async fn navigate(&self, url: &str) -> Result<()>;
    /// Block until a navigation has produced a usable document.
    async fn wait_for_load(&self) -> Result<()>;

    /// All matches in document order. Malformed input is
    /// [`crate::Error::InvalidSelector`].
    async fn query_css(&self, selector: &str) -> Result<Vec<Self::Node>>;
    /// First match in document order.
    async fn query_xpath(&self, expr: &str) -> Result<Option<Self::Node>>;
    /// The element first, then each ancestor up to the root element.
    async fn lineage(&self, node: &Self::Node) -> Result<Vec<LineageEntry>>;

    async fn element_state(&self, node: &Self::Node) -> Result<ElementState>;
    async fn computed_style(&self, node: &Self::Node) -> Result<ComputedStyle>;
    async fn bounding_rect(&self, node: &Self::Node) -> Result<Rect>;
    async fn element_from_point(&self, at: Point) -> Result<Option<Self::Node>>;
    /// Inclusive: every node contains itself.
    async fn contains(&self, ancestor: &Self::Node, node: &Self::Node) -> Result<bool>;
    async fn active_element(&self) -> Result<Option<Self::Node>>;

    /// Fire `event` at `target`, or at the focused element (falling back to
    /// the document body) when `target` is `None`.
    async fn dispatch(&self, target: Option<&Self::Node>, event: &SyntheticEvent) -> Result<()>;
    async fn focus(&self, node: &Self::Node) -> Result<()>;
    async fn blur(&self, node: &Self::Node) -> Result<()>;
    async fn set_value(&self, node: &Self::Node, value: &str) -> Result<()>;
    async fn set_checked(&self, node: &Self::Node, checked: bool) -> Result<()>;
    async fn scroll_to(&self, position: Point, smooth: bool) -> Result<()>;

    async fn scroll_position(&self) -> Result<Point>;
    async fn viewport(&self) -> Result<Viewport>;
    async fn user_agent(&self) -> Result<String>;
}
