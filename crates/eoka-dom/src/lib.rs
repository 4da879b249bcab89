//! # eoka-dom
//!
//! A small in-process document model for exercising DOM-driven code without a
//! browser. Elements carry attributes, text, form state, a layout box and the
//! handful of computed-style properties that matter for visibility checks.
//!
//! Queries support a practical CSS selector subset and positional XPath, and
//! [`Document::element_from_point`] performs hit testing over layout boxes.
//!
//! ## Quick Start
//!
//! ```rust
//! use eoka_dom::{Document, El};
//!
//! let mut doc = Document::new("https://example.com/");
//! let body = doc.body();
//! let button = doc.append(body, El::new("button").id("go").text("Go").rect(10.0, 10.0, 80.0, 30.0));
//!
//! assert_eq!(doc.query_selector("#go").unwrap(), Some(button));
//! assert_eq!(doc.evaluate_xpath("//html[1]/body[1]/button[1]").unwrap(), vec![button]);
//! assert_eq!(doc.element_from_point(50.0, 25.0), Some(button));
//! ```

pub mod css;
pub mod xpath;

use std::collections::HashMap;

/// Result type for document queries.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by selector and XPath evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid xpath '{expr}': {reason}")]
    InvalidXPath { expr: String, reason: String },
}

/// Handle to an element inside a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Axis-aligned box in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when either dimension is zero or negative.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Half-open containment: left/top edges are inside, right/bottom are not.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Display {
    #[default]
    Block,
    Inline,
    None,
}

impl Display {
    pub fn as_str(&self) -> &'static str {
        match self {
            Display::Block => "block",
            Display::Inline => "inline",
            Display::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Visible => "visible",
            Visibility::Hidden => "hidden",
        }
    }
}

/// Style properties set directly on an element.
#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub display: Display,
    /// `None` inherits from the parent.
    pub visibility: Option<Visibility>,
    pub opacity: f64,
    /// Stacking layer. Zero inherits the parent's layer.
    pub z_index: i32,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            display: Display::Block,
            visibility: None,
            opacity: 1.0,
            z_index: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    tag: String,
    attrs: Vec<(String, String)>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    text: String,
    value: String,
    checked: bool,
    style: Style,
    rect: Rect,
}

/// Declarative element description used to build trees.
#[derive(Debug, Clone, Default)]
pub struct El {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    value: String,
    checked: bool,
    style: Style,
    rect: Rect,
    children: Vec<El>,
}

impl El {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        self.attrs.retain(|(n, _)| *n != name);
        self.attrs.push((name, value.to_string()));
        self
    }

    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    pub fn class(self, class: &str) -> Self {
        self.attr("class", class)
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }

    pub fn rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Rect::new(x, y, width, height);
        self
    }

    pub fn style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    /// Shorthand for `display: none`.
    pub fn hidden(mut self) -> Self {
        self.style.display = Display::None;
        self
    }

    pub fn child(mut self, child: El) -> Self {
        self.children.push(child);
        self
    }
}

/// An element tree plus the window state around it.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    url: String,
    user_agent: String,
    viewport: (f64, f64),
    scroll: (f64, f64),
    focused: Option<NodeId>,
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) eoka-dom/0.1";

impl Document {
    /// Empty `html > head + body` document with a 1280x720 viewport.
    pub fn new(url: impl Into<String>) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            url: url.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport: (1280.0, 720.0),
            scroll: (0.0, 0.0),
            focused: None,
        };
        let root = doc.create_element("html");
        let head = doc.create_element("head");
        let body = doc.create_element("body");
        doc.append_child(root, head);
        doc.append_child(root, body);
        doc.root = root;
        doc.head = head;
        doc.body = body;
        doc.set_viewport(1280.0, 720.0);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn set_user_agent(&mut self, ua: impl Into<String>) {
        self.user_agent = ua.into();
    }

    pub fn viewport(&self) -> (f64, f64) {
        self.viewport
    }

    /// Resize the viewport. The root and body boxes follow it.
    pub fn set_viewport(&mut self, width: f64, height: f64) {
        self.viewport = (width, height);
        let full = Rect::new(0.0, 0.0, width, height);
        self.nodes[self.root.0].rect = full;
        self.nodes[self.body.0].rect = full;
    }

    pub fn scroll_position(&self) -> (f64, f64) {
        self.scroll
    }

    pub fn scroll_to(&mut self, x: f64, y: f64) {
        self.scroll = (x.max(0.0), y.max(0.0));
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused.filter(|n| self.is_attached(*n))
    }

    pub fn focus(&mut self, node: NodeId) {
        self.focused = Some(node);
    }

    pub fn blur(&mut self, node: NodeId) {
        if self.focused == Some(node) {
            self.focused = None;
        }
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        });
        id
    }

    /// Build `el` (and its children) and append it under `parent`.
    pub fn append(&mut self, parent: NodeId, el: El) -> NodeId {
        let id = self.materialize(el);
        self.append_child(parent, id);
        id
    }

    fn materialize(&mut self, el: El) -> NodeId {
        let id = self.create_element(&el.tag);
        {
            let node = &mut self.nodes[id.0];
            node.attrs = el.attrs;
            node.text = el.text;
            node.value = el.value;
            node.checked = el.checked;
            node.style = el.style;
            node.rect = el.rect;
        }
        for child in el.children {
            let child = self.materialize(child);
            self.append_child(id, child);
        }
        id
    }

    /// Move `child` to the end of `parent`'s children.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Insert `child` under `parent` before `reference`, or at the end.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        self.detach(child);
        let children = &mut self.nodes[parent.0].children;
        let at = reference
            .and_then(|r| children.iter().position(|c| *c == r))
            .unwrap_or(children.len());
        children.insert(at, child);
        self.nodes[child.0].parent = Some(parent);
    }

    /// Remove `node` from its parent. The subtree stays addressable but is no
    /// longer reachable by queries.
    pub fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != node);
        }
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut cur = node;
        loop {
            if cur == self.root {
                return true;
            }
            match self.nodes[cur.0].parent {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    pub fn tag(&self, node: NodeId) -> &str {
        &self.nodes[node.0].tag
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.nodes[node.0]
            .attrs
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        let attrs = &mut self.nodes[node.0].attrs;
        match attrs.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => attrs.push((name, value.to_string())),
        }
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        let name = name.to_ascii_lowercase();
        self.nodes[node.0].attrs.retain(|(n, _)| *n != name);
    }

    pub fn classes(&self, node: NodeId) -> Vec<&str> {
        self.attr(node, "class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Own text followed by the text of all descendants, in tree order.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = self.nodes[node.0].text.clone();
        for child in &self.nodes[node.0].children {
            out.push_str(&self.text_content(*child));
        }
        out
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) {
        self.nodes[node.0].text = text.to_string();
    }

    pub fn value(&self, node: NodeId) -> &str {
        &self.nodes[node.0].value
    }

    pub fn set_value(&mut self, node: NodeId, value: &str) {
        self.nodes[node.0].value = value.to_string();
    }

    pub fn checked(&self, node: NodeId) -> bool {
        self.nodes[node.0].checked
    }

    pub fn set_checked(&mut self, node: NodeId, checked: bool) {
        self.nodes[node.0].checked = checked;
    }

    pub fn style(&self, node: NodeId) -> &Style {
        &self.nodes[node.0].style
    }

    pub fn style_mut(&mut self, node: NodeId) -> &mut Style {
        &mut self.nodes[node.0].style
    }

    pub fn set_rect(&mut self, node: NodeId, rect: Rect) {
        self.nodes[node.0].rect = rect;
    }

    /// Layout box as rendered: empty when the element or any ancestor is
    /// `display: none`, or when the element is detached.
    pub fn bounding_rect(&self, node: NodeId) -> Rect {
        if !self.is_attached(node) || self.inclusive_ancestors(node).any(|n| {
            self.nodes[n.0].style.display == Display::None
        }) {
            return Rect::default();
        }
        self.nodes[node.0].rect
    }

    pub fn computed_visibility(&self, node: NodeId) -> Visibility {
        self.inclusive_ancestors(node)
            .find_map(|n| self.nodes[n.0].style.visibility)
            .unwrap_or_default()
    }

    fn layer(&self, node: NodeId) -> i32 {
        self.inclusive_ancestors(node)
            .map(|n| self.nodes[n.0].style.z_index)
            .find(|z| *z != 0)
            .unwrap_or(0)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    /// `node`, then its parent, and so on up to the root.
    pub fn inclusive_ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), move |n| self.nodes[n.0].parent)
    }

    /// Inclusive: a node contains itself.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.inclusive_ancestors(node).any(|n| n == ancestor)
    }

    fn siblings(&self, node: NodeId) -> &[NodeId] {
        match self.nodes[node.0].parent {
            Some(p) => &self.nodes[p.0].children,
            None => &[],
        }
    }

    /// 1-based position among siblings sharing this tag, and how many there are.
    /// The root element reports `(1, 1)`.
    pub fn same_tag_position(&self, node: NodeId) -> (usize, usize) {
        if self.nodes[node.0].parent.is_none() {
            return (1, 1);
        }
        let tag = &self.nodes[node.0].tag;
        let same: Vec<NodeId> = self
            .siblings(node)
            .iter()
            .copied()
            .filter(|s| self.nodes[s.0].tag == *tag)
            .collect();
        let index = same.iter().position(|s| *s == node).map_or(1, |i| i + 1);
        (index, same.len())
    }

    /// 1-based position among all siblings, and how many there are.
    pub fn child_position(&self, node: NodeId) -> (usize, usize) {
        if self.nodes[node.0].parent.is_none() {
            return (1, 1);
        }
        let siblings = self.siblings(node);
        let index = siblings.iter().position(|s| *s == node).map_or(1, |i| i + 1);
        (index, siblings.len())
    }

    pub fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        let siblings = self.siblings(node);
        let at = siblings.iter().position(|s| *s == node)?;
        at.checked_sub(1).map(|i| siblings[i])
    }

    /// Attached elements in document order.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.nodes[node.0].children.iter().rev().copied());
        }
        out
    }

    pub(crate) fn document_order(&self) -> HashMap<NodeId, usize> {
        self.walk()
            .into_iter()
            .enumerate()
            .map(|(i, n)| (n, i))
            .collect()
    }

    /// All attached elements matching a CSS selector list, in document order.
    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let list = css::parse(selector)?;
        Ok(self
            .walk()
            .into_iter()
            .filter(|n| list.matches(self, *n))
            .collect())
    }

    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        Ok(self.query_selector_all(selector)?.into_iter().next())
    }

    pub fn matches(&self, node: NodeId, selector: &str) -> Result<bool> {
        Ok(css::parse(selector)?.matches(self, node))
    }

    /// Nodes selected by an XPath location path, in document order.
    pub fn evaluate_xpath(&self, expr: &str) -> Result<Vec<NodeId>> {
        let path = xpath::parse(expr)?;
        Ok(path.evaluate(self))
    }

    /// Topmost rendered element under a viewport point.
    ///
    /// Points outside the viewport hit nothing. Elements with an empty box or
    /// `visibility: hidden` are transparent to hit testing; the highest layer
    /// wins and later elements win within a layer.
    pub fn element_from_point(&self, x: f64, y: f64) -> Option<NodeId> {
        let (vw, vh) = self.viewport;
        if x < 0.0 || y < 0.0 || x >= vw || y >= vh {
            return None;
        }
        let mut best: Option<(i32, NodeId)> = None;
        for node in self.walk() {
            let rect = self.bounding_rect(node);
            if rect.is_empty()
                || !rect.contains(x, y)
                || self.computed_visibility(node) == Visibility::Hidden
            {
                continue;
            }
            let layer = self.layer(node);
            if best.map_or(true, |(z, _)| layer >= z) {
                best = Some((layer, node));
            }
        }
        best.map(|(_, n)| n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId) {
        let mut doc = Document::new("https://example.com/");
        let body = doc.body();
        let form = doc.append(
            body,
            El::new("form")
                .id("login")
                .rect(0.0, 0.0, 400.0, 200.0)
                .child(El::new("input").attr("name", "user").rect(10.0, 10.0, 200.0, 20.0))
                .child(El::new("button").text(" Sign in ").rect(10.0, 40.0, 100.0, 30.0)),
        );
        let button = doc.children(form)[1];
        (doc, form, button)
    }

    #[test]
    fn test_new_document_shape() {
        let doc = Document::new("about:blank");
        assert_eq!(doc.tag(doc.root()), "html");
        assert_eq!(doc.children(doc.root()), &[doc.head(), doc.body()]);
        assert_eq!(doc.bounding_rect(doc.body()), Rect::new(0.0, 0.0, 1280.0, 720.0));
    }

    #[test]
    fn test_text_content_concatenates() {
        let (doc, form, _) = sample();
        assert_eq!(doc.text_content(form), " Sign in ");
    }

    #[test]
    fn test_detach_hides_from_queries() {
        let (mut doc, form, button) = sample();
        assert_eq!(doc.query_selector("button").unwrap(), Some(button));
        doc.detach(form);
        assert!(!doc.is_attached(button));
        assert_eq!(doc.query_selector("button").unwrap(), None);
        assert!(doc.bounding_rect(button).is_empty());
    }

    #[test]
    fn test_same_tag_position() {
        let mut doc = Document::new("about:blank");
        let body = doc.body();
        let a = doc.append(body, El::new("div"));
        let _p = doc.append(body, El::new("p"));
        let b = doc.append(body, El::new("div"));
        assert_eq!(doc.same_tag_position(a), (1, 2));
        assert_eq!(doc.same_tag_position(b), (2, 2));
        assert_eq!(doc.child_position(b), (3, 3));
        assert_eq!(doc.same_tag_position(doc.root()), (1, 1));
    }

    #[test]
    fn test_display_none_collapses_descendants() {
        let (mut doc, form, button) = sample();
        doc.style_mut(form).display = Display::None;
        assert!(doc.bounding_rect(button).is_empty());
    }

    #[test]
    fn test_visibility_inherits() {
        let (mut doc, form, button) = sample();
        doc.style_mut(form).visibility = Some(Visibility::Hidden);
        assert_eq!(doc.computed_visibility(button), Visibility::Hidden);
        doc.style_mut(button).visibility = Some(Visibility::Visible);
        assert_eq!(doc.computed_visibility(button), Visibility::Visible);
    }

    #[test]
    fn test_element_from_point_topmost() {
        let (mut doc, _, button) = sample();
        assert_eq!(doc.element_from_point(20.0, 50.0), Some(button));

        let body = doc.body();
        let overlay = doc.append(
            body,
            El::new("div")
                .rect(0.0, 0.0, 1280.0, 720.0)
                .style(Style {
                    z_index: 10,
                    ..Default::default()
                }),
        );
        assert_eq!(doc.element_from_point(20.0, 50.0), Some(overlay));
        assert_eq!(doc.element_from_point(-1.0, 50.0), None);
        assert_eq!(doc.element_from_point(20.0, 720.0), None);
    }

    #[test]
    fn test_element_from_point_skips_hidden() {
        let (mut doc, form, button) = sample();
        doc.style_mut(button).visibility = Some(Visibility::Hidden);
        assert_eq!(doc.element_from_point(20.0, 50.0), Some(form));
    }

    #[test]
    fn test_focus_and_blur() {
        let (mut doc, _, button) = sample();
        doc.focus(button);
        assert_eq!(doc.focused(), Some(button));
        doc.blur(button);
        assert_eq!(doc.focused(), None);
    }

    #[test]
    fn test_insert_before() {
        let mut doc = Document::new("about:blank");
        let body = doc.body();
        let b = doc.append(body, El::new("b"));
        let a = doc.create_element("a");
        doc.insert_before(body, a, Some(b));
        assert_eq!(doc.children(body), &[a, b]);
    }
}
