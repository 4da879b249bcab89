//! [`Page`] over a Chrome tab driven by eoka.
//!
//! Element handles are absolute XPath strings (`/html[1]/body[1]/form[1]`)
//! computed in the page. A handle that no longer resolves is reported as a
//! dispatch failure, the same as a detached node in the headless backend.

pub mod capture;

use crate::config::BrowserConfig;
use crate::model::{Point, Viewport};
use crate::page::{ComputedStyle, ElementState, LineageEntry, Page, Rect};
use crate::synthetic::SyntheticEvent;
use crate::wait::poll_until;
use crate::{Error, Result};
use async_trait::async_trait;
use eoka::Browser;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// `el => "/html[1]/body[1]/..."`, shared by the bridge and the capture shim.
pub(crate) const PATH_JS: &str = r#"
(el => {
    const parts = [];
    for (let n = el; n && n.nodeType === 1; n = n.parentElement) {
        let i = 1;
        for (let s = n.previousElementSibling; s; s = s.previousElementSibling) {
            if (s.localName === n.localName) i++;
        }
        parts.unshift(n.localName + '[' + i + ']');
    }
    return '/' + parts.join('/');
})
"#;

/// `el => [LineageEntry]`, the element first.
pub(crate) const LINEAGE_JS: &str = r#"
(el => {
    const out = [];
    for (let n = el; n && n.nodeType === 1; n = n.parentElement) {
        const same = n.parentElement
            ? [...n.parentElement.children].filter(c => c.localName === n.localName)
            : [n];
        out.push({
            tag: n.localName,
            id: n.id || null,
            classes: [...n.classList],
            testId: n.getAttribute('data-testid'),
            dataId: n.getAttribute('data-id'),
            sameTagIndex: same.indexOf(n) + 1,
            sameTagCount: same.length,
        });
    }
    return out;
})
"#;

/// `el => ElementState`.
pub(crate) const STATE_JS: &str = r#"
(el => ({
    tag: el.localName,
    inputType: el.getAttribute('type'),
    value: typeof el.value === 'string' ? el.value : '',
    checked: !!el.checked,
    text: el.textContent || '',
}))
"#;

/// Every page query goes through this one function:
/// `(path, lineage, state, op, args, event) => JSON string`.
const BRIDGE_JS: &str = r#"
((path, lineage, state, op, a, ev) => {
    const node = p => {
        try {
            return document.evaluate(p, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
        } catch (e) {
            return null;
        }
    };
    const run = () => {
        switch (op) {
            case 'css':
                try { return [...document.querySelectorAll(a.selector)].map(path); }
                catch (e) { return { __invalid: String(e.message || e) }; }
            case 'xpath':
                try {
                    const el = document.evaluate(a.expr, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
                    return el && el.nodeType === 1 ? path(el) : null;
                } catch (e) { return { __invalid: String(e.message || e) }; }
            case 'fromPoint': {
                const el = document.elementFromPoint(a.x, a.y);
                return el ? path(el) : null;
            }
            case 'active': {
                const el = document.activeElement;
                return el && el !== document.body ? path(el) : null;
            }
            case 'env':
                return {
                    url: location.href,
                    userAgent: navigator.userAgent,
                    scroll: { x: window.scrollX, y: window.scrollY },
                    viewport: { width: window.innerWidth, height: window.innerHeight },
                };
            case 'ready':
                return document.readyState === 'complete';
            case 'scrollTo':
                window.scrollTo({ left: a.x, top: a.y, behavior: a.smooth ? 'smooth' : 'auto' });
                return true;
        }
        const el = a.node ? node(a.node) : (document.activeElement || document.body);
        if (!el) return { __stale: true };
        switch (op) {
            case 'lineage': return lineage(el);
            case 'state': return state(el);
            case 'style': {
                const s = getComputedStyle(el);
                return { display: s.display, visibility: s.visibility, opacity: parseFloat(s.opacity) };
            }
            case 'rect': {
                const r = el.getBoundingClientRect();
                return { x: r.x, y: r.y, width: r.width, height: r.height };
            }
            case 'contains': {
                const other = node(a.other);
                return !!other && el.contains(other);
            }
            case 'dispatch': el.dispatchEvent(ev); return true;
            case 'focus': el.focus(); return true;
            case 'blur': el.blur(); return true;
            case 'setValue': el.value = a.value; return true;
            case 'setChecked': el.checked = a.checked; return true;
        }
        return { __invalid: 'unknown operation ' + op };
    };
    const out = run();
    return JSON.stringify(out === undefined ? null : out);
})
"#;

/// Build the expression for one bridge call.
fn bridge_call(op: &str, args: &Value, event_js: Option<&str>) -> String {
    format!(
        "{}({}, {}, {}, {}, {}, {})",
        BRIDGE_JS,
        PATH_JS,
        LINEAGE_JS,
        STATE_JS,
        Value::String(op.to_string()),
        args,
        event_js.unwrap_or("null")
    )
}

/// Turn a bridge reply into `T`, mapping the in-page error markers.
fn decode<T: DeserializeOwned>(raw: &str, subject: &str) -> Result<T> {
    let value: Value = serde_json::from_str(raw)?;
    if value.get("__stale").is_some() {
        return Err(Error::Dispatch(format!(
            "{} is no longer in the document",
            subject
        )));
    }
    if let Some(reason) = value.get("__invalid").and_then(Value::as_str) {
        return Err(Error::InvalidSelector {
            selector: subject.to_string(),
            reason: reason.to_string(),
        });
    }
    Ok(serde_json::from_value(value)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Env {
    user_agent: String,
    scroll: Point,
    viewport: Viewport,
}

/// A launched browser and the tab recordings are made in.
pub struct EokaPage {
    browser: Browser,
    page: eoka::Page,
    load_timeout: Duration,
}

impl EokaPage {
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.as_ref().map(|v| v.width).unwrap_or(1280),
            viewport_height: config.viewport.as_ref().map(|v| v.height).unwrap_or(720),
            ..Default::default()
        };

        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;
        Ok(Self {
            browser,
            page,
            load_timeout: Duration::from_secs(15),
        })
    }

    /// The underlying eoka tab.
    pub fn inner(&self) -> &eoka::Page {
        &self.page
    }

    pub async fn close(self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(&self, op: &str, args: Value, subject: &str) -> Result<T> {
        let raw: String = self.page.evaluate(&bridge_call(op, &args, None)).await?;
        decode(&raw, subject)
    }

    async fn env(&self) -> Result<Env> {
        self.call("env", json!({}), "window").await
    }
}

#[async_trait]
impl Page for EokaPage {
    type Node = String;

    async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?)
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn wait_for_load(&self) -> Result<()> {
        let ready = poll_until(Duration::from_millis(100), Some(self.load_timeout), || async {
            // The context is torn down mid-navigation; treat that as not ready.
            match self.call::<bool>("ready", json!({}), "document").await {
                Ok(true) => Ok(Some(())),
                Ok(false) | Err(Error::Browser(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?;
        if ready.is_none() {
            warn!("Page did not finish loading within {:?}", self.load_timeout);
        }
        // Best-effort: some sites never stop polling.
        let _ = self.page.wait_for_network_idle(200, 2000).await;
        Ok(())
    }

    async fn query_css(&self, selector: &str) -> Result<Vec<String>> {
        self.call("css", json!({ "selector": selector }), selector).await
    }

    async fn query_xpath(&self, expr: &str) -> Result<Option<String>> {
        self.call("xpath", json!({ "expr": expr }), expr).await
    }

    async fn lineage(&self, node: &String) -> Result<Vec<LineageEntry>> {
        self.call("lineage", json!({ "node": node }), node).await
    }

    async fn element_state(&self, node: &String) -> Result<ElementState> {
        self.call("state", json!({ "node": node }), node).await
    }

    async fn computed_style(&self, node: &String) -> Result<ComputedStyle> {
        self.call("style", json!({ "node": node }), node).await
    }

    async fn bounding_rect(&self, node: &String) -> Result<Rect> {
        self.call("rect", json!({ "node": node }), node).await
    }

    async fn element_from_point(&self, at: Point) -> Result<Option<String>> {
        self.call("fromPoint", json!({ "x": at.x, "y": at.y }), "point").await
    }

    async fn contains(&self, ancestor: &String, node: &String) -> Result<bool> {
        self.call(
            "contains",
            json!({ "node": ancestor, "other": node }),
            ancestor,
        )
        .await
    }

    async fn active_element(&self) -> Result<Option<String>> {
        self.call("active", json!({}), "document").await
    }

    async fn dispatch(&self, target: Option<&String>, event: &SyntheticEvent) -> Result<()> {
        let subject = target.map_or("focused element", String::as_str);
        let js = bridge_call("dispatch", &json!({ "node": target }), Some(&event.to_js()));
        let raw: String = self.page.evaluate(&js).await?;
        decode::<bool>(&raw, subject)?;
        Ok(())
    }

    async fn focus(&self, node: &String) -> Result<()> {
        self.call::<bool>("focus", json!({ "node": node }), node).await?;
        Ok(())
    }

    async fn blur(&self, node: &String) -> Result<()> {
        self.call::<bool>("blur", json!({ "node": node }), node).await?;
        Ok(())
    }

    async fn set_value(&self, node: &String, value: &str) -> Result<()> {
        self.call::<bool>("setValue", json!({ "node": node, "value": value }), node)
            .await?;
        Ok(())
    }

    async fn set_checked(&self, node: &String, checked: bool) -> Result<()> {
        self.call::<bool>("setChecked", json!({ "node": node, "checked": checked }), node)
            .await?;
        Ok(())
    }

    async fn scroll_to(&self, position: Point, smooth: bool) -> Result<()> {
        self.call::<bool>(
            "scrollTo",
            json!({ "x": position.x, "y": position.y, "smooth": smooth }),
            "window",
        )
        .await?;
        Ok(())
    }

    async fn scroll_position(&self) -> Result<Point> {
        Ok(self.env().await?.scroll)
    }

    async fn viewport(&self) -> Result<Viewport> {
        Ok(self.env().await?.viewport)
    }

    async fn user_agent(&self) -> Result<String> {
        Ok(self.env().await?.user_agent)
    }
}
