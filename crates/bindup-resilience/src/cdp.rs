//! chromiumoxide implementation of [`AutomationDriver`].
//!
//! Handles are not CDP node ids. A query runs a small script that tags each
//! match with a `data-bnd-handle` attribute and returns the tag values;
//! every later call locates the element again through that attribute.

use crate::driver::{AutomationDriver, ElementHandle, PageEvent, Query};
use crate::result::{EngineError, EngineResult};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::inspector::{
    EnableParams as InspectorEnableParams, EventDetached, EventTargetCrashed,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Attribute used to tag matched elements
pub const HANDLE_ATTRIBUTE: &str = "data-bnd-handle";

const QUERY_SCRIPT: &str = r#"
(() => {
  const q = __QUERY__;
  const visibleText = el => (el.innerText || el.textContent || '').trim();
  const nameOf = el => (el.getAttribute('aria-label') || el.getAttribute('title') || visibleText(el)).trim();
  const implicit = {
    button: 'button, [role="button"], input[type="button"], input[type="submit"]',
    link: 'a[href], [role="link"]',
    menuitem: '[role="menuitem"], [role="menuitemcheckbox"], [role="menuitemradio"]',
  };
  let found = [];
  if (q.kind === 'css') {
    found = Array.from(document.querySelectorAll(q.value));
  } else if (q.kind === 'xpath') {
    const snap = document.evaluate(q.value, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    for (let i = 0; i < snap.snapshotLength; i++) {
      const node = snap.snapshotItem(i);
      if (node instanceof Element) found.push(node);
    }
  } else if (q.kind === 'text') {
    const hit = el => q.exact ? visibleText(el) === q.value : visibleText(el).includes(q.value);
    found = Array.from(document.querySelectorAll('body *'))
      .filter(hit)
      .filter(el => !Array.from(el.children).some(hit));
  } else if (q.kind === 'role') {
    const pattern = q.name ? new RegExp(q.name, 'i') : null;
    found = Array.from(document.querySelectorAll(implicit[q.value] || `[role="${q.value}"]`))
      .filter(el => !pattern || pattern.test(nameOf(el)));
  }
  window.__bndSeq = window.__bndSeq || 0;
  return found.map(el => {
    let id = el.getAttribute('__ATTR__');
    if (!id) {
      id = `bnd-${++window.__bndSeq}`;
      el.setAttribute('__ATTR__', id);
    }
    return { id, tag: el.tagName.toLowerCase(), text: visibleText(el).slice(0, 200) };
  });
})()
"#;

#[derive(Debug, Deserialize)]
struct TaggedElement {
    id: String,
    tag: String,
    text: String,
}

fn query_payload(query: &Query) -> serde_json::Value {
    match query {
        Query::Css(value) => serde_json::json!({ "kind": "css", "value": value }),
        Query::XPath(value) => serde_json::json!({ "kind": "xpath", "value": value }),
        Query::Text { text, exact } => {
            serde_json::json!({ "kind": "text", "value": text, "exact": exact })
        }
        Query::Role { role, name } => serde_json::json!({
            "kind": "role",
            "value": role,
            "name": name.as_ref().map(|n| n.as_str()),
        }),
    }
}

fn handle_selector(element: &ElementHandle) -> String {
    format!("[{HANDLE_ATTRIBUTE}=\"{}\"]", element.id.replace('"', "\\\""))
}

/// JS expression resolving the tagged element (or null)
fn locate_js(element: &ElementHandle) -> EngineResult<String> {
    Ok(format!(
        "document.querySelector({})",
        serde_json::to_string(&handle_selector(element))?
    ))
}

fn driver_err(err: impl std::fmt::Display) -> EngineError {
    EngineError::driver(err.to_string())
}

/// Driver over one chromiumoxide page
pub struct CdpDriver {
    page: Page,
    browser: Option<Mutex<Browser>>,
    events: broadcast::Sender<PageEvent>,
    closed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for CdpDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpDriver")
            .field("owns_browser", &self.browser.is_some())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CdpDriver {
    /// Launch Chromium and open a blank page
    ///
    /// # Errors
    ///
    /// Returns error if the browser cannot be launched
    pub async fn launch(headless: bool) -> EngineResult<Self> {
        let mut builder = BrowserConfig::builder();
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(|e| EngineError::driver(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::driver(format!("browser launch failed: {e}")))?;

        let (events, _) = broadcast::channel(16);
        let closed = Arc::new(AtomicBool::new(false));

        let handler_events = events.clone();
        let handler_closed = Arc::clone(&closed);
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            handler_closed.store(true, Ordering::SeqCst);
            let _ = handler_events.send(PageEvent::Closed);
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| EngineError::driver(format!("new page failed: {e}")))?;

        let mut driver = Self::with_channel(page, events, closed).await?;
        driver.browser = Some(Mutex::new(browser));
        driver.tasks.push(handler_task);
        Ok(driver)
    }

    /// Wrap an existing page
    ///
    /// # Errors
    ///
    /// Returns error if lifecycle events cannot be subscribed to
    pub async fn from_page(page: Page) -> EngineResult<Self> {
        let (events, _) = broadcast::channel(16);
        Self::with_channel(page, events, Arc::new(AtomicBool::new(false))).await
    }

    async fn with_channel(
        page: Page,
        events: broadcast::Sender<PageEvent>,
        closed: Arc<AtomicBool>,
    ) -> EngineResult<Self> {
        page.execute(InspectorEnableParams::default())
            .await
            .map_err(driver_err)?;
        let mut crashed = page
            .event_listener::<EventTargetCrashed>()
            .await
            .map_err(driver_err)?;
        let mut detached = page
            .event_listener::<EventDetached>()
            .await
            .map_err(driver_err)?;

        let tx = events.clone();
        let flag = Arc::clone(&closed);
        let listener = tokio::spawn(async move {
            let event = tokio::select! {
                Some(_) = crashed.next() => PageEvent::Crashed,
                Some(detach) = detached.next() => {
                    tracing::debug!(reason = %detach.reason, "inspector detached");
                    PageEvent::Closed
                }
                else => PageEvent::Closed,
            };
            flag.store(true, Ordering::SeqCst);
            let _ = tx.send(event);
        });

        Ok(Self {
            page,
            browser: None,
            events,
            closed,
            tasks: vec![listener],
        })
    }

    /// The underlying page
    #[must_use]
    pub const fn page(&self) -> &Page {
        &self.page
    }

    /// Close the browser if this driver launched it
    ///
    /// # Errors
    ///
    /// Returns error if the browser refuses to close
    pub async fn close(mut self) -> EngineResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(browser) = self.browser.take() {
            let mut browser = browser.into_inner();
            browser.close().await.map_err(driver_err)?;
            let _ = browser.wait().await;
        }
        let _ = self.events.send(PageEvent::Closed);
        Ok(())
    }

    async fn run_js<T: serde::de::DeserializeOwned>(&self, script: &str) -> EngineResult<T> {
        self.ensure_open()?;
        self.page
            .evaluate(script)
            .await
            .map_err(|e| EngineError::Script {
                message: e.to_string(),
            })?
            .into_value()
            .map_err(|e| EngineError::Script {
                message: e.to_string(),
            })
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EngineError::PageClosed)
        } else {
            Ok(())
        }
    }

    async fn element(&self, element: &ElementHandle) -> EngineResult<chromiumoxide::Element> {
        self.ensure_open()?;
        self.page
            .find_element(handle_selector(element))
            .await
            .map_err(|e| EngineError::driver(format!("element {} is detached: {e}", element.id)))
    }
}

impl Drop for CdpDriver {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl AutomationDriver for CdpDriver {
    async fn navigate(&self, url: &str) -> EngineResult<()> {
        self.ensure_open()?;
        self.page
            .goto(url)
            .await
            .map_err(|e| EngineError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn query(&self, query: &Query) -> EngineResult<Vec<ElementHandle>> {
        let script = QUERY_SCRIPT
            .replace("__QUERY__", &query_payload(query).to_string())
            .replace("__ATTR__", HANDLE_ATTRIBUTE);
        let tagged: Vec<TaggedElement> = self.run_js(&script).await?;
        Ok(tagged
            .into_iter()
            .map(|t| {
                let handle = ElementHandle::new(t.id, t.tag);
                if t.text.is_empty() {
                    handle
                } else {
                    handle.with_text(t.text)
                }
            })
            .collect())
    }

    async fn click(&self, element: &ElementHandle, force: bool) -> EngineResult<()> {
        if force {
            let script = format!(
                "(() => {{ const el = {}; if (!el) return false; el.click(); return true; }})()",
                locate_js(element)?
            );
            let clicked: bool = self.run_js(&script).await?;
            if !clicked {
                return Err(EngineError::driver(format!("element {} is detached", element.id)));
            }
            return Ok(());
        }
        self.element(element).await?.click().await.map_err(driver_err)?;
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> EngineResult<()> {
        let target = self.element(element).await?;
        target.click().await.map_err(driver_err)?;
        let clear = format!(
            "(() => {{ const el = {}; if (el && 'value' in el) {{ el.value = ''; }} return true; }})()",
            locate_js(element)?
        );
        let _: bool = self.run_js(&clear).await?;
        target.type_str(text).await.map_err(driver_err)?;
        Ok(())
    }

    async fn hover(&self, element: &ElementHandle) -> EngineResult<()> {
        self.element(element).await?.hover().await.map_err(driver_err)?;
        Ok(())
    }

    async fn is_visible(&self, element: &ElementHandle) -> EngineResult<bool> {
        let script = format!(
            "(() => {{ const el = {}; if (!el) return false; \
             const s = getComputedStyle(el); const r = el.getBoundingClientRect(); \
             return s.display !== 'none' && s.visibility !== 'hidden' && \
             parseFloat(s.opacity || '1') > 0 && r.width > 0 && r.height > 0; }})()",
            locate_js(element)?
        );
        self.run_js(&script).await
    }

    async fn is_attached(&self, element: &ElementHandle) -> EngineResult<bool> {
        let script = format!("(() => {} !== null)()", locate_js(element)?);
        self.run_js(&script).await
    }

    async fn evaluate(&self, script: &str) -> EngineResult<serde_json::Value> {
        self.ensure_open()?;
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| EngineError::Script {
                message: e.to_string(),
            })?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn screenshot(&self) -> EngineResult<Vec<u8>> {
        self.ensure_open()?;
        self.page
            .screenshot(ScreenshotParams::builder().build())
            .await
            .map_err(|e| EngineError::Screenshot {
                message: e.to_string(),
            })
    }

    async fn press_key(&self, key: &str) -> EngineResult<()> {
        self.ensure_open()?;
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key(key)
                .code(key)
                .build()
                .map_err(|e| EngineError::driver(format!("key event: {e}")))?;
            self.page.execute(params).await.map_err(driver_err)?;
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<PageEvent>> {
        Some(self.events.subscribe())
    }

    async fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NamePattern;

    #[test]
    fn test_query_payload() {
        let css = query_payload(&Query::css(".add-block-button"));
        assert_eq!(css["kind"], "css");
        assert_eq!(css["value"], ".add-block-button");

        let role = query_payload(&Query::Role {
            role: "button".into(),
            name: Some(NamePattern::literal("Save").unwrap()),
        });
        assert_eq!(role["name"], "Save");

        let text = query_payload(&Query::Text {
            text: "保存".into(),
            exact: true,
        });
        assert_eq!(text["exact"], true);
    }

    #[test]
    fn test_handle_selector_escapes_quotes() {
        let handle = ElementHandle::new("bnd-\"1", "div");
        assert_eq!(handle_selector(&handle), "[data-bnd-handle=\"bnd-\\\"1\"]");
        assert!(locate_js(&handle).unwrap().starts_with("document.querySelector(\""));
    }

    #[test]
    fn test_query_script_placeholders() {
        let script = QUERY_SCRIPT
            .replace("__QUERY__", &query_payload(&Query::text("x")).to_string())
            .replace("__ATTR__", HANDLE_ATTRIBUTE);
        assert!(!script.contains("__QUERY__"));
        assert!(script.contains("data-bnd-handle"));
    }
}
