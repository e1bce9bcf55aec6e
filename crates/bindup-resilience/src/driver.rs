//! Automation driver abstraction.
//!
//! The engine never talks to a browser directly. Everything goes through
//! [`AutomationDriver`], so the same resolution and retry logic runs against
//! chromiumoxide (`browser` feature) or the in-memory [`MockDriver`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  AutomationDriver (trait)                                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐            ┌────────────────────┐    │
//! │  │  CdpDriver         │            │  MockDriver        │    │
//! │  │  chromiumoxide     │            │  in-memory DOM     │    │
//! │  └────────────────────┘            └────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use crate::result::{EngineError, EngineResult};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Polling interval used by the default `wait_for`
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Opaque element handle.
///
/// Owned by the automation layer. Only valid for the operation that produced
/// it; never keep one across a navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Driver-assigned identifier
    pub id: String,
    /// Element tag name
    pub tag_name: String,
    /// Text content at query time
    pub text: Option<String>,
}

impl ElementHandle {
    /// Create a new element handle
    #[must_use]
    pub fn new(id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag_name: tag_name.into(),
            text: None,
        }
    }

    /// Attach text content
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Element state to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementState {
    /// Attached and visible
    Visible,
    /// Detached or not visible
    Hidden,
    /// Present in the DOM
    Attached,
    /// Gone from the DOM
    Detached,
}

impl std::fmt::Display for ElementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Visible => "visible",
            Self::Hidden => "hidden",
            Self::Attached => "attached",
            Self::Detached => "detached",
        })
    }
}

/// Case-insensitive pattern over an accessible name
#[derive(Debug, Clone)]
pub struct NamePattern {
    regex: Regex,
}

impl NamePattern {
    /// Match names containing `literal`, ignoring case
    pub fn literal(literal: &str) -> EngineResult<Self> {
        Self::regex(&regex::escape(literal.trim()))
    }

    /// Match names against a regular expression, ignoring case
    pub fn regex(pattern: &str) -> EngineResult<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| EngineError::config(format!("invalid name pattern {pattern:?}: {e}")))?;
        Ok(Self { regex })
    }

    /// Test a name
    #[must_use]
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// Pattern source
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for NamePattern {}

/// Driver-level lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// CSS selector
    Css(String),
    /// XPath expression
    XPath(String),
    /// Text content match
    Text {
        /// Text to match
        text: String,
        /// Whole-text match instead of substring
        exact: bool,
    },
    /// ARIA role, optionally filtered by accessible name
    Role {
        /// Role name (`button`, `link`, `menuitem`, ...)
        role: String,
        /// Accessible-name filter
        name: Option<NamePattern>,
    },
}

impl Query {
    /// CSS query
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Substring text query
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            exact: false,
        }
    }

    /// Role query without a name filter
    #[must_use]
    pub fn role(role: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: None,
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={s}"),
            Self::XPath(s) => write!(f, "xpath={s}"),
            Self::Text { text, exact: true } => write!(f, "text=\"{text}\""),
            Self::Text { text, exact: false } => write!(f, "text={text}"),
            Self::Role { role, name: None } => write!(f, "role={role}"),
            Self::Role {
                role,
                name: Some(name),
            } => write!(f, "role={role}[name=/{}/i]", name.as_str()),
        }
    }
}

/// Page lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageEvent {
    /// Page was closed
    Closed,
    /// Renderer crashed
    Crashed,
}

/// Browser-automation primitive consumed by the engine
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Navigate to URL
    async fn navigate(&self, url: &str) -> EngineResult<()>;

    /// All elements matching a query, in document order
    async fn query(&self, query: &Query) -> EngineResult<Vec<ElementHandle>>;

    /// Click an element; `force` skips actionability checks
    async fn click(&self, element: &ElementHandle, force: bool) -> EngineResult<()>;

    /// Replace an input's value
    async fn fill(&self, element: &ElementHandle, text: &str) -> EngineResult<()>;

    /// Move the pointer over an element
    async fn hover(&self, element: &ElementHandle) -> EngineResult<()>;

    /// Whether the element is rendered and visible
    async fn is_visible(&self, element: &ElementHandle) -> EngineResult<bool>;

    /// Whether the element is still in the DOM
    async fn is_attached(&self, element: &ElementHandle) -> EngineResult<bool>;

    /// Wait until the element reaches `state`
    async fn wait_for(
        &self,
        element: &ElementHandle,
        state: ElementState,
        timeout: Duration,
    ) -> EngineResult<()> {
        let start = Instant::now();
        loop {
            let reached = match state {
                ElementState::Visible => self.is_visible(element).await?,
                ElementState::Hidden => !self.is_visible(element).await?,
                ElementState::Attached => self.is_attached(element).await?,
                ElementState::Detached => !self.is_attached(element).await?,
            };
            if reached {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(EngineError::timeout(timeout));
            }
            tokio::time::sleep(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)).await;
        }
    }

    /// Evaluate a script in the page
    async fn evaluate(&self, script: &str) -> EngineResult<serde_json::Value>;

    /// Force elements matching a CSS query visible; returns how many changed
    async fn force_visible(&self, selector: &str) -> EngineResult<usize> {
        let script = format!(
            "(() => {{ const els = document.querySelectorAll({selector:?}); \
             els.forEach(el => {{ el.style.setProperty('display', 'block', 'important'); \
             el.style.setProperty('visibility', 'visible', 'important'); \
             el.style.setProperty('opacity', '1', 'important'); }}); \
             return els.length; }})()"
        );
        let value = self.evaluate(&script).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    /// Capture a PNG screenshot
    async fn screenshot(&self) -> EngineResult<Vec<u8>>;

    /// Send a key press to the focused element
    async fn press_key(&self, key: &str) -> EngineResult<()>;

    /// Subscribe to page close/crash notifications
    fn subscribe(&self) -> Option<broadcast::Receiver<PageEvent>> {
        None
    }

    /// Whether the page is gone
    async fn is_closed(&self) -> bool {
        false
    }
}

// ============================================================================
// Mock driver
// ============================================================================

/// Element in the mock DOM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockElement {
    /// Identifier (also matches `#id`)
    pub id: String,
    /// Tag name
    pub tag_name: String,
    /// CSS/XPath selectors this element answers to
    pub selectors: Vec<String>,
    /// Text content
    pub text: String,
    /// ARIA role
    pub role: Option<String>,
    /// Accessible name (falls back to text)
    pub name: Option<String>,
    /// Whether currently visible
    pub visible: bool,
    /// Elements made visible when this one is hovered
    pub reveals: Vec<String>,
    /// Elements removed when this one is clicked
    pub removes_on_click: Vec<String>,
}

impl MockElement {
    /// Create a visible element
    #[must_use]
    pub fn new(id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag_name: tag_name.into(),
            selectors: Vec::new(),
            text: String::new(),
            role: None,
            name: None,
            visible: true,
            reveals: Vec::new(),
            removes_on_click: Vec::new(),
        }
    }

    /// Answer to a selector
    #[must_use]
    pub fn matching(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    /// Set text content
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set ARIA role and accessible name
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>, name: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self.name = Some(name.into());
        self
    }

    /// Start hidden
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Reveal another element on hover
    #[must_use]
    pub fn reveals(mut self, id: impl Into<String>) -> Self {
        self.reveals.push(id.into());
        self
    }

    /// Remove another element (or itself) on click
    #[must_use]
    pub fn removes_on_click(mut self, id: impl Into<String>) -> Self {
        self.removes_on_click.push(id.into());
        self
    }

    fn matches(&self, query: &Query) -> bool {
        match query {
            Query::Css(sel) | Query::XPath(sel) => {
                self.selectors.iter().any(|s| s == sel) || *sel == format!("#{}", self.id)
            }
            Query::Text { text, exact: true } => self.text.trim() == text.trim(),
            Query::Text { text, exact: false } => !text.is_empty() && self.text.contains(text.as_str()),
            Query::Role { role, name } => {
                self.role.as_deref() == Some(role.as_str())
                    && name.as_ref().map_or(true, |pattern| {
                        pattern.is_match(self.name.as_deref().unwrap_or(&self.text))
                    })
            }
        }
    }

    fn handle(&self) -> ElementHandle {
        let handle = ElementHandle::new(&self.id, &self.tag_name);
        if self.text.is_empty() {
            handle
        } else {
            handle.with_text(&self.text)
        }
    }
}

#[derive(Debug, Default)]
struct MockDom {
    url: String,
    elements: Vec<MockElement>,
    history: Vec<String>,
    js_results: VecDeque<serde_json::Value>,
    screenshot: Option<Vec<u8>>,
    key_removals: HashMap<String, Vec<String>>,
    failing_queries: usize,
    query_delay: Duration,
    closed: bool,
}

impl MockDom {
    fn position(&self, id: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.id == id)
    }

    fn remove(&mut self, ids: &[String]) {
        self.elements.retain(|e| !ids.contains(&e.id));
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed {
            Err(EngineError::PageClosed)
        } else {
            Ok(())
        }
    }
}

/// In-memory driver for tests
#[derive(Debug)]
pub struct MockDriver {
    dom: Mutex<MockDom>,
    events: broadcast::Sender<PageEvent>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create an empty page
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            dom: Mutex::new(MockDom::default()),
            events,
        }
    }

    /// Create a page with elements
    #[must_use]
    pub fn with_elements(elements: impl IntoIterator<Item = MockElement>) -> Self {
        let driver = Self::new();
        for element in elements {
            driver.add_element(element);
        }
        driver
    }

    fn lock(&self) -> MutexGuard<'_, MockDom> {
        self.dom.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an element
    pub fn add_element(&self, element: MockElement) {
        self.lock().elements.push(element);
    }

    /// Remove an element
    pub fn remove_element(&self, id: &str) {
        self.lock().remove(&[id.to_string()]);
    }

    /// Toggle visibility
    pub fn set_visible(&self, id: &str, visible: bool) {
        let mut dom = self.lock();
        if let Some(pos) = dom.position(id) {
            dom.elements[pos].visible = visible;
        }
    }

    /// Whether an element is present
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().position(id).is_some()
    }

    /// Whether an element is present and visible
    #[must_use]
    pub fn element_visible(&self, id: &str) -> bool {
        let dom = self.lock();
        dom.position(id).is_some_and(|pos| dom.elements[pos].visible)
    }

    /// Remove elements when `key` is pressed
    pub fn remove_on_key(&self, key: &str, id: &str) {
        self.lock()
            .key_removals
            .entry(key.to_string())
            .or_default()
            .push(id.to_string());
    }

    /// Queue a result for the next `evaluate`
    pub fn set_js_result(&self, result: serde_json::Value) {
        self.lock().js_results.push_back(result);
    }

    /// Set screenshot bytes
    pub fn set_screenshot(&self, png: Vec<u8>) {
        self.lock().screenshot = Some(png);
    }

    /// Make the next `n` queries fail with a driver error
    pub fn fail_next_queries(&self, n: usize) {
        self.lock().failing_queries = n;
    }

    /// Delay every query
    pub fn set_query_delay(&self, delay: Duration) {
        self.lock().query_delay = delay;
    }

    /// Close the page and notify subscribers
    pub fn close(&self) {
        self.lock().closed = true;
        let _ = self.events.send(PageEvent::Closed);
    }

    /// Crash the page and notify subscribers
    pub fn crash(&self) {
        self.lock().closed = true;
        let _ = self.events.send(PageEvent::Crashed);
    }

    /// Current URL
    #[must_use]
    pub fn current_url(&self) -> String {
        self.lock().url.clone()
    }

    /// Call history
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Check if a call with this prefix was made
    #[must_use]
    pub fn was_called(&self, prefix: &str) -> bool {
        self.calls(prefix) > 0
    }

    /// Number of calls with this prefix
    #[must_use]
    pub fn calls(&self, prefix: &str) -> usize {
        self.lock()
            .history
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) -> EngineResult<MutexGuard<'_, MockDom>> {
        let mut dom = self.lock();
        dom.ensure_open()?;
        dom.history.push(call);
        Ok(dom)
    }
}

#[async_trait]
impl AutomationDriver for MockDriver {
    async fn navigate(&self, url: &str) -> EngineResult<()> {
        let mut dom = self.record(format!("navigate:{url}"))?;
        dom.url = url.to_string();
        Ok(())
    }

    async fn query(&self, query: &Query) -> EngineResult<Vec<ElementHandle>> {
        let delay = {
            let mut dom = self.record(format!("query:{query}"))?;
            if dom.failing_queries > 0 {
                dom.failing_queries -= 1;
                return Err(EngineError::driver(format!("query failed: {query}")));
            }
            dom.query_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let dom = self.lock();
        dom.ensure_open()?;
        Ok(dom
            .elements
            .iter()
            .filter(|e| e.matches(query))
            .map(MockElement::handle)
            .collect())
    }

    async fn click(&self, element: &ElementHandle, force: bool) -> EngineResult<()> {
        let call = if force { "force_click" } else { "click" };
        let mut dom = self.record(format!("{call}:{}", element.id))?;
        let pos = dom
            .position(&element.id)
            .ok_or_else(|| EngineError::driver(format!("element {} is detached", element.id)))?;
        if !force && !dom.elements[pos].visible {
            return Err(EngineError::driver(format!(
                "element {} is not visible",
                element.id
            )));
        }
        let removed = dom.elements[pos].removes_on_click.clone();
        dom.remove(&removed);
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> EngineResult<()> {
        let dom = self.record(format!("fill:{}:{text}", element.id))?;
        if dom.position(&element.id).is_none() {
            return Err(EngineError::driver(format!("element {} is detached", element.id)));
        }
        Ok(())
    }

    async fn hover(&self, element: &ElementHandle) -> EngineResult<()> {
        let mut dom = self.record(format!("hover:{}", element.id))?;
        let pos = dom
            .position(&element.id)
            .ok_or_else(|| EngineError::driver(format!("element {} is detached", element.id)))?;
        let revealed = dom.elements[pos].reveals.clone();
        for el in dom.elements.iter_mut().filter(|e| revealed.contains(&e.id)) {
            el.visible = true;
        }
        Ok(())
    }

    async fn is_visible(&self, element: &ElementHandle) -> EngineResult<bool> {
        let dom = self.lock();
        dom.ensure_open()?;
        Ok(dom
            .position(&element.id)
            .is_some_and(|pos| dom.elements[pos].visible))
    }

    async fn is_attached(&self, element: &ElementHandle) -> EngineResult<bool> {
        let dom = self.lock();
        dom.ensure_open()?;
        Ok(dom.position(&element.id).is_some())
    }

    async fn evaluate(&self, script: &str) -> EngineResult<serde_json::Value> {
        let _ = script;
        let mut dom = self.record("evaluate".to_string())?;
        Ok(dom.js_results.pop_front().unwrap_or(serde_json::Value::Null))
    }

    async fn force_visible(&self, selector: &str) -> EngineResult<usize> {
        let mut dom = self.record(format!("force_visible:{selector}"))?;
        let query = Query::css(selector);
        let mut changed = 0;
        for el in dom.elements.iter_mut().filter(|e| e.matches(&query)) {
            if !el.visible {
                el.visible = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn screenshot(&self) -> EngineResult<Vec<u8>> {
        let dom = self.record("screenshot".to_string())?;
        dom.screenshot.clone().ok_or_else(|| EngineError::Screenshot {
            message: "No mock screenshot set".to_string(),
        })
    }

    async fn press_key(&self, key: &str) -> EngineResult<()> {
        let mut dom = self.record(format!("press:{key}"))?;
        if let Some(ids) = dom.key_removals.get(key).cloned() {
            dom.remove(&ids);
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<PageEvent>> {
        Some(self.events.subscribe())
    }

    async fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod query_tests {
        use super::*;

        #[test]
        fn test_query_display() {
            assert_eq!(Query::css(".add-block").to_string(), "css=.add-block");
            assert_eq!(Query::text("保存").to_string(), "text=保存");
            assert_eq!(Query::role("button").to_string(), "role=button");
        }

        #[test]
        fn test_name_pattern_ignores_case_and_escapes() {
            let pattern = NamePattern::literal("Add Block (beta)").unwrap();
            assert!(pattern.is_match("add block (BETA) now"));
            assert!(!pattern.is_match("add block beta"));
        }

        #[test]
        fn test_invalid_regex_is_config_error() {
            assert!(matches!(
                NamePattern::regex("(unclosed"),
                Err(EngineError::Config { .. })
            ));
        }
    }

    mod mock_element_tests {
        use super::*;

        #[test]
        fn test_css_match_includes_id() {
            let el = MockElement::new("save", "button").matching(".btn-save");
            assert!(el.matches(&Query::css(".btn-save")));
            assert!(el.matches(&Query::css("#save")));
            assert!(!el.matches(&Query::css(".btn-cancel")));
        }

        #[test]
        fn test_text_match_modes() {
            let el = MockElement::new("a", "span").with_text("ブロックを追加する");
            assert!(el.matches(&Query::text("ブロックを追加")));
            assert!(!el.matches(&Query::Text {
                text: "ブロックを追加".into(),
                exact: true
            }));
        }

        #[test]
        fn test_role_match_uses_name_then_text() {
            let named = MockElement::new("m", "div").with_role("menuitem", "Site Settings");
            let pattern = NamePattern::literal("site settings").unwrap();
            assert!(named.matches(&Query::Role {
                role: "menuitem".into(),
                name: Some(pattern.clone())
            }));
            assert!(!named.matches(&Query::Role {
                role: "button".into(),
                name: Some(pattern)
            }));
        }
    }

    mod mock_driver_tests {
        use super::*;

        fn page() -> MockDriver {
            MockDriver::with_elements([
                MockElement::new("menu", "div")
                    .matching(".menu")
                    .reveals("menu-item"),
                MockElement::new("menu-item", "a").matching(".menu a").hidden(),
                MockElement::new("popup", "div").matching(".modal"),
                MockElement::new("popup-close", "button")
                    .matching(".modal .close")
                    .removes_on_click("popup")
                    .removes_on_click("popup-close"),
            ])
        }

        #[tokio::test]
        async fn test_navigate_records_url() {
            let driver = MockDriver::new();
            driver.navigate("https://bindup.example/").await.unwrap();
            assert_eq!(driver.current_url(), "https://bindup.example/");
            assert!(driver.was_called("navigate"));
        }

        #[tokio::test]
        async fn test_hover_reveals() {
            let driver = page();
            let menu = driver.query(&Query::css(".menu")).await.unwrap().remove(0);
            let item = driver.query(&Query::css(".menu a")).await.unwrap().remove(0);
            assert!(!driver.is_visible(&item).await.unwrap());
            driver.hover(&menu).await.unwrap();
            assert!(driver.is_visible(&item).await.unwrap());
        }

        #[tokio::test]
        async fn test_click_hidden_requires_force() {
            let driver = page();
            let item = driver.query(&Query::css(".menu a")).await.unwrap().remove(0);
            assert!(driver.click(&item, false).await.is_err());
            driver.click(&item, true).await.unwrap();
            assert!(driver.was_called("force_click:menu-item"));
        }

        #[tokio::test]
        async fn test_click_removes_targets() {
            let driver = page();
            let close = driver.query(&Query::css(".modal .close")).await.unwrap().remove(0);
            driver.click(&close, false).await.unwrap();
            assert!(!driver.contains("popup"));
            assert!(!driver.is_attached(&close).await.unwrap());
        }

        #[tokio::test]
        async fn test_key_removal() {
            let driver = page();
            driver.remove_on_key("Escape", "popup");
            driver.press_key("Escape").await.unwrap();
            assert!(!driver.contains("popup"));
        }

        #[tokio::test]
        async fn test_failing_queries() {
            let driver = page();
            driver.fail_next_queries(1);
            assert!(driver.query(&Query::css(".menu")).await.is_err());
            assert_eq!(driver.query(&Query::css(".menu")).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_force_visible() {
            let driver = page();
            assert_eq!(driver.force_visible(".menu a").await.unwrap(), 1);
            assert!(driver.element_visible("menu-item"));
        }

        #[tokio::test]
        async fn test_wait_for_default_polls_until_hidden() {
            let driver = std::sync::Arc::new(page());
            let popup = driver.query(&Query::css(".modal")).await.unwrap().remove(0);
            let remover = std::sync::Arc::clone(&driver);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                remover.set_visible("popup", false);
            });
            driver
                .wait_for(&popup, ElementState::Hidden, Duration::from_secs(2))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_wait_for_times_out() {
            let driver = page();
            let popup = driver.query(&Query::css(".modal")).await.unwrap().remove(0);
            let err = driver
                .wait_for(&popup, ElementState::Detached, Duration::from_millis(120))
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::Timeout { ms: 120 }));
        }

        #[tokio::test]
        async fn test_close_broadcasts_and_blocks_calls() {
            let driver = page();
            let mut events = driver.subscribe().unwrap();
            driver.close();
            assert_eq!(events.recv().await.unwrap(), PageEvent::Closed);
            assert!(driver.is_closed().await);
            assert!(driver.query(&Query::css(".menu")).await.unwrap_err().is_page_closed());
        }

        #[tokio::test]
        async fn test_screenshot_requires_data() {
            let driver = MockDriver::new();
            assert!(driver.screenshot().await.is_err());
            driver.set_screenshot(vec![0x89, b'P', b'N', b'G']);
            assert_eq!(driver.screenshot().await.unwrap().len(), 4);
        }

        #[tokio::test]
        async fn test_evaluate_returns_queued_results() {
            let driver = MockDriver::new();
            driver.set_js_result(serde_json::json!(3));
            assert_eq!(driver.evaluate("1+2").await.unwrap(), serde_json::json!(3));
            assert_eq!(driver.evaluate("1+2").await.unwrap(), serde_json::Value::Null);
        }
    }
}
