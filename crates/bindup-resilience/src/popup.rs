//! Background popup suppression.
//!
//! BiNDup throws a "start guide" interstitial at unpredictable points, plus
//! assorted modals. [`PopupSuppressor`] polls the page on a fixed interval
//! and dismisses whatever it recognises, so scenario code never has to.
//!
//! The loop is best-effort: nothing inside it returns an error to the
//! caller. Lookup and click failures are logged at debug level and the
//! next descriptor is tried.
//!
//! ```text
//!   start()            stop() / page closed / crashed
//! Idle ─────▶ Monitoring ─────────────────────────────▶ Idle
//! ```

use crate::config::EngineConfig;
use crate::driver::{AutomationDriver, ElementHandle, PageEvent};
use crate::events::{EventSink, StepEvent};
use crate::selector::SelectorCandidate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Event phase emitted by the suppressor
pub const PHASE: &str = "popup";

/// Key sent when no dismiss control is found
pub const ESCAPE_KEY: &str = "Escape";

/// What to do when no dismiss control is visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DismissalFallback {
    /// Press Escape
    EscapeKey,
    /// Leave the popup alone
    None,
}

/// A known popup and how to close it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupDescriptor {
    /// Name used in logs, events and scan reports
    pub name: String,
    /// Candidates identifying the popup container, in order
    pub match_selectors: Vec<SelectorCandidate>,
    /// Candidates for the close control, in order
    pub dismiss_selectors: Vec<SelectorCandidate>,
    /// Last-resort dismissal
    pub fallback: DismissalFallback,
}

impl PopupDescriptor {
    /// Empty descriptor with the Escape fallback
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            match_selectors: Vec::new(),
            dismiss_selectors: Vec::new(),
            fallback: DismissalFallback::EscapeKey,
        }
    }

    /// Add a container candidate
    #[must_use]
    pub fn matching(mut self, selector: &str) -> Self {
        self.match_selectors.push(SelectorCandidate::parse(selector));
        self
    }

    /// Add a close-control candidate
    #[must_use]
    pub fn dismissed_by(mut self, selector: &str) -> Self {
        self.dismiss_selectors.push(SelectorCandidate::parse(selector));
        self
    }

    /// Set the fallback
    #[must_use]
    pub const fn with_fallback(mut self, fallback: DismissalFallback) -> Self {
        self.fallback = fallback;
        self
    }

    /// The BiNDup start-guide interstitial
    #[must_use]
    pub fn start_guide() -> Self {
        Self::new("start-guide")
            .matching("#start-guide")
            .matching(".start-guide")
            .matching("[class*='start-guide']")
            .matching("text=スタートガイド")
            .dismissed_by(".start-guide .close")
            .dismissed_by("[class*='start-guide'] [class*='close']")
            .dismissed_by("text=閉じる")
            .dismissed_by("text=スキップ")
            .dismissed_by("text=今後表示しない")
    }

    /// Catch-all for modal, dialog and overlay class names
    #[must_use]
    pub fn generic_modal() -> Self {
        Self::new("generic-modal")
            .matching(".modal")
            .matching("[role='dialog']")
            .matching("[class*='modal']")
            .matching("[class*='dialog']")
            .matching("[class*='overlay']")
            .dismissed_by(".modal .close")
            .dismissed_by("[class*='modal'] [class*='close']")
            .dismissed_by("[aria-label='Close']")
            .dismissed_by("[aria-label='閉じる']")
            .dismissed_by("text=閉じる")
            .dismissed_by("text=×")
    }

    /// Start guide first, then the catch-all
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![Self::start_guide(), Self::generic_modal()]
    }
}

/// Suppressor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuppressorState {
    /// No loop running
    Idle,
    /// Polling loop active
    Monitoring,
}

/// Outcome of one scan cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Descriptors whose container was visible
    pub matched: Vec<String>,
    /// Descriptors that were dismissed
    pub dismissed: Vec<String>,
}

impl ScanReport {
    /// Whether nothing was seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }
}

/// How a popup went away
enum Dismissal {
    Clicked(SelectorCandidate),
    Escape,
}

/// Scan-and-dismiss logic shared by `scan_once` and the loop
struct Scanner<D: AutomationDriver + ?Sized> {
    driver: Arc<D>,
    descriptors: Arc<Vec<PopupDescriptor>>,
    match_timeout: Duration,
    dismiss_timeout: Duration,
    sink: Arc<dyn EventSink>,
    dismissed: Arc<AtomicU64>,
    scans: Arc<AtomicU64>,
}

impl<D: AutomationDriver + ?Sized> Clone for Scanner<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            descriptors: Arc::clone(&self.descriptors),
            match_timeout: self.match_timeout,
            dismiss_timeout: self.dismiss_timeout,
            sink: Arc::clone(&self.sink),
            dismissed: Arc::clone(&self.dismissed),
            scans: Arc::clone(&self.scans),
        }
    }
}

impl<D: AutomationDriver + ?Sized> Scanner<D> {
    async fn scan(&self) -> ScanReport {
        self.scans.fetch_add(1, Ordering::Relaxed);
        let mut report = ScanReport::default();

        for descriptor in self.descriptors.iter() {
            if !self.is_showing(descriptor).await {
                continue;
            }
            report.matched.push(descriptor.name.clone());
            tracing::debug!(popup = %descriptor.name, "popup detected");

            match self.dismiss(descriptor).await {
                Some(how) => {
                    let detail = match how {
                        Dismissal::Clicked(candidate) => format!("clicked {candidate}"),
                        Dismissal::Escape => "pressed Escape".to_string(),
                    };
                    tracing::info!(popup = %descriptor.name, "{detail}");
                    self.sink
                        .emit(StepEvent::success(PHASE, descriptor.name.as_str()).with_detail(detail));
                    self.dismissed.fetch_add(1, Ordering::Relaxed);
                    report.dismissed.push(descriptor.name.clone());
                }
                None => {
                    tracing::debug!(popup = %descriptor.name, "no way to dismiss popup");
                    self.sink.emit(
                        StepEvent::warning(PHASE, descriptor.name.as_str())
                            .with_detail("visible but not dismissed"),
                    );
                }
            }
        }

        report
    }

    async fn is_showing(&self, descriptor: &PopupDescriptor) -> bool {
        for candidate in &descriptor.match_selectors {
            if self.visible(candidate, self.match_timeout).await.is_some() {
                return true;
            }
        }
        false
    }

    async fn dismiss(&self, descriptor: &PopupDescriptor) -> Option<Dismissal> {
        for candidate in &descriptor.dismiss_selectors {
            let Some(handle) = self.visible(candidate, self.dismiss_timeout).await else {
                continue;
            };
            match self.driver.click(&handle, false).await {
                Ok(()) => return Some(Dismissal::Clicked(candidate.clone())),
                Err(err) => {
                    tracing::debug!(popup = %descriptor.name, selector = %candidate, error = %err, "dismiss click failed");
                }
            }
        }

        if descriptor.fallback == DismissalFallback::EscapeKey {
            match self.driver.press_key(ESCAPE_KEY).await {
                Ok(()) => return Some(Dismissal::Escape),
                Err(err) => tracing::debug!(popup = %descriptor.name, error = %err, "escape failed"),
            }
        }
        None
    }

    /// First visible match for a candidate within `limit`
    async fn visible(&self, candidate: &SelectorCandidate, limit: Duration) -> Option<ElementHandle> {
        let query = match candidate.to_query() {
            Ok(query) => query,
            Err(err) => {
                tracing::debug!(selector = %candidate, error = %err, "unusable popup selector");
                return None;
            }
        };
        let lookup = async {
            let handles = self.driver.query(&query).await?;
            for handle in handles {
                if self.driver.is_visible(&handle).await? {
                    return Ok(Some(handle));
                }
            }
            Ok::<_, crate::EngineError>(None)
        };
        match tokio::time::timeout(limit, lookup).await {
            Ok(Ok(found)) => found,
            Ok(Err(err)) => {
                tracing::debug!(selector = %candidate, error = %err, "popup lookup failed");
                None
            }
            Err(_) => None,
        }
    }
}

struct Inner {
    state: SuppressorState,
    task: Option<JoinHandle<()>>,
    stop: Option<watch::Sender<bool>>,
    generation: u64,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shortest polling period; `tokio::time::interval` rejects zero
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Return to `Idle` unless a newer loop has taken over
fn finish(inner: &Mutex<Inner>, generation: u64) {
    let mut guard = lock(inner);
    if guard.generation == generation {
        guard.state = SuppressorState::Idle;
        guard.task = None;
        guard.stop = None;
    }
}

/// Polls one page for popups; one suppressor per page.
pub struct PopupSuppressor<D: AutomationDriver + ?Sized + 'static> {
    scanner: Scanner<D>,
    interval: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl<D: AutomationDriver + ?Sized + 'static> fmt::Debug for PopupSuppressor<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopupSuppressor")
            .field("state", &self.state())
            .field("interval", &self.interval)
            .field("descriptors", &self.scanner.descriptors.len())
            .finish_non_exhaustive()
    }
}

impl<D: AutomationDriver + ?Sized + 'static> PopupSuppressor<D> {
    /// Suppressor with the default descriptors
    #[must_use]
    pub fn new(driver: Arc<D>, config: &EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            scanner: Scanner {
                driver,
                descriptors: Arc::new(PopupDescriptor::defaults()),
                match_timeout: config.popup_match_timeout(),
                dismiss_timeout: config.popup_dismiss_timeout(),
                sink,
                dismissed: Arc::new(AtomicU64::new(0)),
                scans: Arc::new(AtomicU64::new(0)),
            },
            interval: config.popup_interval().max(MIN_INTERVAL),
            inner: Arc::new(Mutex::new(Inner {
                state: SuppressorState::Idle,
                task: None,
                stop: None,
                generation: 0,
            })),
        }
    }

    /// Replace the descriptor list; takes effect on the next `start`
    #[must_use]
    pub fn with_descriptors(mut self, descriptors: Vec<PopupDescriptor>) -> Self {
        self.scanner.descriptors = Arc::new(descriptors);
        self
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SuppressorState {
        lock(&self.inner).state
    }

    /// Whether the loop is running
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.state() == SuppressorState::Monitoring
    }

    /// Popups dismissed since creation
    #[must_use]
    pub fn dismissed_total(&self) -> u64 {
        self.scanner.dismissed.load(Ordering::Relaxed)
    }

    /// Scan cycles run since creation
    #[must_use]
    pub fn scan_count(&self) -> u64 {
        self.scanner.scans.load(Ordering::Relaxed)
    }

    /// Run a single scan cycle in the caller's task
    pub async fn scan_once(&self) -> ScanReport {
        self.scanner.scan().await
    }

    /// Begin monitoring. Must be called inside a tokio runtime.
    ///
    /// Returns `false` when already monitoring; no second loop is spawned.
    pub fn start(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.state == SuppressorState::Monitoring {
            tracing::debug!("popup suppressor already running");
            return false;
        }

        inner.generation += 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(monitor(
            self.scanner.clone(),
            Arc::clone(&self.inner),
            inner.generation,
            self.interval,
            stop_rx,
            self.scanner.driver.subscribe(),
        ));
        inner.state = SuppressorState::Monitoring;
        inner.task = Some(task);
        inner.stop = Some(stop_tx);
        drop(inner);

        tracing::info!(interval = ?self.interval, "popup suppressor started");
        self.scanner.sink.emit(StepEvent::start(PHASE, "monitor"));
        true
    }

    /// Stop monitoring and wait for the loop to exit.
    ///
    /// Returns `false` when nothing was running.
    pub async fn stop(&self) -> bool {
        let (stop, task) = {
            let mut inner = lock(&self.inner);
            if inner.state == SuppressorState::Idle {
                return false;
            }
            inner.state = SuppressorState::Idle;
            (inner.stop.take(), inner.task.take())
        };

        if let Some(stop) = stop {
            let _ = stop.send(true);
        }
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::debug!(error = %err, "popup loop ended abnormally");
            }
        }

        tracing::info!(dismissed = self.dismissed_total(), "popup suppressor stopped");
        self.scanner
            .sink
            .emit(StepEvent::success(PHASE, "monitor").with_detail("stopped"));
        true
    }
}

impl<D: AutomationDriver + ?Sized + 'static> Drop for PopupSuppressor<D> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.inner).task.take() {
            task.abort();
        }
    }
}

/// Next lifecycle event; pends forever once the channel is gone
async fn next_event(events: &mut Option<broadcast::Receiver<PageEvent>>) -> PageEvent {
    loop {
        let Some(rx) = events.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Ok(event) => return event,
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => *events = None,
        }
    }
}

fn page_gone<D: AutomationDriver + ?Sized>(scanner: &Scanner<D>, event: PageEvent) {
    tracing::info!(?event, "page gone, popup suppressor going idle");
    scanner
        .sink
        .emit(StepEvent::warning(PHASE, "monitor").with_detail(format!("page {event:?}")));
}

async fn monitor<D: AutomationDriver + ?Sized + 'static>(
    scanner: Scanner<D>,
    inner: Arc<Mutex<Inner>>,
    generation: u64,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    mut events: Option<broadcast::Receiver<PageEvent>>,
) {
    let _finish = FinishGuard { inner, generation };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            event = next_event(&mut events) => {
                page_gone(&scanner, event);
                break;
            }
            _ = ticker.tick() => {
                if scanner.driver.is_closed().await {
                    page_gone(&scanner, PageEvent::Closed);
                    break;
                }
                let report = scanner.scan().await;
                if !report.is_empty() {
                    tracing::debug!(matched = ?report.matched, dismissed = ?report.dismissed, "popup scan");
                }
            }
        }
    }
}

/// Runs `finish` however the loop ends, including panic and abort
struct FinishGuard {
    inner: Arc<Mutex<Inner>>,
    generation: u64,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        finish(&self.inner, self.generation);
    }
}
