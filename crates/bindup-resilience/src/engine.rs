//! Engine facade used by test scenarios.
//!
//! ```ignore
//! let engine = Engine::new(driver, EngineConfig::default());
//! let popups = engine.popup_suppressor();
//! popups.start();
//!
//! let add = engine
//!     .resolve("Add Block Button", "text=ブロックを追加", &[".add-block-button"])
//!     .await?;
//! engine.click(&add).await?;
//!
//! let verdict = engine.verify(OperationKind::Add, "blk-1").await;
//! popups.stop().await;
//! ```

use crate::config::EngineConfig;
use crate::diagnostics;
use crate::driver::AutomationDriver;
use crate::events::{EventSink, TracingSink};
use crate::popup::PopupSuppressor;
use crate::resolver::{ElementResolver, ResolvedElement};
use crate::result::{EngineError, EngineResult};
use crate::retry::{RetryExecutor, RetryExhausted};
use crate::selector::{ElementQuery, SelectorCandidate};
use crate::verify::{OperationKind, OperationVerifier, VerificationResult};
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;

/// Resolution, retry, popup and verification over one page
pub struct Engine<D: AutomationDriver + ?Sized + 'static> {
    driver: Arc<D>,
    config: EngineConfig,
    sink: Arc<dyn EventSink>,
    resolver: ElementResolver<D>,
    retry: RetryExecutor,
    verifier: OperationVerifier<D>,
}

impl<D: AutomationDriver + ?Sized + 'static> fmt::Debug for Engine<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<D: AutomationDriver + ?Sized + 'static> Engine<D> {
    /// Engine logging step events through `tracing`
    #[must_use]
    pub fn new(driver: Arc<D>, config: EngineConfig) -> Self {
        Self::with_sink(driver, config, Arc::new(TracingSink))
    }

    /// Engine emitting step events to `sink`
    #[must_use]
    pub fn with_sink(driver: Arc<D>, config: EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            resolver: ElementResolver::new(Arc::clone(&driver), config.clone(), Arc::clone(&sink)),
            retry: RetryExecutor::from_config(&config, Arc::clone(&sink)),
            verifier: OperationVerifier::new(
                Arc::clone(&driver),
                config.verify_timeout(),
                Arc::clone(&sink),
            ),
            driver,
            config,
            sink,
        }
    }

    /// The shared driver
    #[must_use]
    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Engine settings
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve from selector strings
    pub async fn resolve(
        &self,
        description: &str,
        primary: &str,
        fallbacks: &[&str],
    ) -> EngineResult<ResolvedElement> {
        self.resolve_query(&ElementQuery::from_strs(description, primary, fallbacks))
            .await
    }

    /// Resolve a prepared query
    pub async fn resolve_query(&self, query: &ElementQuery) -> EngineResult<ResolvedElement> {
        self.resolver.resolve(query).await
    }

    /// Resolve from typed candidates
    pub async fn resolve_candidates(
        &self,
        description: &str,
        primary: SelectorCandidate,
        fallbacks: Vec<SelectorCandidate>,
    ) -> EngineResult<ResolvedElement> {
        let query = ElementQuery {
            description: description.to_string(),
            primary,
            fallbacks,
        };
        self.resolver.resolve(&query).await
    }

    /// Click a resolved element, forcing it when it was hidden
    pub async fn click(&self, element: &ResolvedElement) -> EngineResult<()> {
        let force = !element.visible;
        if force {
            tracing::debug!(element = %element.handle.id, "forcing click on hidden element");
        }
        self.driver.click(&element.handle, force).await
    }

    /// Fill a resolved input
    pub async fn fill(&self, element: &ResolvedElement, text: &str) -> EngineResult<()> {
        self.driver.fill(&element.handle, text).await
    }

    /// Run `operation` with retries (`None` = configured default budget).
    ///
    /// On exhaustion a failure screenshot is captured when configured and
    /// the last error is returned inside [`RetryExhausted`].
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        label: &str,
        max_attempts: Option<u32>,
        operation: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + From<EngineError>,
    {
        let result = self.retry.execute_with_retry(label, max_attempts, operation).await;
        if result.is_err() {
            diagnostics::capture_failure(
                self.driver.as_ref(),
                self.config.screenshot_dir.as_deref(),
                &format!("retry-{label}"),
            )
            .await;
        }
        result
    }

    /// A new popup suppressor for this page; the caller owns its lifecycle
    #[must_use]
    pub fn popup_suppressor(&self) -> PopupSuppressor<D> {
        PopupSuppressor::new(Arc::clone(&self.driver), &self.config, Arc::clone(&self.sink))
    }

    /// Verify an operation's effect. Never fails.
    pub async fn verify(&self, kind: OperationKind, target_id: &str) -> VerificationResult {
        self.verifier.verify(kind, target_id).await
    }
}
