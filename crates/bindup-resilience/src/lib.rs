//! BiNDup Resilience: smart element resolution and retry engine for E2E suites
//!
//! The BiNDup site builder renders the same control under shifting markup,
//! languages and pop-over layers. This crate wraps a page automation driver
//! with four cooperating components:
//!
//! - [`ElementResolver`] walks an ordered list of selector candidates, then
//!   synthesized text variations and ARIA roles, and special routes for the
//!   template and create-site flows
//! - [`RetryExecutor`] runs fallible steps under an attempt budget and keeps a
//!   per-attempt log
//! - [`PopupSuppressor`] watches the page in the background and dismisses
//!   known overlays
//! - [`OperationVerifier`] checks DOM evidence after add, duplicate, move,
//!   delete and exists operations
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Engine facade                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌──────────┐  │
//! │   │ Resolver   │  │ Retry      │  │ Popup      │  │ Verifier │  │
//! │   └─────┬──────┘  └────────────┘  └─────┬──────┘  └────┬─────┘  │
//! │         └───────────────┬───────────────┴──────────────┘        │
//! │                 ┌───────▼────────┐     ┌────────────┐           │
//! │                 │ AutomationDriver│───►│ EventSink  │           │
//! │                 │ (mock | cdp)    │    │ (tracing)  │           │
//! │                 └────────────────┘     └────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]
// Tests may unwrap freely
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod config;
mod diagnostics;
mod driver;
mod engine;
mod events;
mod logging;
mod popup;
mod resolver;
mod result;
mod retry;
mod selector;
mod variation;
mod verify;

/// Chrome DevTools Protocol driver (requires the `browser` feature)
#[cfg(feature = "browser")]
pub mod cdp;

pub use config::{
    EngineConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_POPUP_INTERVAL_MS, DEFAULT_POPUP_MATCH_TIMEOUT_MS,
    ENV_PREFIX,
};
pub use diagnostics::{capture_failure, sanitize_label};
pub use driver::{
    AutomationDriver, ElementHandle, ElementState, MockDriver, MockElement, NamePattern,
    PageEvent, Query, DEFAULT_POLL_INTERVAL_MS,
};
pub use engine::Engine;
pub use events::{
    EventSink, FanoutSink, JsonLinesSink, MemorySink, StepEvent, StepStatus, TracingSink,
};
pub use logging::{init_logging, init_logging_with, DEFAULT_DIRECTIVE};
pub use popup::{
    DismissalFallback, PopupDescriptor, PopupSuppressor, ScanReport, SuppressorState, ESCAPE_KEY,
};
pub use resolver::{
    ElementResolver, ResolutionStage, ResolvedElement, SpecialRoute, FALLBACK_ROLES,
};
pub use result::{EngineError, EngineResult};
pub use retry::{
    AttemptOutcome, AttemptRecord, RetryExecutor, RetryExhausted, RetryReport, RetryState,
};
pub use selector::{ElementQuery, SelectorCandidate, SelectorKind};
pub use variation::{text_variations, translate_term};
pub use verify::{
    target_selectors, OperationKind, OperationVerifier, VerificationResult, COUNT_SELECTORS,
};

/// Event phase names, one per component
pub mod phase {
    pub use crate::popup::PHASE as POPUP;
    pub use crate::resolver::PHASE as RESOLVE;
    pub use crate::retry::PHASE as RETRY;
    pub use crate::verify::PHASE as VERIFY;
}

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        AutomationDriver, ElementQuery, Engine, EngineConfig, EngineError, EngineResult,
        EventSink, MemorySink, MockDriver, MockElement, OperationKind, PopupDescriptor,
        PopupSuppressor, ResolvedElement, RetryExecutor, RetryExhausted, SelectorCandidate,
        StepEvent, StepStatus, TracingSink, VerificationResult,
    };
}
