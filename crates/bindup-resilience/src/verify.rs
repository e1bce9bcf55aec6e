//! Heuristic operation verification.
//!
//! BiNDup exposes no stable element ids, so post-conditions are read back by
//! counting generic block/element class patterns and probing a handful of
//! id-ish attributes. The guarantees are deliberately weak:
//!
//! - `duplicate` succeeds on cardinality (`count > 1`), not identity.
//! - `move` only confirms the target still exists. `position_changed` is
//!   reported as `Some(true)` without reading the order back.
//!
//! [`OperationVerifier::verify`] never fails; faults become `success = false`.

use crate::driver::{AutomationDriver, Query};
use crate::events::{EventSink, StepEvent};
use crate::result::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Event phase emitted by the verifier
pub const PHASE: &str = "verify";

/// Counting cascade; the first selector with a non-zero count wins
pub const COUNT_SELECTORS: &[&str] = &[".block", "[class*='block']", ".element", "[class*='element']"];

/// Kind of mutating (or read-only) operation being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Element was added
    Add,
    /// Element was duplicated
    Duplicate,
    /// Element was moved
    Move,
    /// Element was deleted
    Delete,
    /// Element should exist
    Exists,
}

impl OperationKind {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Duplicate => "duplicate",
            Self::Move => "move",
            Self::Delete => "delete",
            Self::Exists => "exists",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "duplicate" => Ok(Self::Duplicate),
            "move" => Ok(Self::Move),
            "delete" => Ok(Self::Delete),
            "exists" => Ok(Self::Exists),
            other => Err(EngineError::config(format!("unknown operation kind {other:?}"))),
        }
    }
}

/// Verdict for one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Operation checked
    pub operation_kind: OperationKind,
    /// Whether the post-condition holds
    pub success: bool,
    /// Whether the target was found
    pub target_exists: bool,
    /// Matching-class element count
    pub element_count: usize,
    /// Only set for `move`; assumed, never read back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_changed: Option<bool>,
    /// Diagnostic message
    pub message: String,
}

impl VerificationResult {
    /// Apply the per-kind policy to observed DOM facts
    #[must_use]
    pub fn evaluate(kind: OperationKind, target_id: &str, target_exists: bool, element_count: usize) -> Self {
        let (success, position_changed, message) = match kind {
            OperationKind::Add => (
                target_exists && element_count > 0,
                None,
                if target_exists {
                    format!("{target_id} found, {element_count} elements on page")
                } else {
                    format!("{target_id} not found after add")
                },
            ),
            OperationKind::Duplicate => (
                element_count > 1,
                None,
                format!("{element_count} elements on page (cardinality check only)"),
            ),
            OperationKind::Move => (
                target_exists,
                target_exists.then_some(true),
                if target_exists {
                    format!("{target_id} still present; position change assumed, not read back")
                } else {
                    format!("{target_id} missing after move")
                },
            ),
            OperationKind::Delete => (
                !target_exists,
                None,
                if target_exists {
                    format!("{target_id} still present after delete")
                } else {
                    format!("{target_id} removed")
                },
            ),
            OperationKind::Exists => (
                target_exists,
                None,
                if target_exists {
                    format!("{target_id} present")
                } else {
                    format!("{target_id} absent")
                },
            ),
        };

        Self {
            operation_kind: kind,
            success,
            target_exists,
            element_count,
            position_changed,
            message,
        }
    }

    /// Failed verdict for a verification that could not complete
    #[must_use]
    pub fn degraded(kind: OperationKind, message: impl Into<String>) -> Self {
        Self {
            operation_kind: kind,
            success: false,
            target_exists: false,
            element_count: 0,
            position_changed: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} (target_exists={}, count={})",
            self.operation_kind,
            if self.success { "PASS" } else { "FAIL" },
            self.message,
            self.target_exists,
            self.element_count
        )
    }
}

fn is_css_ident(id: &str) -> bool {
    let mut chars = id.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '-')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Target lookup cascade for an id.
///
/// The last two steps find wrappers such as `block-blk-1`. They are anchored
/// on a separator so `blk-10` or `blk-1-copy` never stand in for `blk-1`.
#[must_use]
pub fn target_selectors(target_id: &str) -> Vec<String> {
    let id = target_id.trim();
    let quoted = id.replace('\\', "\\\\").replace('\'', "\\'");
    let mut selectors = Vec::with_capacity(6);
    if is_css_ident(id) {
        selectors.push(format!("#{id}"));
    }
    selectors.push(format!("[data-id='{quoted}']"));
    selectors.push(format!("[data-block-id='{quoted}']"));
    selectors.push(format!("[data-element-id='{quoted}']"));
    selectors.push(format!("[id$='-{quoted}']"));
    selectors.push(format!("[id$='_{quoted}']"));
    selectors
}

/// Reads post-conditions back from the page
pub struct OperationVerifier<D: AutomationDriver + ?Sized> {
    driver: Arc<D>,
    timeout: Duration,
    sink: Arc<dyn EventSink>,
}

impl<D: AutomationDriver + ?Sized> fmt::Debug for OperationVerifier<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationVerifier")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<D: AutomationDriver + ?Sized> OperationVerifier<D> {
    /// Create a verifier with an overall budget per call
    #[must_use]
    pub fn new(driver: Arc<D>, timeout: Duration, sink: Arc<dyn EventSink>) -> Self {
        Self {
            driver,
            timeout,
            sink,
        }
    }

    /// Check an operation's effect. Never fails.
    pub async fn verify(&self, kind: OperationKind, target_id: &str) -> VerificationResult {
        let step = format!("{kind}:{target_id}");
        self.sink.emit(StepEvent::start(PHASE, step.as_str()));

        let result = match tokio::time::timeout(self.timeout, self.inspect(kind, target_id)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => VerificationResult::degraded(kind, format!("verification failed: {err}")),
            Err(_) => VerificationResult::degraded(
                kind,
                format!("verification timed out after {}ms", self.timeout.as_millis()),
            ),
        };

        if result.success {
            tracing::info!(kind = %kind, target_id, count = result.element_count, "verified");
            self.sink
                .emit(StepEvent::success(PHASE, step).with_detail(result.message.clone()));
        } else {
            tracing::warn!(kind = %kind, target_id, message = %result.message, "verification failed");
            self.sink
                .emit(StepEvent::warning(PHASE, step).with_detail(result.message.clone()));
        }
        result
    }

    async fn inspect(&self, kind: OperationKind, target_id: &str) -> EngineResult<VerificationResult> {
        let target_exists = if kind == OperationKind::Duplicate {
            false
        } else {
            if target_id.trim().is_empty() {
                return Ok(VerificationResult::degraded(kind, "empty target id"));
            }
            self.target_exists(target_id).await?
        };
        let element_count = self.element_count().await?;
        Ok(VerificationResult::evaluate(kind, target_id, target_exists, element_count))
    }

    async fn target_exists(&self, target_id: &str) -> EngineResult<bool> {
        for selector in target_selectors(target_id) {
            if !self.driver.query(&Query::Css(selector)).await?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Count from the first selector in the cascade that matches anything
    pub async fn element_count(&self) -> EngineResult<usize> {
        for selector in COUNT_SELECTORS {
            let count = self.driver.query(&Query::css(*selector)).await?.len();
            if count > 0 {
                tracing::debug!(selector, count, "element count");
                return Ok(count);
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, MockElement};
    use crate::events::{MemorySink, StepStatus};

    fn verifier(driver: MockDriver) -> (OperationVerifier<MockDriver>, Arc<MockDriver>, MemorySink) {
        let driver = Arc::new(driver);
        let sink = MemorySink::new();
        let verifier = OperationVerifier::new(
            Arc::clone(&driver),
            Duration::from_secs(2),
            Arc::new(sink.clone()),
        );
        (verifier, driver, sink)
    }

    fn block(id: &str) -> MockElement {
        MockElement::new(id, "div").matching(".block")
    }

    mod policy_tests {
        use super::*;

        #[test]
        fn test_policy_table() {
            assert!(VerificationResult::evaluate(OperationKind::Add, "b", true, 1).success);
            assert!(!VerificationResult::evaluate(OperationKind::Add, "b", true, 0).success);
            assert!(!VerificationResult::evaluate(OperationKind::Add, "b", false, 3).success);
            assert!(VerificationResult::evaluate(OperationKind::Duplicate, "b", false, 2).success);
            assert!(!VerificationResult::evaluate(OperationKind::Duplicate, "b", true, 1).success);
            assert!(VerificationResult::evaluate(OperationKind::Delete, "b", false, 0).success);
            assert!(!VerificationResult::evaluate(OperationKind::Delete, "b", true, 4).success);
            assert!(VerificationResult::evaluate(OperationKind::Exists, "b", true, 0).success);
            assert!(!VerificationResult::evaluate(OperationKind::Exists, "b", false, 9).success);
        }

        #[test]
        fn test_move_is_optimistic() {
            let moved = VerificationResult::evaluate(OperationKind::Move, "b", true, 2);
            assert!(moved.success);
            assert_eq!(moved.position_changed, Some(true));
            let lost = VerificationResult::evaluate(OperationKind::Move, "b", false, 2);
            assert!(!lost.success);
            assert_eq!(lost.position_changed, None);
        }

        #[test]
        fn test_kind_parsing_and_display() {
            assert_eq!("Duplicate".parse::<OperationKind>().unwrap(), OperationKind::Duplicate);
            assert!("rename".parse::<OperationKind>().is_err());
            let result = VerificationResult::evaluate(OperationKind::Delete, "blk-1", false, 0);
            assert_eq!(
                result.to_string(),
                "[delete] PASS: blk-1 removed (target_exists=false, count=0)"
            );
        }

        #[test]
        fn test_target_selectors() {
            assert_eq!(
                target_selectors("blk-1"),
                vec![
                    "#blk-1",
                    "[data-id='blk-1']",
                    "[data-block-id='blk-1']",
                    "[data-element-id='blk-1']",
                    "[id$='-blk-1']",
                    "[id$='_blk-1']"
                ]
            );
            let odd = target_selectors("1 o'clock");
            assert_eq!(odd[0], "[data-id='1 o\\'clock']");
            assert_eq!(odd.len(), 5);
            assert!(target_selectors("blk-1").iter().all(|s| !s.contains("*=")));
        }
    }

    mod dom_tests {
        use super::*;

        #[tokio::test]
        async fn test_delete_absent_target() {
            let (verifier, _, sink) = verifier(MockDriver::with_elements([block("other")]));
            let result = verifier.verify(OperationKind::Delete, "blk-1").await;
            assert!(result.success);
            assert!(!result.target_exists);
            assert_eq!(sink.events()[1].status, StepStatus::Success);
        }

        #[tokio::test]
        async fn test_delete_ignores_ids_sharing_a_prefix() {
            let (verifier, _, _) = verifier(MockDriver::with_elements([
                block("blk-10").matching("[id*='blk-1']"),
                block("blk-1-copy").matching("[id*='blk-1']").matching("[id^='blk-1-']"),
            ]));
            let result = verifier.verify(OperationKind::Delete, "blk-1").await;
            assert!(result.success);
            assert!(!result.target_exists);
            assert_eq!(result.element_count, 2);
        }

        #[tokio::test]
        async fn test_prefixed_wrapper_counts_as_target() {
            let (verifier, _, _) = verifier(MockDriver::with_elements([
                block("block-blk-1").matching("[id$='-blk-1']"),
            ]));
            assert!(verifier.verify(OperationKind::Exists, "blk-1").await.success);
            assert!(!verifier.verify(OperationKind::Delete, "blk-1").await.success);
        }

        #[tokio::test]
        async fn test_duplicate_one_to_two() {
            let (verifier, driver, _) = verifier(MockDriver::with_elements([block("blk-1")]));
            assert!(!verifier.verify(OperationKind::Duplicate, "blk-1").await.success);

            driver.add_element(block("blk-1-copy"));
            let result = verifier.verify(OperationKind::Duplicate, "blk-1").await;
            assert!(result.success);
            assert_eq!(result.element_count, 2);
        }

        #[tokio::test]
        async fn test_add_requires_target_and_count() {
            let (verifier, driver, _) = verifier(MockDriver::with_elements([
                MockElement::new("blk-1", "div"),
            ]));
            let result = verifier.verify(OperationKind::Add, "blk-1").await;
            assert!(result.target_exists);
            assert!(!result.success);

            driver.add_element(MockElement::new("e1", "div").matching("[class*='element']"));
            let result = verifier.verify(OperationKind::Add, "blk-1").await;
            assert!(result.success);
            assert_eq!(result.element_count, 1);
        }

        #[tokio::test]
        async fn test_target_found_by_data_attribute() {
            let (verifier, _, _) = verifier(MockDriver::with_elements([
                MockElement::new("x", "div").matching("[data-block-id='b7']"),
            ]));
            let result = verifier.verify(OperationKind::Exists, "b7").await;
            assert!(result.success);
        }

        #[tokio::test]
        async fn test_move_reports_assumed_position() {
            let (verifier, _, _) = verifier(MockDriver::with_elements([block("blk-1"), block("blk-2")]));
            let result = verifier.verify(OperationKind::Move, "blk-1").await;
            assert!(result.success);
            assert_eq!(result.position_changed, Some(true));
        }

        #[tokio::test]
        async fn test_driver_fault_degrades() {
            let driver = MockDriver::with_elements([block("blk-1")]);
            driver.fail_next_queries(1);
            let (verifier, _, sink) = verifier(driver);
            let result = verifier.verify(OperationKind::Exists, "blk-1").await;
            assert!(!result.success);
            assert!(result.message.starts_with("verification failed"));
            assert_eq!(sink.events()[1].status, StepStatus::Warning);
        }

        #[tokio::test]
        async fn test_timeout_degrades() {
            let driver = MockDriver::with_elements([block("blk-1")]);
            driver.set_query_delay(Duration::from_millis(300));
            let driver = Arc::new(driver);
            let verifier = OperationVerifier::new(
                Arc::clone(&driver),
                Duration::from_millis(30),
                Arc::new(MemorySink::new()),
            );
            let result = verifier.verify(OperationKind::Exists, "blk-1").await;
            assert!(!result.success);
            assert!(result.message.contains("timed out"));
        }

        #[tokio::test]
        async fn test_empty_target_degrades() {
            let (verifier, driver, _) = verifier(MockDriver::new());
            let result = verifier.verify(OperationKind::Delete, "  ").await;
            assert!(!result.success);
            assert!(!driver.was_called("query"));
        }
    }
}
