//! Element resolver.
//!
//! Resolution escalates through five stages, each lookup under its own
//! short timeout:
//!
//! 1. special-case route (template pickers, create-site CTA)
//! 2. primary candidate
//! 3. fallback candidates, in order
//! 4. text variations from the bilingual term map
//! 5. ARIA roles (`button`, `link`, `menuitem`) named like the description
//!
//! Within a stage a visible match is preferred, but a present-but-hidden
//! match is still returned with `visible = false` so callers can force the
//! interaction. Driver errors and timeouts count as a miss for that lookup.

use crate::config::EngineConfig;
use crate::diagnostics;
use crate::driver::{AutomationDriver, ElementHandle, ElementState, NamePattern, Query};
use crate::events::{EventSink, StepEvent};
use crate::result::{EngineError, EngineResult};
use crate::selector::{ElementQuery, SelectorCandidate, SelectorKind};
use crate::variation::{text_variations, translate_term};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Event phase emitted by the resolver
pub const PHASE: &str = "resolve";

/// Roles searched by the last-resort stage
pub const FALLBACK_ROLES: &[&str] = &["button", "link", "menuitem"];

/// Description patterns that need a dedicated route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialRoute {
    /// Template picker cards, revealed on hover
    Template,
    /// Primary create-site call-to-action
    CreateSite,
}

const CREATE_SITE_PATTERNS: &[&str] = &[
    "create site",
    "new site",
    "site creation",
    "create new site",
    "サイト作成",
    "サイトを作成",
    "新規サイト",
];

impl SpecialRoute {
    /// Route for a description, if any
    #[must_use]
    pub fn detect(description: &str) -> Option<Self> {
        let lowered = description.to_lowercase();
        if lowered.contains("template") || description.contains("テンプレート") {
            Some(Self::Template)
        } else if CREATE_SITE_PATTERNS.iter().any(|p| lowered.contains(p)) {
            Some(Self::CreateSite)
        } else {
            None
        }
    }

    /// Containers hovered to reveal hidden controls
    #[must_use]
    pub const fn hover_targets(&self) -> &'static [&'static str] {
        match self {
            Self::Template => &[
                ".template-list",
                "#template-list",
                "[class*='template-item']",
                "[class*='template']",
            ],
            Self::CreateSite => &["#dashboard", ".site-list", "[class*='site-list']", "header"],
        }
    }

    /// Route-specific candidates tried after the caller's
    #[must_use]
    pub fn candidates(&self) -> Vec<SelectorCandidate> {
        let raw: &[&str] = match self {
            Self::Template => &[
                ".template-item .select-button",
                "[class*='template'] button",
                ".template-item",
                "[class*='template-item']",
                "text=テンプレートを選択",
            ],
            Self::CreateSite => &[
                "#button-create-site",
                ".create-site-button",
                "[class*='create-site']",
                "text=サイトを作成",
                "text=新規サイト作成",
                "role=button[name=\"Create Site\"]",
            ],
        };
        raw.iter().map(|s| SelectorCandidate::parse(s)).collect()
    }

    /// Short name used in logs and events
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::CreateSite => "create-site",
        }
    }
}

/// Stage that produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionStage {
    /// Special-case route
    SpecialRoute(SpecialRoute),
    /// Primary candidate
    Primary,
    /// Fallback at this index of `fallbacks`
    Fallback(usize),
    /// Text variation
    TextVariation,
    /// Role-based lookup
    Role,
}

impl fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpecialRoute(route) => write!(f, "special:{}", route.as_str()),
            Self::Primary => f.write_str("primary"),
            Self::Fallback(i) => write!(f, "fallback[{i}]"),
            Self::TextVariation => f.write_str("text-variation"),
            Self::Role => f.write_str("role"),
        }
    }
}

/// A located element plus how it was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    /// Driver handle, valid for the current operation only
    pub handle: ElementHandle,
    /// Visible at resolution time
    pub visible: bool,
    /// Index into primary + fallbacks; `candidate_count()` for synthesized stages
    pub matched_candidate_index: usize,
    /// Stage that matched
    pub stage: ResolutionStage,
    /// Candidate that matched
    pub candidate: SelectorCandidate,
}

/// Result of one lookup
enum Lookup {
    Found(ElementHandle, bool),
    Missing,
    Failed(EngineError),
}

/// Multi-stage element resolver
pub struct ElementResolver<D: AutomationDriver + ?Sized> {
    driver: Arc<D>,
    config: EngineConfig,
    sink: Arc<dyn EventSink>,
}

impl<D: AutomationDriver + ?Sized> fmt::Debug for ElementResolver<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<D: AutomationDriver + ?Sized> ElementResolver<D> {
    /// Create a resolver
    #[must_use]
    pub fn new(driver: Arc<D>, config: EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            driver,
            config,
            sink,
        }
    }

    /// Resolver settings
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve a query through every stage, or fail with `NotFound`
    pub async fn resolve(&self, query: &ElementQuery) -> EngineResult<ResolvedElement> {
        let description = query.description.as_str();
        let synthesized_index = query.candidate_count();
        let mut attempted = Vec::new();

        tracing::debug!(description, candidates = synthesized_index, "resolving element");
        self.sink
            .emit(StepEvent::start(PHASE, description).with_detail(query.primary.to_string()));

        if let Some(route) = SpecialRoute::detect(description) {
            let stage = ResolutionStage::SpecialRoute(route);
            attempted.push(stage.to_string());
            let outcome =
                tokio::time::timeout(self.config.special_route_timeout(), self.run_route(route, query))
                    .await;
            match outcome {
                Ok(Some(found)) => return Ok(self.report(description, found)),
                Ok(None) => self.miss(description, stage, "route found nothing"),
                Err(_) => self.miss(
                    description,
                    stage,
                    &format!("timed out after {}ms", self.config.special_route_timeout_ms),
                ),
            }
        }

        for (index, candidate) in query.candidates().enumerate() {
            let stage = if index == 0 {
                ResolutionStage::Primary
            } else {
                ResolutionStage::Fallback(index - 1)
            };
            attempted.push(format!("{stage}:{candidate}"));
            if let Some(found) = self
                .try_candidate(description, stage, index, candidate, self.config.candidate_timeout())
                .await
            {
                return Ok(self.report(description, found));
            }
        }

        for text in self.variations(query) {
            let candidate = SelectorCandidate::generated(text);
            attempted.push(format!("{}:{candidate}", ResolutionStage::TextVariation));
            if let Some(found) = self
                .try_candidate(
                    description,
                    ResolutionStage::TextVariation,
                    synthesized_index,
                    &candidate,
                    self.config.variation_timeout(),
                )
                .await
            {
                return Ok(self.report(description, found));
            }
        }

        let name = description.trim();
        if !name.is_empty() {
            for role in FALLBACK_ROLES {
                let candidate = SelectorCandidate::role(format!("{role}[name=\"{name}\"]"));
                attempted.push(format!("{}:{candidate}", ResolutionStage::Role));
                let role_query = match NamePattern::literal(name) {
                    Ok(pattern) => Query::Role {
                        role: (*role).to_string(),
                        name: Some(pattern),
                    },
                    Err(err) => {
                        self.miss(description, ResolutionStage::Role, &err.to_string());
                        break;
                    }
                };
                let lookup = self.timed(self.config.role_timeout(), self.lookup(&role_query)).await;
                if let Some(found) = self.settle(
                    description,
                    ResolutionStage::Role,
                    synthesized_index,
                    &candidate,
                    lookup,
                ) {
                    return Ok(self.report(description, found));
                }
            }
        }

        tracing::warn!(description, attempted = attempted.len(), "element not found");
        self.sink.emit(
            StepEvent::error(PHASE, description)
                .with_detail(format!("not found after {} strategies", attempted.len())),
        );
        diagnostics::capture_failure(
            self.driver.as_ref(),
            self.config.screenshot_dir.as_deref(),
            &format!("not-found-{description}"),
        )
        .await;

        Err(EngineError::NotFound {
            description: description.to_string(),
            attempted,
        })
    }

    /// Text variations of the description, then translations of text candidates
    fn variations(&self, query: &ElementQuery) -> Vec<String> {
        let mut out = text_variations(&query.description);
        for candidate in query.candidates() {
            if matches!(candidate.kind, SelectorKind::Text | SelectorKind::Generated) {
                if let Some(translated) = translate_term(&candidate.value) {
                    if !out.iter().any(|v| v == translated) {
                        out.push(translated.to_string());
                    }
                }
            }
        }
        out
    }

    async fn try_candidate(
        &self,
        description: &str,
        stage: ResolutionStage,
        index: usize,
        candidate: &SelectorCandidate,
        limit: Duration,
    ) -> Option<ResolvedElement> {
        let lookup = match candidate.to_query() {
            Ok(query) => self.timed(limit, self.lookup(&query)).await,
            Err(err) => Lookup::Failed(err),
        };
        self.settle(description, stage, index, candidate, lookup)
    }

    /// Log a lookup outcome and turn a hit into a `ResolvedElement`
    fn settle(
        &self,
        description: &str,
        stage: ResolutionStage,
        index: usize,
        candidate: &SelectorCandidate,
        lookup: Lookup,
    ) -> Option<ResolvedElement> {
        match lookup {
            Lookup::Found(handle, visible) => Some(ResolvedElement {
                handle,
                visible,
                matched_candidate_index: index,
                stage,
                candidate: candidate.clone(),
            }),
            Lookup::Missing => {
                self.miss(description, stage, &format!("no match for {candidate}"));
                None
            }
            Lookup::Failed(err) => {
                self.miss(description, stage, &format!("{candidate}: {err}"));
                None
            }
        }
    }

    async fn timed<F>(&self, limit: Duration, lookup: F) -> Lookup
    where
        F: Future<Output = Lookup>,
    {
        tokio::time::timeout(limit, lookup)
            .await
            .unwrap_or_else(|_| Lookup::Failed(EngineError::timeout(limit)))
    }

    /// Query once, preferring the first visible match
    async fn lookup(&self, query: &Query) -> Lookup {
        let handles = match self.driver.query(query).await {
            Ok(handles) => handles,
            Err(err) => return Lookup::Failed(err),
        };
        let mut first_hidden = None;
        for handle in handles {
            match self.driver.is_visible(&handle).await {
                Ok(true) => return Lookup::Found(handle, true),
                Ok(false) | Err(_) => {
                    if first_hidden.is_none() {
                        first_hidden = Some(handle);
                    }
                }
            }
        }
        first_hidden.map_or(Lookup::Missing, |handle| Lookup::Found(handle, false))
    }

    /// Hover-then-reveal, then forced visibility, for a special route
    async fn run_route(&self, route: SpecialRoute, query: &ElementQuery) -> Option<ResolvedElement> {
        let stage = ResolutionStage::SpecialRoute(route);
        let own = query.candidate_count();
        let candidates: Vec<(usize, SelectorCandidate)> = query
            .candidates()
            .cloned()
            .enumerate()
            .chain(route.candidates().into_iter().map(|c| (own, c)))
            .collect();

        for selector in route.hover_targets() {
            let Ok(containers) = self.driver.query(&Query::css(*selector)).await else {
                continue;
            };
            for container in containers {
                if let Err(err) = self.driver.hover(&container).await {
                    tracing::debug!(route = route.as_str(), error = %err, "hover failed");
                }
            }
        }

        let mut hidden = None;
        for (index, candidate) in &candidates {
            let Ok(lookup_query) = candidate.to_query() else {
                continue;
            };
            match self.lookup(&lookup_query).await {
                Lookup::Found(handle, true) => {
                    return Some(self.routed(stage, *index, candidate, handle, true));
                }
                Lookup::Found(handle, false) => {
                    let revealed = self
                        .driver
                        .wait_for(&handle, ElementState::Visible, self.config.reveal_wait())
                        .await
                        .is_ok();
                    if revealed {
                        return Some(self.routed(stage, *index, candidate, handle, true));
                    }
                    hidden = Some((*index, candidate.clone(), handle));
                    break;
                }
                Lookup::Missing | Lookup::Failed(_) => {}
            }
        }

        // A caller candidate that matched is the answer, shown or not
        if let Some((index, candidate, handle)) = &hidden {
            if *index < own {
                if candidate.kind == SelectorKind::Css {
                    self.force(route, candidate).await;
                }
                let visible = self.driver.is_visible(handle).await.unwrap_or(false);
                return Some(self.routed(stage, *index, candidate, handle.clone(), visible));
            }
        }

        tracing::debug!(route = route.as_str(), "forcing visibility");
        for (_, candidate) in candidates.iter().filter(|(_, c)| c.kind == SelectorKind::Css) {
            self.force(route, candidate).await;
        }
        for (index, candidate) in &candidates {
            let Ok(lookup_query) = candidate.to_query() else {
                continue;
            };
            if let Lookup::Found(handle, true) = self.lookup(&lookup_query).await {
                return Some(self.routed(stage, *index, candidate, handle, true));
            }
        }

        hidden.map(|(index, candidate, handle)| self.routed(stage, index, &candidate, handle, false))
    }

    async fn force(&self, route: SpecialRoute, candidate: &SelectorCandidate) {
        if let Err(err) = self.driver.force_visible(&candidate.value).await {
            tracing::debug!(route = route.as_str(), selector = %candidate, error = %err, "force visible failed");
        }
    }

    fn routed(
        &self,
        stage: ResolutionStage,
        index: usize,
        candidate: &SelectorCandidate,
        handle: ElementHandle,
        visible: bool,
    ) -> ResolvedElement {
        ResolvedElement {
            handle,
            visible,
            matched_candidate_index: index,
            stage,
            candidate: candidate.clone(),
        }
    }

    fn miss(&self, description: &str, stage: ResolutionStage, detail: &str) {
        tracing::debug!(description, stage = %stage, detail, "stage missed");
        self.sink
            .emit(StepEvent::warning(PHASE, stage.to_string()).with_detail(format!("{description}: {detail}")));
    }

    fn report(&self, description: &str, found: ResolvedElement) -> ResolvedElement {
        tracing::info!(
            description,
            stage = %found.stage,
            index = found.matched_candidate_index,
            visible = found.visible,
            "element resolved"
        );
        self.sink.emit(
            StepEvent::success(PHASE, found.stage.to_string()).with_detail(format!(
                "{description}: {} (visible={})",
                found.candidate, found.visible
            )),
        );
        found
    }
}
