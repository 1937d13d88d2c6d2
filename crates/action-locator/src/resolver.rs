//! Ordered selector resolution

use action_primitives::{DriverError, UiDriver};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::SelectorRegistry;
use crate::errors::LocatorError;
use crate::types::{ProbeSample, ResolutionFailure, ResolveScope, ResolvedTarget, SelectorSpec};

/// Tests whether a concrete locator currently matches something actionable.
#[async_trait]
pub trait LocatorProbe: Send + Sync {
    async fn probe(&self, locator: &str) -> Result<bool, DriverError>;
}

/// Probe backed by a [`UiDriver`].
pub struct DriverProbe<'a>(pub &'a dyn UiDriver);

#[async_trait]
impl LocatorProbe for DriverProbe<'_> {
    async fn probe(&self, locator: &str) -> Result<bool, DriverError> {
        self.0.probe(locator).await
    }
}

/// Receives per-locator samples and exhaustion events.
pub trait ResolutionObserver: Send + Sync {
    fn on_probe(&self, sample: &ProbeSample);

    fn on_exhausted(&self, failure: &ResolutionFailure);
}

/// Observer that discards everything.
pub struct NoopObserver;

impl ResolutionObserver for NoopObserver {
    fn on_probe(&self, _sample: &ProbeSample) {}

    fn on_exhausted(&self, _failure: &ResolutionFailure) {}
}

/// Resolves logical target names against the active selector catalog.
///
/// Locators are always probed in declared order starting from the primary,
/// regardless of how earlier resolutions went.
pub struct SelectorResolver {
    registry: Arc<SelectorRegistry>,
    observer: Arc<dyn ResolutionObserver>,
}

impl SelectorResolver {
    pub fn new(registry: Arc<SelectorRegistry>, observer: Arc<dyn ResolutionObserver>) -> Self {
        Self { registry, observer }
    }

    pub fn registry(&self) -> &Arc<SelectorRegistry> {
        &self.registry
    }

    /// Resolve `logical_name` on the scope's site.
    pub async fn resolve(
        &self,
        scope: &ResolveScope,
        logical_name: &str,
        probe: &dyn LocatorProbe,
    ) -> Result<ResolvedTarget, LocatorError> {
        let spec = self.registry.spec(&scope.adapter, logical_name)?;
        self.resolve_spec(scope, &spec, probe).await
    }

    /// Resolve against an explicit spec.
    pub async fn resolve_spec(
        &self,
        scope: &ResolveScope,
        spec: &SelectorSpec,
        probe: &dyn LocatorProbe,
    ) -> Result<ResolvedTarget, LocatorError> {
        debug!(
            site = %spec.site,
            logical = %spec.logical_name,
            candidates = spec.locators.len(),
            "resolving selector"
        );

        for (index, locator) in spec.locators.iter().enumerate() {
            let matched = match probe.probe(locator).await {
                Ok(matched) => matched,
                Err(err) => {
                    warn!(locator = %locator, "probe failed, treating as no match: {}", err);
                    false
                }
            };

            self.observer.on_probe(&ProbeSample {
                adapter: scope.adapter.clone(),
                action: scope.action.clone(),
                logical_name: spec.logical_name.clone(),
                locator: locator.clone(),
                matched,
            });

            if matched {
                if index > 0 {
                    info!(
                        logical = %spec.logical_name,
                        locator = %locator,
                        index,
                        "resolved via fallback locator"
                    );
                }
                return Ok(ResolvedTarget {
                    logical_name: spec.logical_name.clone(),
                    locator: locator.clone(),
                    index,
                    probes: index + 1,
                });
            }
        }

        warn!(
            site = %spec.site,
            logical = %spec.logical_name,
            "all locators exhausted"
        );
        self.observer.on_exhausted(&ResolutionFailure {
            adapter: scope.adapter.clone(),
            action: scope.action.clone(),
            logical_name: spec.logical_name.clone(),
            tried: spec.locators.clone(),
        });
        Err(LocatorError::NotFound {
            site: spec.site.clone(),
            logical_name: spec.logical_name.clone(),
            tried: spec.locators.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SelectorCatalog;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    struct ScriptedProbe {
        hits: HashSet<String>,
        errors: HashSet<String>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        fn new(hits: &[&str]) -> Self {
            Self {
                hits: hits.iter().map(|s| s.to_string()).collect(),
                errors: HashSet::new(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LocatorProbe for ScriptedProbe {
        async fn probe(&self, locator: &str) -> Result<bool, DriverError> {
            self.seen.lock().push(locator.to_string());
            if self.errors.contains(locator) {
                return Err(DriverError::Io("detached".into()));
            }
            Ok(self.hits.contains(locator))
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        samples: Mutex<Vec<ProbeSample>>,
        exhausted: Mutex<Vec<ResolutionFailure>>,
    }

    impl ResolutionObserver for RecordingObserver {
        fn on_probe(&self, sample: &ProbeSample) {
            self.samples.lock().push(sample.clone());
        }

        fn on_exhausted(&self, failure: &ResolutionFailure) {
            self.exhausted.lock().push(failure.clone());
        }
    }

    fn resolver(observer: Arc<RecordingObserver>) -> SelectorResolver {
        let mut catalog = SelectorCatalog::new();
        catalog.insert(
            "site",
            "primary_button",
            vec![".btn-primary".into(), ".btn-fallback".into()],
        );
        SelectorResolver::new(Arc::new(SelectorRegistry::new(catalog)), observer)
    }

    #[test]
    fn falls_back_to_second_locator() {
        let observer = Arc::new(RecordingObserver::default());
        let resolver = resolver(observer.clone());
        let probe = ScriptedProbe::new(&[".btn-fallback"]);
        let scope = ResolveScope::new("site", "submit");

        let resolved =
            tokio_test::block_on(resolver.resolve(&scope, "primary_button", &probe)).unwrap();

        assert_eq!(resolved.locator, ".btn-fallback");
        assert!(resolved.used_fallback());
        let samples = observer.samples.lock();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples.iter().filter(|s| !s.matched).count(), 1);
        assert_eq!(samples.iter().filter(|s| s.matched).count(), 1);
        assert!(observer.exhausted.lock().is_empty());
    }

    #[test]
    fn primary_is_tried_first_even_after_fallback_wins() {
        let observer = Arc::new(RecordingObserver::default());
        let resolver = resolver(observer);
        let scope = ResolveScope::new("site", "submit");

        let probe = ScriptedProbe::new(&[".btn-fallback"]);
        tokio_test::block_on(resolver.resolve(&scope, "primary_button", &probe)).unwrap();
        tokio_test::block_on(resolver.resolve(&scope, "primary_button", &probe)).unwrap();

        assert_eq!(
            *probe.seen.lock(),
            vec![".btn-primary", ".btn-fallback", ".btn-primary", ".btn-fallback"]
        );
    }

    #[test]
    fn exhaustion_reports_not_found_and_aggregate_failure() {
        let observer = Arc::new(RecordingObserver::default());
        let resolver = resolver(observer.clone());
        let mut probe = ScriptedProbe::new(&[]);
        probe.errors.insert(".btn-primary".into());
        let scope = ResolveScope::new("site", "submit");

        let err =
            tokio_test::block_on(resolver.resolve(&scope, "primary_button", &probe)).unwrap_err();

        match err {
            LocatorError::NotFound { tried, .. } => {
                assert_eq!(tried, vec![".btn-primary", ".btn-fallback"])
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(observer.samples.lock().len(), 2);
        assert_eq!(observer.exhausted.lock().len(), 1);
    }
}
