use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::app::AppConfig;
use crate::error::{ProviderError, Result};
use crate::models::provider::{CooldownPolicy, LlmProvider, ProviderStatus, ProviderStatusReport};
use crate::models::registry;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationDefaults {
    pub timeout: Duration,
    pub max_retries: usize,
    pub cooldowns: CooldownPolicy,
}

impl Default for RotationDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            cooldowns: CooldownPolicy::default(),
        }
    }
}

/// Round-robin selection with cross-provider fallback.
pub struct ProviderRotator {
    providers: Vec<Arc<dyn LlmProvider>>,
    cursor: AtomicUsize,
    defaults: RotationDefaults,
}

impl ProviderRotator {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        Self::with_defaults(providers, RotationDefaults::default())
    }

    pub fn with_defaults(providers: Vec<Arc<dyn LlmProvider>>, defaults: RotationDefaults) -> Self {
        info!(
            "Provider rotator initialised with {} provider(s): [{}]",
            providers.len(),
            providers.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
        );

        Self {
            providers,
            cursor: AtomicUsize::new(0),
            defaults,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let providers = registry::build_providers(config)?;
        let defaults = RotationDefaults {
            timeout: Duration::from_secs(config.rotation.timeout_secs),
            max_retries: config.rotation.max_retries,
            cooldowns: config.cooldown.to_policy(),
        };
        Ok(Self::with_defaults(providers, defaults))
    }

    pub fn providers(&self) -> &[Arc<dyn LlmProvider>] {
        &self.providers
    }

    pub fn defaults(&self) -> &RotationDefaults {
        &self.defaults
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Next available provider in round-robin order, degrading to the first
    /// enabled one when every provider is cooling down or saturated.
    pub fn next_available_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        let count = self.providers.len();
        if count == 0 {
            return None;
        }

        loop {
            let start = self.cursor.load(Ordering::Acquire) % count;
            let found = (0..count)
                .map(|offset| (start + offset) % count)
                .find(|&index| self.providers[index].is_available());

            let Some(index) = found else {
                break;
            };

            let next = (index + 1) % count;
            if self
                .cursor
                .compare_exchange(start, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let provider = &self.providers[index];
                debug!("Selected provider {} (index {})", provider.name(), index);
                return Some(Arc::clone(provider));
            }
            // Another caller advanced the cursor first; rescan from its position.
        }

        let fallback = self.providers.iter().find(|p| p.is_enabled()).cloned();
        match &fallback {
            Some(provider) => warn!(
                "No provider currently available, degrading to first enabled provider {}",
                provider.name()
            ),
            None => warn!("No enabled providers configured"),
        }
        fallback
    }

    pub async fn generate(&self, prompt: &str, timeout: Duration, max_retries: usize) -> std::result::Result<String, ProviderError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("generate", %request_id);
        self.generate_inner(prompt, timeout, max_retries).instrument(span).await
    }

    pub async fn generate_with_defaults(&self, prompt: &str) -> std::result::Result<String, ProviderError> {
        self.generate(prompt, self.defaults.timeout, self.defaults.max_retries).await
    }

    async fn generate_inner(&self, prompt: &str, timeout: Duration, max_retries: usize) -> std::result::Result<String, ProviderError> {
        if self.providers.is_empty() {
            error!("Generation requested but no AI providers are configured");
            return Err(ProviderError::exhausted("No AI providers configured", None));
        }

        if max_retries == 0 {
            warn!("Generation requested with max_retries = 0, no provider was tried");
            return Err(ProviderError::exhausted("No attempts made: max_retries is 0", None));
        }

        let attempts = max_retries;
        let mut errors: Vec<String> = Vec::new();
        let mut last_error: Option<ProviderError> = None;

        for attempt in 1..=attempts {
            let Some(provider) = self.next_available_provider() else {
                error!("No provider could be selected (attempt {}/{})", attempt, attempts);
                let message = aggregate("No AI providers available", &errors);
                return Err(ProviderError::exhausted(message, last_error.as_ref()));
            };

            debug!("Attempt {}/{} using {}", attempt, attempts, provider.name());

            match provider.generate(prompt, timeout).await {
                Ok(text) => {
                    info!("Generated response with {} on attempt {}/{}", provider.name(), attempt, attempts);
                    return Ok(text);
                }
                Err(e) => {
                    warn!(
                        "Provider {} failed (attempt {}/{}): {}",
                        provider.name(),
                        attempt,
                        attempts,
                        e.message
                    );
                    errors.push(format!("{}: {}", provider.name(), e.message));

                    if e.is_rate_limited() {
                        provider.set_cooldown(self.defaults.cooldowns.for_rate_limit(e.retry_after));
                    }
                    last_error = Some(e);
                }
            }
        }

        error!("All {} generation attempt(s) failed", attempts);
        let message = aggregate(&format!("All {} attempt(s) failed", attempts), &errors);
        Err(ProviderError::exhausted(message, last_error.as_ref()))
    }

    pub fn status(&self) -> Vec<ProviderStatusReport> {
        self.providers.iter().map(|p| p.report()).collect()
    }

    pub fn available_count(&self) -> usize {
        self.providers.iter().filter(|p| p.is_available()).count()
    }

    pub fn summary(&self) -> RotatorSummary {
        let providers = self.status();
        RotatorSummary {
            total: providers.len(),
            enabled: providers.iter().filter(|r| r.status != ProviderStatus::Disabled).count(),
            available: providers.iter().filter(|r| r.available).count(),
            providers,
        }
    }
}

fn aggregate(headline: &str, errors: &[String]) -> String {
    if errors.is_empty() {
        headline.to_string()
    } else {
        format!("{}: {}", headline, errors.join("; "))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RotatorSummary {
    pub total: usize,
    pub enabled: usize,
    pub available: usize,
    pub providers: Vec<ProviderStatusReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderErrorKind, ROTATOR_SOURCE};
    use crate::models::stats::ProviderStats;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Debug, Clone, Copy)]
    enum Behaviour {
        Succeed,
        RateLimit,
        Fail,
        TimeOut,
    }

    struct MockProvider {
        name: String,
        enabled: bool,
        rpm: u32,
        behaviour: Mutex<Behaviour>,
        stats: ProviderStats,
    }

    impl MockProvider {
        fn new(name: &str, rpm: u32, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                enabled: true,
                rpm,
                behaviour: Mutex::new(behaviour),
                stats: ProviderStats::new(),
            })
        }

        fn disabled(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                enabled: false,
                rpm: 10,
                behaviour: Mutex::new(Behaviour::Succeed),
                stats: ProviderStats::new(),
            })
        }

        fn set_behaviour(&self, behaviour: Behaviour) {
            *self.behaviour.lock() = behaviour;
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        fn rpm_limit(&self) -> u32 {
            self.rpm
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        fn stats(&self) -> &ProviderStats {
            &self.stats
        }

        async fn generate(&self, _prompt: &str, _timeout: Duration) -> std::result::Result<String, ProviderError> {
            if !self.enabled {
                return Err(ProviderError::not_enabled(&self.name));
            }
            let behaviour = *self.behaviour.lock();
            match behaviour {
                Behaviour::Succeed => {
                    self.stats.record_call(true, None);
                    Ok(format!("response from {}", self.name))
                }
                Behaviour::RateLimit => {
                    self.stats.record_call(false, Some("HTTP 429"));
                    self.stats.set_cooldown(Duration::from_secs(60));
                    Err(ProviderError::rate_limited(&self.name, "HTTP 429", None))
                }
                Behaviour::Fail => {
                    self.stats.record_call(false, Some("HTTP 400: bad request"));
                    Err(ProviderError::failure(&self.name, "HTTP 400: bad request"))
                }
                Behaviour::TimeOut => {
                    self.stats.record_call(false, Some("timed out"));
                    Err(ProviderError::timeout(&self.name, "timed out"))
                }
            }
        }
    }

    fn rotator_of(providers: &[Arc<MockProvider>]) -> ProviderRotator {
        let providers = providers
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn LlmProvider>)
            .collect();
        ProviderRotator::new(providers)
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_round_robin_visits_each_provider_once() {
        let providers = [
            MockProvider::new("a", 100, Behaviour::Succeed),
            MockProvider::new("b", 100, Behaviour::Succeed),
            MockProvider::new("c", 100, Behaviour::Succeed),
        ];
        let rotator = rotator_of(&providers);

        let mut served = Vec::new();
        for _ in 0..3 {
            served.push(rotator.generate("hi", TIMEOUT, 3).await.unwrap());
        }
        assert_eq!(served, vec!["response from a", "response from b", "response from c"]);

        // The cycle starts over.
        assert_eq!(rotator.generate("hi", TIMEOUT, 3).await.unwrap(), "response from a");
    }

    #[tokio::test]
    async fn test_fallback_after_rate_limit() {
        let a = MockProvider::new("a", 100, Behaviour::RateLimit);
        let b = MockProvider::new("b", 100, Behaviour::Succeed);
        let rotator = rotator_of(&[Arc::clone(&a), Arc::clone(&b)]);

        let text = rotator.generate("hi", TIMEOUT, 2).await.unwrap();

        assert_eq!(text, "response from b");
        assert!(a.stats().is_on_cooldown());
        assert_eq!(a.status(), ProviderStatus::RateLimited);
        assert_eq!(a.stats().calls_failed(), 1);
        assert_eq!(b.stats().calls_succeeded(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_provider_is_skipped_afterwards() {
        let a = MockProvider::new("a", 100, Behaviour::RateLimit);
        let b = MockProvider::new("b", 100, Behaviour::Succeed);
        let rotator = rotator_of(&[Arc::clone(&a), Arc::clone(&b)]);

        rotator.generate("hi", TIMEOUT, 2).await.unwrap();
        a.set_behaviour(Behaviour::Succeed);

        for _ in 0..4 {
            assert_eq!(rotator.generate("hi", TIMEOUT, 2).await.unwrap(), "response from b");
        }
        assert_eq!(a.stats().calls_made(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_lists_every_attempt() {
        let providers = [
            MockProvider::new("a", 100, Behaviour::Fail),
            MockProvider::new("b", 100, Behaviour::TimeOut),
            MockProvider::new("c", 100, Behaviour::Fail),
        ];
        let rotator = rotator_of(&providers);

        let err = rotator.generate("hi", TIMEOUT, 3).await.unwrap_err();

        assert_eq!(err.provider, ROTATOR_SOURCE);
        assert_eq!(err.kind, ProviderErrorKind::Exhausted);
        assert!(err.message.contains("a: HTTP 400: bad request"));
        assert!(err.message.contains("b: timed out"));
        assert!(err.message.contains("c: HTTP 400: bad request"));
        assert!(!err.timeout, "terminal failure was c's generic error");

        for provider in &providers {
            assert_eq!(provider.stats().calls_succeeded(), 0);
            assert_eq!(provider.stats().calls_failed(), 1);
        }
    }

    #[tokio::test]
    async fn test_exhaustion_flags_follow_last_attempt() {
        let providers = [
            MockProvider::new("a", 100, Behaviour::Fail),
            MockProvider::new("b", 100, Behaviour::RateLimit),
        ];
        let rotator = rotator_of(&providers);

        let err = rotator.generate("hi", TIMEOUT, 2).await.unwrap_err();
        assert!(err.rate_limited);
        assert!(!err.timeout);
    }

    #[tokio::test]
    async fn test_attempts_bounded_by_max_retries() {
        let a = MockProvider::new("a", 100, Behaviour::Fail);
        let rotator = rotator_of(&[Arc::clone(&a)]);

        let err = rotator.generate("hi", TIMEOUT, 4).await.unwrap_err();
        assert_eq!(a.stats().calls_made(), 4);
        assert!(err.message.starts_with("All 4 attempt(s) failed"));

        let err = rotator.generate("hi", TIMEOUT, 0).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Exhausted);
        assert_eq!(err.provider, ROTATOR_SOURCE);
        assert!(err.message.contains("No attempts made"));
        assert_eq!(a.stats().calls_made(), 4);
    }

    #[tokio::test]
    async fn test_zero_retries_never_calls_a_healthy_provider() {
        let a = MockProvider::new("a", 100, Behaviour::Succeed);
        let rotator = rotator_of(&[Arc::clone(&a)]);

        let err = rotator.generate("hi", TIMEOUT, 0).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Exhausted);
        assert!(!err.rate_limited && !err.timeout);
        assert_eq!(a.stats().calls_made(), 0);
    }

    #[tokio::test]
    async fn test_empty_rotator_fails_immediately() {
        let rotator = ProviderRotator::new(Vec::new());
        let err = rotator.generate("hi", TIMEOUT, 3).await.unwrap_err();

        assert_eq!(err.provider, ROTATOR_SOURCE);
        assert!(err.message.contains("No AI providers configured"));
        assert!(rotator.next_available_provider().is_none());
    }

    #[tokio::test]
    async fn test_no_enabled_provider() {
        let providers = [MockProvider::disabled("a"), MockProvider::disabled("b")];
        let rotator = rotator_of(&providers);

        assert!(rotator.next_available_provider().is_none());
        let err = rotator.generate("hi", TIMEOUT, 3).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Exhausted);
        assert!(err.message.contains("No AI providers available"));
    }

    #[tokio::test]
    async fn test_degrades_to_first_enabled_provider() {
        let off = MockProvider::disabled("off");
        let a = MockProvider::new("a", 100, Behaviour::Succeed);
        let b = MockProvider::new("b", 100, Behaviour::Succeed);
        a.set_cooldown(Duration::from_secs(60));
        b.set_cooldown(Duration::from_secs(60));
        let rotator = rotator_of(&[off, Arc::clone(&a), Arc::clone(&b)]);

        let chosen = rotator.next_available_provider().unwrap();
        assert_eq!(chosen.name(), "a");
        assert_eq!(rotator.generate("hi", TIMEOUT, 1).await.unwrap(), "response from a");
    }

    #[tokio::test]
    async fn test_status_queries_do_not_mutate() {
        let a = MockProvider::new("a", 100, Behaviour::Succeed);
        let b = MockProvider::new("b", 100, Behaviour::Fail);
        let rotator = rotator_of(&[Arc::clone(&a), Arc::clone(&b)]);
        rotator.generate("hi", TIMEOUT, 2).await.unwrap();
        rotator.generate("hi", TIMEOUT, 1).await.unwrap_err();

        let first = rotator.status();
        let second = rotator.status();
        assert_eq!(first.len(), 2);
        for (x, y) in first.iter().zip(second.iter()) {
            assert_eq!(x.name, y.name);
            assert_eq!(x.status, y.status);
            assert_eq!(x.calls_made, y.calls_made);
            assert_eq!(x.calls_succeeded, y.calls_succeeded);
            assert_eq!(x.calls_failed, y.calls_failed);
            assert_eq!(x.calls_last_minute, y.calls_last_minute);
        }
        assert_eq!(a.stats().calls_made(), 1);
        assert_eq!(b.stats().calls_made(), 1);
        assert_eq!(first[1].success_rate, 0.0);
        assert_eq!(first[1].last_error.as_deref(), Some("HTTP 400: bad request"));
    }

    #[tokio::test]
    async fn test_rpm_ceiling_takes_provider_out_of_rotation() {
        let fast = MockProvider::new("fast", 100, Behaviour::Succeed);
        let medium = MockProvider::new("medium", 60, Behaviour::Succeed);
        let slow = MockProvider::new("slow", 20, Behaviour::Succeed);
        let rotator = rotator_of(&[Arc::clone(&fast), Arc::clone(&medium), Arc::clone(&slow)]);

        let mut served: HashMap<String, usize> = HashMap::new();
        for _ in 0..60 {
            let text = rotator.generate("hi", TIMEOUT, 3).await.unwrap();
            *served.entry(text).or_default() += 1;
        }
        assert_eq!(slow.stats().calls_in_last_minute(), 20);
        assert_eq!(slow.status(), ProviderStatus::RateLimited);
        assert!(!slow.is_available());

        for _ in 0..10 {
            let text = rotator.generate("hi", TIMEOUT, 3).await.unwrap();
            assert_ne!(text, "response from slow");
        }
        assert_eq!(slow.stats().calls_made(), 20);
        assert_eq!(fast.stats().calls_made() + medium.stats().calls_made(), 50);

        let summary = rotator.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.enabled, 3);
        assert_eq!(summary.available, 2);
    }

    #[tokio::test]
    async fn test_explicit_cooldown_follows_retry_hint() {
        struct Hinted {
            stats: ProviderStats,
        }

        #[async_trait]
        impl LlmProvider for Hinted {
            fn name(&self) -> &str {
                "hinted"
            }
            fn model(&self) -> &str {
                "mock-model"
            }
            fn rpm_limit(&self) -> u32 {
                10
            }
            fn is_enabled(&self) -> bool {
                true
            }
            fn stats(&self) -> &ProviderStats {
                &self.stats
            }
            async fn generate(&self, _prompt: &str, _timeout: Duration) -> std::result::Result<String, ProviderError> {
                self.stats.record_call(false, Some("HTTP 429"));
                Err(ProviderError::rate_limited("hinted", "HTTP 429", Some(Duration::from_secs(45))))
            }
        }

        let hinted = Arc::new(Hinted { stats: ProviderStats::new() });
        let rotator = ProviderRotator::new(vec![Arc::clone(&hinted) as Arc<dyn LlmProvider>]);

        let err = rotator.generate("hi", TIMEOUT, 1).await.unwrap_err();
        assert!(err.rate_limited);

        let remaining = hinted.stats().cooldown_remaining().unwrap();
        assert!(remaining <= Duration::from_secs(45));
        assert!(remaining > Duration::from_secs(40));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_cursor() {
        let providers = [
            MockProvider::new("a", 100, Behaviour::Succeed),
            MockProvider::new("b", 100, Behaviour::Succeed),
            MockProvider::new("c", 100, Behaviour::Succeed),
            MockProvider::new("d", 100, Behaviour::Succeed),
        ];
        let rotator = Arc::new(rotator_of(&providers));

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let rotator = Arc::clone(&rotator);
                tokio::spawn(async move { rotator.generate("hi", TIMEOUT, 3).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let total: u64 = providers.iter().map(|p| p.stats().calls_made()).sum();
        assert_eq!(total, 40);
        for provider in &providers {
            assert_eq!(provider.stats().calls_made(), 10);
        }
    }
}
