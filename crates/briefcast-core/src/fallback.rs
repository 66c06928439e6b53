//! Ordered provider fallback chain.
//!
//! Runs an operation against an ordered list of interchangeable providers,
//! stopping at the first success. The first provider is the primary tier;
//! every subsequent one is a fallback. The caller learns which provider and
//! tier served the request plus a per-provider attempt audit, so the quality
//! gate can reason about degraded provenance later.

use std::future::Future;
use std::time::Instant;

use briefcast_state::ProviderTier;
use tracing::warn;

use crate::error::StageFailure;

/// A provider that can serve a stage operation.
pub trait FallbackProvider {
    fn name(&self) -> &str;
}

impl FallbackProvider for String {
    fn name(&self) -> &str {
        self
    }
}

impl FallbackProvider for &str {
    fn name(&self) -> &str {
        self
    }
}

/// One provider invocation in the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAttempt {
    pub provider: String,
    pub success: bool,
    pub duration_ms: u64,
}

/// A successful chain result: the value plus provenance bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackOutcome<T> {
    pub value: T,
    /// Name of the provider that served the request.
    pub provider: String,
    /// Primary when the first provider served it, Fallback otherwise.
    pub tier: ProviderTier,
    /// Every provider tried, in order, including the successful one.
    pub attempts: Vec<ProviderAttempt>,
}

/// Iterate `providers` in order, invoking `op` on each until one succeeds.
///
/// `on_fallback(from, to, error)` fires when a provider fails and a next one
/// exists. If every provider fails, the last error propagates.
pub async fn with_fallback<P, T, Op, Fut, Cb>(
    providers: &[P],
    mut op: Op,
    mut on_fallback: Cb,
) -> Result<FallbackOutcome<T>, StageFailure>
where
    P: FallbackProvider,
    Op: FnMut(&P) -> Fut,
    Fut: Future<Output = Result<T, StageFailure>>,
    Cb: FnMut(&str, &str, &StageFailure),
{
    if providers.is_empty() {
        return Err(StageFailure::unclassified(
            "NO_PROVIDERS",
            "fallback chain invoked with an empty provider list",
        ));
    }

    let mut attempts = Vec::with_capacity(providers.len());
    let mut last_error: Option<StageFailure> = None;

    for (index, provider) in providers.iter().enumerate() {
        let start = Instant::now();
        match op(provider).await {
            Ok(value) => {
                attempts.push(ProviderAttempt {
                    provider: provider.name().to_string(),
                    success: true,
                    duration_ms: start.elapsed().as_millis() as u64,
                });
                let tier = if index == 0 {
                    ProviderTier::Primary
                } else {
                    ProviderTier::Fallback
                };
                return Ok(FallbackOutcome {
                    value,
                    provider: provider.name().to_string(),
                    tier,
                    attempts,
                });
            }
            Err(failure) => {
                attempts.push(ProviderAttempt {
                    provider: provider.name().to_string(),
                    success: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                });
                if let Some(next) = providers.get(index + 1) {
                    warn!(
                        from = provider.name(),
                        to = next.name(),
                        code = %failure.code,
                        "provider failed, falling back"
                    );
                    on_fallback(provider.name(), next.name(), &failure);
                }
                last_error = Some(failure);
            }
        }
    }

    // providers is non-empty, so at least one failure was recorded
    Err(last_error.expect("non-empty provider chain must record an error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefcast_state::Severity;

    fn fail(code: &str) -> StageFailure {
        StageFailure::new(code, "provider unavailable", Severity::Degraded)
    }

    #[tokio::test]
    async fn primary_success_short_circuits() {
        let providers = ["anthropic", "openai", "local"];
        let outcome = with_fallback(
            &providers,
            |p| {
                let name = p.name().to_string();
                async move { Ok::<_, StageFailure>(format!("script by {name}")) }
            },
            |_, _, _| panic!("no fallback expected"),
        )
        .await
        .unwrap();

        assert_eq!(outcome.provider, "anthropic");
        assert_eq!(outcome.tier, ProviderTier::Primary);
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.attempts[0].success);
    }

    #[tokio::test]
    async fn third_provider_serves_after_two_failures() {
        let providers = ["p1", "p2", "p3"];
        let mut transitions = Vec::new();

        let outcome = with_fallback(
            &providers,
            |p| {
                let name = p.name().to_string();
                async move {
                    if name == "p3" {
                        Ok(name)
                    } else {
                        Err(fail("PROVIDER_DOWN"))
                    }
                }
            },
            |from, to, _| transitions.push((from.to_string(), to.to_string())),
        )
        .await
        .unwrap();

        assert_eq!(outcome.provider, "p3");
        assert_eq!(outcome.tier, ProviderTier::Fallback);
        assert_eq!(outcome.attempts.len(), 3);
        assert!(!outcome.attempts[0].success);
        assert!(!outcome.attempts[1].success);
        assert!(outcome.attempts[2].success);
        assert_eq!(
            transitions,
            vec![
                ("p1".to_string(), "p2".to_string()),
                ("p2".to_string(), "p3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn all_failures_propagate_last_error() {
        let providers = ["p1", "p2"];
        let err = with_fallback(
            &providers,
            |p| {
                let name = p.name().to_string();
                async move { Err::<(), _>(fail(&format!("DOWN_{name}"))) }
            },
            |_, _, _| {},
        )
        .await
        .unwrap_err();

        assert_eq!(err.code, "DOWN_p2");
    }

    #[tokio::test]
    async fn empty_chain_is_an_error() {
        let providers: [&str; 0] = [];
        let err = with_fallback(
            &providers,
            |_| async { Ok::<(), StageFailure>(()) },
            |_, _, _| {},
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "NO_PROVIDERS");
    }
}
