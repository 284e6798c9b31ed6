use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ComplianceSection, FailurePolicy};
use crate::services::{CategorySeverity, ContentSafety};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ComplianceDecision {
    /// Gate disabled.
    Skipped,
    Approved {
        max_severity: u8,
    },
    Blocked {
        reason: String,
        categories: Vec<CategorySeverity>,
    },
    /// The check could not run and the policy lets the post through anyway.
    Unverified {
        reason: String,
    },
}

impl ComplianceDecision {
    pub fn allows_publication(&self) -> bool {
        !matches!(self, ComplianceDecision::Blocked { .. })
    }
}

/// Screens captions before anything is published.
///
/// A provider error never counts as approval on its own: the configured
/// [`FailurePolicy`] decides, and `Closed` blocks.
#[derive(Clone)]
pub struct ComplianceGate {
    provider: Option<Arc<dyn ContentSafety>>,
    config: ComplianceSection,
}

impl ComplianceGate {
    pub fn new(provider: Option<Arc<dyn ContentSafety>>, config: ComplianceSection) -> Self {
        Self { provider, config }
    }

    pub fn disabled() -> Self {
        Self::new(None, ComplianceSection::default())
    }

    pub async fn review(&self, text: &str) -> ComplianceDecision {
        if !self.config.enabled {
            return ComplianceDecision::Skipped;
        }
        let Some(provider) = &self.provider else {
            return self.on_failure("no content-safety provider configured".into());
        };
        match provider.analyze_text(text).await {
            Ok(categories) => self.judge(categories),
            Err(err) => self.on_failure(format!("content safety check failed: {err}")),
        }
    }

    fn judge(&self, categories: Vec<CategorySeverity>) -> ComplianceDecision {
        let threshold = self.config.severity_threshold;
        let max_severity = categories
            .iter()
            .map(|category| category.severity)
            .max()
            .unwrap_or(0);
        let offending: Vec<_> = categories
            .into_iter()
            .filter(|category| category.severity >= threshold)
            .collect();
        if offending.is_empty() {
            info!(max_severity, "caption approved");
            return ComplianceDecision::Approved { max_severity };
        }
        let reason = offending
            .iter()
            .map(|category| format!("{}={}", category.category, category.severity))
            .collect::<Vec<_>>()
            .join(", ");
        warn!(flagged = %reason, threshold, "caption blocked");
        ComplianceDecision::Blocked {
            reason: format!("flagged {reason} (threshold {threshold})"),
            categories: offending,
        }
    }

    fn on_failure(&self, reason: String) -> ComplianceDecision {
        match self.config.failure_policy {
            FailurePolicy::Open => {
                warn!(reason = %reason, "compliance unverified, publishing under open policy");
                ComplianceDecision::Unverified { reason }
            }
            FailurePolicy::Closed => {
                warn!(reason = %reason, "compliance unverified, blocking under closed policy");
                ComplianceDecision::Blocked {
                    reason,
                    categories: Vec::new(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ServiceError, ServiceResult};
    use async_trait::async_trait;

    struct Fixed(Option<Vec<CategorySeverity>>);

    #[async_trait]
    impl ContentSafety for Fixed {
        async fn analyze_text(&self, _text: &str) -> ServiceResult<Vec<CategorySeverity>> {
            self.0
                .clone()
                .ok_or_else(|| ServiceError::InvalidResponse("down".into()))
        }
    }

    fn gate(provider: Fixed, policy: FailurePolicy) -> ComplianceGate {
        ComplianceGate::new(
            Some(Arc::new(provider)),
            ComplianceSection {
                enabled: true,
                severity_threshold: 2,
                failure_policy: policy,
            },
        )
    }

    fn severity(category: &str, severity: u8) -> CategorySeverity {
        CategorySeverity {
            category: category.into(),
            severity,
        }
    }

    #[tokio::test]
    async fn severity_at_threshold_blocks() {
        let decision = gate(
            Fixed(Some(vec![severity("hate", 0), severity("violence", 2)])),
            FailurePolicy::Closed,
        )
        .review("caption")
        .await;
        match decision {
            ComplianceDecision::Blocked { categories, .. } => {
                assert_eq!(categories, vec![severity("violence", 2)]);
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn low_severity_is_approved() {
        let decision = gate(Fixed(Some(vec![severity("hate", 1)])), FailurePolicy::Closed)
            .review("caption")
            .await;
        assert_eq!(decision, ComplianceDecision::Approved { max_severity: 1 });
        assert!(decision.allows_publication());
    }

    #[tokio::test]
    async fn provider_failure_follows_policy() {
        let closed = gate(Fixed(None), FailurePolicy::Closed).review("c").await;
        assert!(!closed.allows_publication());

        let open = gate(Fixed(None), FailurePolicy::Open).review("c").await;
        assert!(matches!(open, ComplianceDecision::Unverified { .. }));
        assert!(open.allows_publication());
    }

    #[tokio::test]
    async fn enabled_without_provider_is_a_failure_not_an_approval() {
        let gate = ComplianceGate::new(
            None,
            ComplianceSection {
                enabled: true,
                ..ComplianceSection::default()
            },
        );
        assert!(!gate.review("c").await.allows_publication());
        assert_eq!(
            ComplianceGate::disabled().review("c").await,
            ComplianceDecision::Skipped
        );
    }
}
