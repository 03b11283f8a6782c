// Strategy chain with fallback logic

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::models::{ExtractedMedia, StrategyKind};
use super::platforms::PlatformProfile;
use super::traits::{ExtractionContext, ExtractionStrategy};

/// Outcome of walking the chain: the media plus any earlier failures
#[derive(Debug)]
pub struct ChainOutcome {
    pub media: ExtractedMedia,
    pub attempts: Vec<String>,
}

pub struct StrategyChain {
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
}

impl StrategyChain {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn add_strategy(&mut self, strategy: Arc<dyn ExtractionStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try each strategy in order; first success wins.
    ///
    /// On exhaustion the error carries one `"<name>: <reason>"` entry per
    /// strategy, in attempt order.
    pub async fn extract(&self, ctx: &ExtractionContext) -> Result<ChainOutcome, DownloadError> {
        let mut reasons = Vec::new();

        for strategy in &self.strategies {
            if ctx.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            info!(strategy = strategy.name(), "trying strategy");

            match strategy.attempt(ctx).await {
                Ok(media) => {
                    info!(strategy = strategy.name(), media_url = %media.media_url, "strategy succeeded");
                    return Ok(ChainOutcome {
                        media,
                        attempts: reasons,
                    });
                }
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(e) => {
                    warn!(strategy = strategy.name(), "strategy failed: {}", e);
                    reasons.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        if reasons.is_empty() {
            reasons.push("no strategies configured".to_string());
        }
        Err(DownloadError::ExtractionFailed { reasons })
    }
}

impl Default for StrategyChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Available strategy implementations, keyed by kind
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<StrategyKind, Arc<dyn ExtractionStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the implementation for its kind
    pub fn register(&mut self, strategy: Arc<dyn ExtractionStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: StrategyKind) -> Option<Arc<dyn ExtractionStrategy>> {
        self.strategies.get(&kind).cloned()
    }

    /// Chain in the profile's declared order; kinds with no implementation are skipped
    pub fn chain_for(&self, profile: &PlatformProfile) -> StrategyChain {
        let mut chain = StrategyChain::new();
        for kind in profile.strategies {
            match self.get(*kind) {
                Some(strategy) => chain.add_strategy(strategy),
                None => debug!(strategy = kind.as_str(), "no implementation registered"),
            }
        }
        chain
    }
}
