//! Shared service graph handed to every request handler

use std::sync::Arc;
use tracing::info;
use tubebox_common::TrackRef;

use crate::cache::AudioCache;
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::inflight::{InflightGuard, SlotRegistry};
use crate::playback::{PlaybackService, PlaybackSettings};
use crate::resolver::{
    DataApiStrategy, ExtractorStrategy, QuotaBreaker, ResolverChain, ResolverStrategy,
};
use crate::sse::SseBroadcaster;
use crate::store::JsonStore;

/// Buffered events per SSE client before it is considered lagging
const SSE_CAPACITY: usize = 100;

/// Application state shared by all handlers
///
/// Cloning is cheap: every service sits behind an `Arc`.
#[derive(Clone)]
pub struct SharedState {
    pub resolver: Arc<ResolverChain>,
    pub cache: Arc<AudioCache>,
    pub history: Arc<HistoryStore>,
    pub player: Arc<PlaybackService>,
    pub broadcaster: SseBroadcaster,
    pub inflight: InflightGuard,
    pub slots: SlotRegistry,
}

impl SharedState {
    /// Wire the services with the production strategy chain
    pub async fn build(config: &ServiceConfig) -> Result<Self> {
        Self::with_strategies(config, default_strategies(config)?).await
    }

    /// Wire the services around an explicit strategy list
    pub async fn with_strategies(
        config: &ServiceConfig,
        strategies: Vec<Arc<dyn ResolverStrategy>>,
    ) -> Result<Self> {
        let breaker = QuotaBreaker::new(config.quota_cooldown());
        let resolver = Arc::new(
            ResolverChain::new(strategies, breaker)
                .with_limits(config.resolver.search_limit, config.resolver.related_limit),
        );
        info!("Resolver strategies: {:?}", resolver.strategy_names());

        let cache = Arc::new(AudioCache::new(config.cache_dir(), Arc::clone(&resolver)));
        cache.sweep_partials().await?;

        let broadcaster = SseBroadcaster::new(SSE_CAPACITY);
        let history = Arc::new(
            HistoryStore::open(config.history_path())
                .await
                .with_observer(broadcaster.clone()),
        );
        let inflight = InflightGuard::new();

        let player = PlaybackService::restore(
            JsonStore::<Vec<TrackRef>>::new(config.queue_path()),
            Arc::clone(&history),
            Arc::clone(&cache),
            Arc::clone(&resolver),
            broadcaster.clone(),
            inflight.clone(),
            PlaybackSettings::from(&config.playback),
        )
        .await;
        cache.retain_only(&player.retained_tracks().await).await?;

        Ok(Self {
            resolver,
            cache,
            history,
            player,
            broadcaster,
            inflight,
            slots: SlotRegistry::new(),
        })
    }
}

/// Official API first (when a key is configured), extraction tool second
pub fn default_strategies(config: &ServiceConfig) -> Result<Vec<Arc<dyn ResolverStrategy>>> {
    let api = DataApiStrategy::new(
        config.resolver.api_base_url.clone(),
        config.api_key.clone(),
        config.resolver.api_attempts,
        config.api_timeout(),
    )
    .map_err(|e| Error::Config(e.to_string()))?;

    let extractor = ExtractorStrategy::new(
        config.extractor.binary.clone(),
        config.extractor_timeout(),
        config.extractor_stall_timeout(),
    );

    Ok(vec![Arc::new(api), Arc::new(extractor)])
}
