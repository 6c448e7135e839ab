use std::sync::Arc;

use ledger::Backends;

use super::{analytics::AnalyticsEngine, config::Config};

pub struct State {
    pub config: Config,
    pub backends: Backends,
    pub analytics: AnalyticsEngine,
}

impl State {
    pub fn new(config: Config, backends: Backends) -> Arc<Self> {
        let analytics = AnalyticsEngine::new(backends.index.clone());

        Arc::new(Self {
            config,
            backends,
            analytics,
        })
    }

    /// Connects to the configured Redis.
    pub async fn connect(config: Config) -> ledger::Result<Arc<Self>> {
        let backends = Backends::redis(
            &config.store.redis_url,
            &config.store.redis,
            std::time::Duration::ZERO,
        )
        .await?;

        Ok(Self::new(config, backends))
    }
}
