use std::sync::Arc;

use sqlx::AnyPool;

use crate::config::Config;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: AnyPool,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: Config, pool: AnyPool) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limits.clone());
        Self {
            config: Arc::new(config),
            pool,
            rate_limiter,
        }
    }
}
