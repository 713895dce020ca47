use clap::{Args, Parser};
use tracing::warn;

#[derive(Clone, Debug, Parser)]
#[command(name = "attest")]
pub struct Config {
    #[arg(long, env = "ATTEST_PORT", default_value_t = 7500)]
    pub port: u16,

    #[arg(long, env = "ATTEST_DB_URL", default_value = "sqlite://./attest.db")]
    pub db_url: String,

    #[arg(long, env = "ATTEST_TOKEN")]
    pub token: Option<String>,

    #[arg(long, env = "ATTEST_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "ATTEST_SEED", default_value_t = false)]
    pub seed: bool,

    #[arg(long, env = "ATTEST_SEED_ACTOR", default_value = "system")]
    pub seed_actor: String,

    #[command(flatten)]
    pub rate_limits: RateLimitConfig,
}

#[derive(Clone, Debug, Args)]
pub struct RateLimitConfig {
    #[arg(
        long = "rate-limit-read-per-min",
        env = "ATTEST_RATE_LIMIT_READ_PER_MIN",
        default_value_t = 240
    )]
    pub read_per_min: u32,

    #[arg(
        long = "rate-limit-read-burst",
        env = "ATTEST_RATE_LIMIT_READ_BURST",
        default_value_t = 60
    )]
    pub read_burst: u32,

    #[arg(
        long = "rate-limit-write-per-min",
        env = "ATTEST_RATE_LIMIT_WRITE_PER_MIN",
        default_value_t = 120
    )]
    pub write_per_min: u32,

    #[arg(
        long = "rate-limit-write-burst",
        env = "ATTEST_RATE_LIMIT_WRITE_BURST",
        default_value_t = 30
    )]
    pub write_burst: u32,

    #[arg(long = "max-request-body-bytes", env = "ATTEST_MAX_REQUEST_BODY_BYTES", default_value_t = 2 * 1024 * 1024)]
    pub max_request_body_bytes: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read_per_min: 240,
            read_burst: 60,
            write_per_min: 120,
            write_burst: 30,
            max_request_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let config = <Self as Parser>::parse();
        config.validate();
        config
    }

    pub fn auth_enabled(&self) -> bool {
        self.token
            .as_ref()
            .is_some_and(|value| !value.trim().is_empty())
    }

    pub fn log_startup_warnings(&self) {
        if !self.auth_enabled() {
            warn!("ATTEST_TOKEN is unset, auth is disabled and all requests are allowed");
            warn!(
                "no-auth mode enabled, rate limiting identity falls back to forwarded client IP headers"
            );
        }
    }

    fn validate(&self) {
        assert_non_zero_u32(
            "ATTEST_RATE_LIMIT_READ_PER_MIN",
            self.rate_limits.read_per_min,
        );
        assert_non_zero_u32("ATTEST_RATE_LIMIT_READ_BURST", self.rate_limits.read_burst);
        assert_non_zero_u32(
            "ATTEST_RATE_LIMIT_WRITE_PER_MIN",
            self.rate_limits.write_per_min,
        );
        assert_non_zero_u32(
            "ATTEST_RATE_LIMIT_WRITE_BURST",
            self.rate_limits.write_burst,
        );
        assert_non_zero_usize(
            "ATTEST_MAX_REQUEST_BODY_BYTES",
            self.rate_limits.max_request_body_bytes,
        );
    }
}

fn assert_non_zero_u32(key: &'static str, value: u32) {
    assert!(value > 0, "{key} must be greater than 0");
}

fn assert_non_zero_usize(key: &'static str, value: usize) {
    assert!(value > 0, "{key} must be greater than 0");
}
