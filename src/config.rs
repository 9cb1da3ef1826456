use std::env;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use governor::Quota;
use crate::jobs::executor::DEFAULT_DEADLINE;
use crate::jobs::scheduler::DEFAULT_REFRESH_INTERVAL;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub admin_key: String,
    pub approved_ips: String,

    // Refresh pipeline
    pub fetch_enabled: bool,
    pub worker_concurrency: usize,
    pub refresh_interval_secs: u64,
    pub job_timeout_secs: u64,

    // Abuse protection
    pub rate_limit_enabled: bool,
    pub cloudflare_enabled: bool,
    pub cloudflare_email: String,
    pub cloudflare_auth: String,
    pub cloudflare_api_url: String,
    pub trust_cloudflare_proxy: bool,
    pub firewall_max_connections: usize,
    pub firewall_max_idle: usize,
    pub firewall_idle_timeout_secs: u64,

    // Admin routes
    pub admin_period_secs: u64,
    pub admin_burst_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            admin_key: String::new(),
            approved_ips: String::new(),
            fetch_enabled: true,
            worker_concurrency: 50,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
            job_timeout_secs: DEFAULT_DEADLINE.as_secs(),
            rate_limit_enabled: true,
            cloudflare_enabled: true,
            cloudflare_email: String::new(),
            cloudflare_auth: String::new(),
            cloudflare_api_url: "https://api.cloudflare.com/client/v4".to_string(),
            trust_cloudflare_proxy: false,
            firewall_max_connections: 200,
            firewall_max_idle: 100,
            firewall_idle_timeout_secs: 60,
            admin_period_secs: 5,
            admin_burst_limit: 10,
        }
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: var_or("BIND_ADDRESS", defaults.bind_address),
            port: var_or("PORT", defaults.port),
            admin_key: var_or("ADMIN_KEY", defaults.admin_key),
            approved_ips: var_or("APPROVED_IPS", defaults.approved_ips),

            fetch_enabled: var_or("FETCH_ENABLED", defaults.fetch_enabled),
            worker_concurrency: var_or("WORKER_CONCURRENCY", defaults.worker_concurrency),
            refresh_interval_secs: var_or("REFRESH_INTERVAL_SECS", defaults.refresh_interval_secs),
            job_timeout_secs: var_or("JOB_TIMEOUT_SECS", defaults.job_timeout_secs),

            rate_limit_enabled: var_or("RATE_LIMIT_ENABLED", defaults.rate_limit_enabled),
            cloudflare_enabled: var_or("CLOUDFLARE_ENABLED", defaults.cloudflare_enabled),
            cloudflare_email: var_or("CLOUDFLARE_EMAIL", defaults.cloudflare_email),
            cloudflare_auth: var_or("CLOUDFLARE_AUTH", defaults.cloudflare_auth),
            cloudflare_api_url: var_or("CLOUDFLARE_API_URL", defaults.cloudflare_api_url),
            trust_cloudflare_proxy: var_or("TRUST_CLOUDFLARE_PROXY", defaults.trust_cloudflare_proxy),
            firewall_max_connections: var_or("FIREWALL_MAX_CONNECTIONS", defaults.firewall_max_connections),
            firewall_max_idle: var_or("FIREWALL_MAX_IDLE", defaults.firewall_max_idle),
            firewall_idle_timeout_secs: var_or("FIREWALL_IDLE_TIMEOUT_SECS", defaults.firewall_idle_timeout_secs),

            admin_period_secs: var_or("ADMIN_PERIOD_SECS", defaults.admin_period_secs),
            admin_burst_limit: var_or("ADMIN_BURST_LIMIT", defaults.admin_burst_limit),
        }
    }

    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs.max(1))
    }

    pub fn admin_quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.admin_burst_limit).unwrap_or(NonZeroU32::MIN);
        Quota::with_period(Duration::from_secs(self.admin_period_secs.max(1)))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_and_falls_back() {
        env::set_var("WORKER_CONCURRENCY", "8");
        env::set_var("JOB_TIMEOUT_SECS", "not a number");
        env::set_var("FETCH_ENABLED", "false");
        let config = Config::from_env();
        env::remove_var("WORKER_CONCURRENCY");
        env::remove_var("JOB_TIMEOUT_SECS");
        env::remove_var("FETCH_ENABLED");

        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.job_timeout(), Duration::from_secs(5));
        assert!(!config.fetch_enabled);
        assert_eq!(config.refresh_interval(), Duration::from_secs(300));
    }

    #[test]
    fn zero_admin_burst_is_clamped() {
        let config = Config {
            admin_burst_limit: 0,
            ..Config::default()
        };
        assert_eq!(config.admin_quota().burst_size().get(), 1);
    }
}
