// src/ratelimit.rs
use dashmap::DashMap;
use log::{debug, info, trace, warn};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use crate::ban::BanPropagator;

pub const RATE_LIMIT_THRESHOLD: u32 = 3;
pub const BAN_THRESHOLD: u32 = 200;
pub const DECAY_PER_TICK: u32 = RATE_LIMIT_THRESHOLD;
pub const DECAY_PERIOD: Duration = Duration::from_secs(1);

/// Client IPs that bypass limiting and banning entirely.
#[derive(Debug, Default, Clone)]
pub struct AllowList {
    ips: HashSet<IpAddr>,
}

impl AllowList {
    /// Parses a comma separated list, skipping entries that are not IPs.
    pub fn parse(raw: &str) -> Self {
        let mut ips = HashSet::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.parse::<IpAddr>() {
                Ok(ip) => {
                    ips.insert(ip);
                }
                Err(_) => warn!("Ignoring invalid approved IP: {}", item),
            }
        }
        Self { ips }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.ips.contains(ip)
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub limited: bool,
    pub count: u32,
}

/// Per-IP counter with linear decay. Counters above the threshold deny the
/// request and keep climbing; above the ban threshold they are handed to the
/// ban propagator.
pub struct RateLimiter {
    counters: DashMap<IpAddr, u32>,
    allow_list: Arc<AllowList>,
    bans: Option<Arc<BanPropagator>>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(allow_list: Arc<AllowList>, bans: Option<Arc<BanPropagator>>, enabled: bool) -> Self {
        Self {
            counters: DashMap::new(),
            allow_list,
            bans,
            enabled,
        }
    }

    fn exempt(&self, ip: &IpAddr) -> bool {
        !self.enabled || self.allow_list.contains(ip)
    }

    pub fn check(&self, ip: IpAddr) -> Verdict {
        if self.exempt(&ip) {
            return Verdict { limited: false, count: 0 };
        }

        // The shard guard covers the read and the increment for this IP.
        let count = match self.counters.get_mut(&ip) {
            Some(mut counter) => {
                let seen = *counter;
                if seen > RATE_LIMIT_THRESHOLD {
                    *counter = seen.saturating_add(1);
                }
                seen
            }
            None => return Verdict { limited: false, count: 0 },
        };

        if count <= RATE_LIMIT_THRESHOLD {
            return Verdict { limited: false, count };
        }

        debug!("Rate limiting {} at {}", ip, count);
        if count > BAN_THRESHOLD {
            if let Some(bans) = &self.bans {
                bans.maybe_ban(ip);
            }
        }
        Verdict { limited: true, count }
    }

    pub fn record_access(&self, ip: IpAddr) {
        if self.exempt(&ip) {
            return;
        }
        let mut counter = self.counters.entry(ip).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    /// One decay step: subtract from every counter, dropping those that hit
    /// zero.
    pub fn decay(&self) {
        self.counters.retain(|_, count| {
            *count = count.saturating_sub(DECAY_PER_TICK);
            *count > 0
        });
    }

    pub fn count(&self, ip: &IpAddr) -> u32 {
        self.counters.get(ip).map(|c| *c).unwrap_or(0)
    }

    pub fn tracked(&self) -> usize {
        self.counters.len()
    }

    pub fn spawn_decay(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        info!("Rate limit decay running every {:?}", DECAY_PERIOD);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + DECAY_PERIOD, DECAY_PERIOD);
            loop {
                ticker.tick().await;
                limiter.decay();
                trace!("{} clients rate limited after decay", limiter.tracked());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ban::tests::CountingFirewall;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn limiter(allow: &str) -> RateLimiter {
        RateLimiter::new(Arc::new(AllowList::parse(allow)), None, true)
    }

    #[test]
    fn allow_list_skips_garbage() {
        let list = AllowList::parse("10.0.0.1, nope ,::1,,");
        assert_eq!(list.len(), 2);
        assert!(list.contains(&ip("10.0.0.1")));
        assert!(list.contains(&ip("::1")));
    }

    #[test]
    fn fourth_access_in_a_window_is_limited() {
        let limiter = limiter("");
        let x = ip("203.0.113.7");

        assert_eq!(limiter.check(x), Verdict { limited: false, count: 0 });
        for _ in 0..3 {
            limiter.record_access(x);
            assert!(!limiter.check(x).limited);
        }
        assert_eq!(limiter.count(&x), 3);

        limiter.record_access(x);
        assert_eq!(limiter.check(x), Verdict { limited: true, count: 4 });
        // limited checks keep compounding
        assert_eq!(limiter.count(&x), 5);
    }

    #[test]
    fn decay_removes_record_within_threshold_ticks() {
        let limiter = limiter("");
        let x = ip("203.0.113.7");
        for _ in 0..4 {
            limiter.record_access(x);
        }
        assert!(limiter.check(x).limited);

        for _ in 0..RATE_LIMIT_THRESHOLD {
            limiter.decay();
        }
        assert_eq!(limiter.tracked(), 0);
        assert!(!limiter.check(x).limited);
    }

    #[test]
    fn decay_is_linear() {
        let limiter = limiter("");
        let x = ip("203.0.113.8");
        for _ in 0..10 {
            limiter.record_access(x);
        }
        limiter.decay();
        assert_eq!(limiter.count(&x), 7);
        limiter.decay();
        assert_eq!(limiter.count(&x), 4);
    }

    #[tokio::test]
    async fn allow_listed_ip_is_never_limited_or_banned() {
        let firewall = Arc::new(CountingFirewall::default());
        let allow = Arc::new(AllowList::parse("198.51.100.1"));
        let bans = Arc::new(BanPropagator::new(allow.clone(), firewall.clone(), true));
        let limiter = RateLimiter::new(allow, Some(bans.clone()), true);
        let x = ip("198.51.100.1");

        for _ in 0..500 {
            limiter.record_access(x);
            assert!(!limiter.check(x).limited);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(limiter.tracked(), 0);
        assert!(!bans.is_banned(&x));
        assert_eq!(firewall.calls(), 0);
    }

    #[tokio::test]
    async fn sustained_abuse_is_banned_once() {
        let firewall = Arc::new(CountingFirewall::default());
        let allow = Arc::new(AllowList::default());
        let bans = Arc::new(BanPropagator::new(allow.clone(), firewall.clone(), true));
        let limiter = RateLimiter::new(allow, Some(bans.clone()), true);
        let x = ip("203.0.113.9");

        for _ in 0..4 {
            limiter.record_access(x);
        }
        let mut last = limiter.check(x);
        while last.count <= BAN_THRESHOLD {
            assert!(last.limited);
            assert!(!bans.is_banned(&x));
            last = limiter.check(x);
        }
        assert!(bans.is_banned(&x));
        for _ in 0..10 {
            limiter.check(x);
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(firewall.calls(), 1);
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let limiter = RateLimiter::new(Arc::new(AllowList::default()), None, false);
        let x = ip("203.0.113.10");
        for _ in 0..10 {
            limiter.record_access(x);
        }
        assert!(!limiter.check(x).limited);
        assert_eq!(limiter.tracked(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let limiter = Arc::new(limiter(""));
        let x = ip("203.0.113.12");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    let mut limited = 0u32;
                    for _ in 0..250 {
                        limiter.record_access(x);
                        if limiter.check(x).limited {
                            limited += 1;
                        }
                        tokio::task::yield_now().await;
                    }
                    limited
                })
            })
            .collect();

        let mut limited = 0;
        for task in tasks {
            limited += task.await.unwrap();
        }

        // every record_access adds one, and so does every limited check
        assert_eq!(limiter.count(&x), 8 * 250 + limited);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn decay_racing_increments_never_keeps_zero_records() {
        let limiter = Arc::new(limiter(""));
        let ips: Vec<IpAddr> = (1..=16).map(|i| ip(&format!("203.0.113.{}", 100 + i))).collect();

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let limiter = Arc::clone(&limiter);
                let ips = ips.clone();
                tokio::spawn(async move {
                    for round in 0..200 {
                        let x = ips[(w * 7 + round) % ips.len()];
                        limiter.record_access(x);
                        limiter.check(x);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        let decayer = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                for _ in 0..200 {
                    limiter.decay();
                    assert!(limiter.counters.iter().all(|entry| *entry.value() > 0));
                    tokio::task::yield_now().await;
                }
            })
        };

        for writer in writers {
            writer.await.unwrap();
        }
        decayer.await.unwrap();
        assert!(limiter.counters.iter().all(|entry| *entry.value() > 0));

        let peak = limiter.counters.iter().map(|entry| *entry.value()).max().unwrap_or(0);
        for _ in 0..peak.div_ceil(DECAY_PER_TICK) {
            limiter.decay();
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn decay_ticker_runs_every_second() {
        let limiter = Arc::new(limiter(""));
        let x = ip("203.0.113.11");
        for _ in 0..5 {
            limiter.record_access(x);
        }

        let handle = limiter.spawn_decay();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(limiter.count(&x), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(limiter.tracked(), 0);
        handle.abort();
    }
}
