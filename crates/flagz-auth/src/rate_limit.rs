//! Sliding-window rate limiter for *failed* login attempts, keyed by client
//! IP.
//!
//! A single mutex-guarded map, capped at 10,000 tracked IPs. Per §4.6, a new
//! IP arriving once the map is at capacity is simply not tracked — the
//! attempt is dropped from the map rather than evicting an existing entry
//! to make room. An already-tracked IP always records, even while the map
//! sits at capacity, so an attacker cannot use the cap to launder an
//! existing window back to empty.
//!
//! Testing and recording are deliberately separate calls: `is_allowed` only
//! reads the window (called before authentication is attempted), and
//! `record_failure` adds an attempt (called only once the login has actually
//! failed). §4.6 counts "failed attempts"; a successful login must never
//! itself count against the window.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MAX_TRACKED_IPS: usize = 10_000;

struct Window {
    attempts: Vec<Instant>,
}

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    state: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Reports whether `ip` is currently within the limit, without recording
    /// an attempt. Called before authentication is attempted: an untracked
    /// IP (never seen, or past the cap) is always allowed.
    pub fn is_allowed(&self, ip: IpAddr, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.get_mut(&ip) else {
            return true;
        };
        entry.attempts.retain(|t| now.saturating_duration_since(*t) < self.window);
        entry.attempts.len() < self.limit
    }

    /// Records a failed login attempt from `ip`. Always records for an
    /// already-tracked IP, even once it's past the limit, so a client that
    /// keeps hammering past the limit keeps seeing denials rather than
    /// resetting its own window by going quiet. A brand-new IP arriving once
    /// the map is at capacity is not tracked at all.
    pub fn record_failure(&self, ip: IpAddr, now: Instant) {
        let mut state = self.state.lock().unwrap();

        if !state.contains_key(&ip) {
            if state.len() >= MAX_TRACKED_IPS {
                return;
            }
            state.insert(ip, Window { attempts: Vec::new() });
        }

        let entry = state.get_mut(&ip).unwrap();
        entry.attempts.retain(|t| now.saturating_duration_since(*t) < self.window);
        entry.attempts.push(now);
    }

    /// Drops every tracked IP whose attempts have all aged out of the
    /// window. Called by the hourly sweep (§5); holds the lock only for
    /// this enumeration, not across any further IO.
    pub fn purge_expired(&self, now: Instant) {
        let mut state = self.state.lock().unwrap();
        state.retain(|_, window| {
            window.attempts.retain(|t| now.saturating_duration_since(*t) < self.window);
            !window.attempts.is_empty()
        });
    }

    /// Number of IPs currently tracked. Exposed for tests that verify the
    /// sweep actually purges state, not just that it runs without panicking.
    pub fn tracked_ip_count(&self) -> usize {
        self.state.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(n: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, n])
    }

    #[test]
    fn allows_up_to_the_limit_then_denies() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.is_allowed(ip(1), now));
            limiter.record_failure(ip(1), now);
        }
        assert!(!limiter.is_allowed(ip(1), now));
    }

    #[test]
    fn the_window_slides_and_old_attempts_age_out() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(limiter.is_allowed(ip(1), t0));
        limiter.record_failure(ip(1), t0);
        assert!(!limiter.is_allowed(ip(1), t0 + Duration::from_secs(5)));
        assert!(limiter.is_allowed(ip(1), t0 + Duration::from_secs(11)));
    }

    #[test]
    fn different_ips_have_independent_windows() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.is_allowed(ip(1), now));
        limiter.record_failure(ip(1), now);
        assert!(limiter.is_allowed(ip(2), now));
    }

    #[test]
    fn a_successful_login_never_gets_recorded() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.is_allowed(ip(1), now));
        assert!(limiter.is_allowed(ip(1), now));
        assert!(limiter.is_allowed(ip(1), now));
        assert_eq!(limiter.tracked_ip_count(), 0);
    }

    #[test]
    fn the_cap_keeps_the_map_bounded_and_drops_new_ips_past_it() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60));
        let now = Instant::now();
        for i in 0..(MAX_TRACKED_IPS + 50) {
            let octets = (i as u32).to_be_bytes();
            limiter.record_failure(IpAddr::from([octets[0], octets[1], octets[2], octets[3]]), now + Duration::from_nanos(i as u64));
        }
        assert_eq!(limiter.state.lock().unwrap().len(), MAX_TRACKED_IPS);
    }

    #[test]
    fn an_ip_past_the_cap_is_allowed_through_untracked() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        for i in 0..MAX_TRACKED_IPS {
            let octets = (i as u32).to_be_bytes();
            limiter.record_failure(IpAddr::from([octets[0], octets[1], octets[2], octets[3]]), now);
        }
        assert_eq!(limiter.state.lock().unwrap().len(), MAX_TRACKED_IPS);

        // One past the cap: not tracked, so every attempt from it is allowed.
        let overflow_ip = ip(255);
        assert!(limiter.is_allowed(overflow_ip, now));
        limiter.record_failure(overflow_ip, now);
        assert!(limiter.is_allowed(overflow_ip, now));
        assert!(!limiter.state.lock().unwrap().contains_key(&overflow_ip));
    }

    #[test]
    fn purge_expired_drops_ips_with_no_attempts_left_in_window() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let t0 = Instant::now();
        limiter.record_failure(ip(1), t0);
        limiter.record_failure(ip(2), t0);

        limiter.purge_expired(t0 + Duration::from_secs(61));
        assert!(limiter.state.lock().unwrap().is_empty());
    }

    #[test]
    fn purge_expired_keeps_ips_with_attempts_still_inside_the_window() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let t0 = Instant::now();
        limiter.record_failure(ip(1), t0);
        limiter.record_failure(ip(1), t0 + Duration::from_secs(50));

        limiter.purge_expired(t0 + Duration::from_secs(61));
        assert!(limiter.state.lock().unwrap().contains_key(&ip(1)));
    }
}
