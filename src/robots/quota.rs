//! Hourly download quotas
//!
//! Sites listed as `site#N` may serve at most N documents per wall-clock
//! hour. The counter resets at the hour boundary, not N seconds after the
//! first download. Exceeding quota defers a URL; it is never dropped.

use crate::robots::rules::{pattern_matches, QuotaSite};
use crate::robots::SiteRules;
use chrono::{DateTime, Utc};

/// Per-site quota accounting
#[derive(Debug)]
struct QuotaState {
    rule: QuotaSite,
    /// Downloads counted in the current window
    count: u32,
    /// Hour-of-epoch the current window belongs to
    window_hour: i64,
}

/// Tracks hourly quotas for all quota-bearing sites
pub struct QuotaTracker {
    states: Vec<QuotaState>,
}

impl QuotaTracker {
    /// Builds a tracker from compiled site rules
    pub fn from_rules(rules: &SiteRules) -> Self {
        let states = rules
            .quotas()
            .iter()
            .map(|rule| QuotaState {
                rule: rule.clone(),
                count: 0,
                window_hour: 0,
            })
            .collect();
        Self { states }
    }

    /// Returns true if a download of this URL would stay within quota
    ///
    /// URLs on sites without a quota rule are always within quota.
    pub fn within_quota(&mut self, url: &str, now: DateTime<Utc>) -> bool {
        let hour = hour_of_epoch(now);
        match self.state_for(url) {
            Some(state) => {
                if state.window_hour != hour {
                    // Wall-clock hour rolled over; reset the window
                    state.window_hour = hour;
                    state.count = 0;
                }
                state.count < state.rule.per_hour
            }
            None => true,
        }
    }

    /// Counts a completed download against the URL's site, if quota-bearing
    pub fn record_download(&mut self, url: &str, now: DateTime<Utc>) {
        let hour = hour_of_epoch(now);
        if let Some(state) = self.state_for(url) {
            if state.window_hour != hour {
                state.window_hour = hour;
                state.count = 0;
            }
            state.count += 1;
        }
    }

    fn state_for(&mut self, url: &str) -> Option<&mut QuotaState> {
        self.states
            .iter_mut()
            .find(|s| pattern_matches(&s.rule.site, url))
    }
}

/// Hours since the Unix epoch, truncated
fn hour_of_epoch(t: DateTime<Utc>) -> i64 {
    t.timestamp() / 3600
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteRulesConfig;
    use chrono::TimeZone;

    fn tracker(site: &str, per_hour: u32) -> QuotaTracker {
        let config = SiteRulesConfig {
            allowed: vec![],
            disallowed: vec![format!("{}#{}", site, per_hour)],
            allowed_doc_types: vec!["html".to_string()],
        };
        let rules = SiteRules::from_config(&config, "h");
        QuotaTracker::from_rules(&rules)
    }

    #[test]
    fn test_quota_consumed_then_exceeded() {
        let mut tracker = tracker("busy.example", 2);
        let t = Utc.with_ymd_and_hms(2026, 8, 25, 10, 15, 0).unwrap();

        assert!(tracker.within_quota("https://busy.example/a", t));
        tracker.record_download("https://busy.example/a", t);
        assert!(tracker.within_quota("https://busy.example/b", t));
        tracker.record_download("https://busy.example/b", t);

        // Request N+1 before the boundary is deferred
        assert!(!tracker.within_quota("https://busy.example/c", t));
    }

    #[test]
    fn test_quota_resets_at_hour_boundary_only() {
        let mut tracker = tracker("busy.example", 1);
        let t = Utc.with_ymd_and_hms(2026, 8, 25, 10, 15, 0).unwrap();
        tracker.record_download("https://busy.example/a", t);

        // Later in the same hour: still over quota
        let same_hour = Utc.with_ymd_and_hms(2026, 8, 25, 10, 59, 59).unwrap();
        assert!(!tracker.within_quota("https://busy.example/b", same_hour));

        // Next wall-clock hour: quota restored
        let next_hour = Utc.with_ymd_and_hms(2026, 8, 25, 11, 0, 1).unwrap();
        assert!(tracker.within_quota("https://busy.example/b", next_hour));
    }

    #[test]
    fn test_unquota_site_unlimited() {
        let mut tracker = tracker("busy.example", 1);
        let t = Utc.with_ymd_and_hms(2026, 8, 25, 10, 0, 0).unwrap();
        for _ in 0..10 {
            assert!(tracker.within_quota("https://free.example/x", t));
            tracker.record_download("https://free.example/x", t);
        }
    }

    #[test]
    fn test_quota_matches_subdomains() {
        let mut tracker = tracker("busy.example", 1);
        let t = Utc.with_ymd_and_hms(2026, 8, 25, 10, 0, 0).unwrap();
        tracker.record_download("https://www.busy.example/a", t);
        assert!(!tracker.within_quota("https://busy.example/b", t));
    }
}
