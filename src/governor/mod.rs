// src/governor/mod.rs

//! Resource governor: one token bucket and hard rate limit per group, plus
//! a global pair. A dispatch must clear all four.
//!
//! - [`bucket`] implements the token bucket.
//! - [`rate`] implements the sliding-window hard rate limit.

pub mod bucket;
pub mod rate;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::config::{BucketSection, GroupSection};
use crate::types::{GroupId, Timestamp};

pub use bucket::TokenBucket;
pub use rate::HardRateLimit;

/// Which gate refused a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    GroupTokens,
    GlobalTokens,
    GroupRate,
    GlobalRate,
}

impl fmt::Display for Blocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Blocked::GroupTokens => "group bucket empty",
            Blocked::GlobalTokens => "global bucket empty",
            Blocked::GroupRate => "group hard rate limit",
            Blocked::GlobalRate => "global hard rate limit",
        };
        f.write_str(s)
    }
}

/// Per-group accounting.
#[derive(Debug, Clone)]
pub struct GroupAccount {
    pub bucket: TokenBucket,
    pub limit: HardRateLimit,
    pub quota: f64,
    /// Non-terminal tasks of this group.
    pub live: usize,
    pub running: usize,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Sum of time spent in the ready queue by dispatched tasks.
    pub total_wait: Duration,
}

impl GroupAccount {
    fn new(settings: &GroupSection, rate_window: Duration) -> Self {
        Self {
            bucket: TokenBucket::new(
                settings.capacity,
                settings.refill_rate,
                settings.initial_tokens,
            ),
            limit: HardRateLimit::new(settings.hard_rate_limit, rate_window),
            quota: settings.quota,
            live: 0,
            running: 0,
            dispatched: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            total_wait: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceGovernor {
    global: TokenBucket,
    global_limit: HardRateLimit,
    groups: BTreeMap<GroupId, GroupAccount>,
    rate_window: Duration,
}

impl ResourceGovernor {
    pub fn new(global: &BucketSection, rate_window: Duration) -> Self {
        Self {
            global: TokenBucket::new(global.capacity, global.refill_rate, global.initial_tokens),
            global_limit: HardRateLimit::new(global.hard_rate_limit, rate_window),
            groups: BTreeMap::new(),
            rate_window,
        }
    }

    /// Create the group's account on first use.
    pub fn ensure_group(&mut self, id: &GroupId, settings: &GroupSection) -> &mut GroupAccount {
        let window = self.rate_window;
        self.groups
            .entry(id.clone())
            .or_insert_with(|| GroupAccount::new(settings, window))
    }

    pub fn group(&self, id: &GroupId) -> Option<&GroupAccount> {
        self.groups.get(id)
    }

    pub fn group_mut(&mut self, id: &GroupId) -> Option<&mut GroupAccount> {
        self.groups.get_mut(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&GroupId, &GroupAccount)> {
        self.groups.iter()
    }

    pub fn global(&self) -> &TokenBucket {
        &self.global
    }

    pub fn global_mut(&mut self) -> &mut TokenBucket {
        &mut self.global
    }

    /// Check every gate for a dispatch of `cost` from `group` at `now`.
    pub fn check(&mut self, group: &GroupId, cost: u32, now: Timestamp) -> Result<(), Blocked> {
        let Some(account) = self.groups.get_mut(group) else {
            return Err(Blocked::GroupTokens);
        };
        if !account.bucket.has(cost) {
            return Err(Blocked::GroupTokens);
        }
        if !self.global.has(cost) {
            return Err(Blocked::GlobalTokens);
        }
        if !account.limit.allows(now) {
            return Err(Blocked::GroupRate);
        }
        if !self.global_limit.allows(now) {
            return Err(Blocked::GlobalRate);
        }
        Ok(())
    }

    /// Charge a dispatch that already passed [`ResourceGovernor::check`].
    ///
    /// Both buckets are debited together; a failure here means the caller
    /// skipped the check.
    pub fn charge(&mut self, group: &GroupId, cost: u32, now: Timestamp, waited: Duration) {
        let account = self
            .groups
            .get_mut(group)
            .expect("charging a dispatch for an unknown group");
        assert!(
            account.bucket.has(cost) && self.global.has(cost),
            "charging a dispatch that did not clear the token check"
        );
        account.bucket.try_consume(cost);
        self.global.try_consume(cost);
        account.limit.record(now);
        self.global_limit.record(now);
        account.running += 1;
        account.dispatched += 1;
        account.total_wait += waited;
    }

    /// Advance every bucket by `elapsed`.
    pub fn refill(&mut self, elapsed: Duration) {
        if elapsed.is_zero() {
            return;
        }
        self.global.refill(elapsed);
        for account in self.groups.values_mut() {
            account.bucket.refill(elapsed);
        }
    }
}
