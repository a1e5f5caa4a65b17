//! Reactive rate limiting for the data API
//!
//! Limiting stays off until the backend answers 429 for a route group. From
//! then on, requests in that group wait on a governor quota.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;

/// Route groups exposed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteGroup {
    /// /rest/v1/* row queries
    Rest,
    /// /auth/v1/* including the health probe
    Auth,
    Other,
}

impl RouteGroup {
    pub const ALL: [RouteGroup; 3] = [RouteGroup::Rest, RouteGroup::Auth, RouteGroup::Other];

    /// Classify a path relative to the API base URL.
    pub fn from_path(path: &str) -> Self {
        if path.starts_with("/rest/") {
            RouteGroup::Rest
        } else if path.starts_with("/auth/") {
            RouteGroup::Auth
        } else {
            RouteGroup::Other
        }
    }

    /// Requests per second once limiting is active.
    pub fn per_second(&self) -> u32 {
        match self {
            RouteGroup::Rest => 20,
            RouteGroup::Auth => 2,
            RouteGroup::Other => 6,
        }
    }
}

struct GroupLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    active: AtomicBool,
}

impl GroupLimiter {
    fn new(group: RouteGroup) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(group.per_second()).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::direct(quota),
            active: AtomicBool::new(false),
        }
    }
}

/// One reactive limiter per [`RouteGroup`].
pub struct RouteLimiters {
    limiters: HashMap<RouteGroup, GroupLimiter>,
}

impl Default for RouteLimiters {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteLimiters {
    pub fn new() -> Self {
        let limiters = RouteGroup::ALL
            .into_iter()
            .map(|group| (group, GroupLimiter::new(group)))
            .collect();
        Self { limiters }
    }

    /// Wait for a permit if the group has been throttled before.
    pub async fn wait_for(&self, group: RouteGroup) {
        if let Some(limiter) = self.limiters.get(&group)
            && limiter.active.load(Ordering::SeqCst)
        {
            debug!("Waiting for rate limiter {:?}", group);
            limiter.limiter.until_ready().await;
        }
    }

    /// Turn on limiting for a group. Called on a 429 response.
    pub fn activate(&self, group: RouteGroup) {
        if let Some(limiter) = self.limiters.get(&group)
            && !limiter.active.swap(true, Ordering::SeqCst)
        {
            debug!("Rate limiting activated for {:?}", group);
        }
    }

    pub fn is_active(&self, group: RouteGroup) -> bool {
        self.limiters
            .get(&group)
            .is_some_and(|l| l.active.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_groups() {
        assert_eq!(RouteGroup::from_path("/rest/v1/clients"), RouteGroup::Rest);
        assert_eq!(RouteGroup::from_path("/auth/v1/health"), RouteGroup::Auth);
        assert_eq!(RouteGroup::from_path("/storage/v1/x"), RouteGroup::Other);
    }

    #[test]
    fn test_activation_is_per_group() {
        let limiters = RouteLimiters::new();
        assert!(!limiters.is_active(RouteGroup::Rest));

        limiters.activate(RouteGroup::Rest);
        limiters.activate(RouteGroup::Rest);

        assert!(limiters.is_active(RouteGroup::Rest));
        assert!(!limiters.is_active(RouteGroup::Auth));
    }

    #[tokio::test]
    async fn test_inactive_group_does_not_wait() {
        let limiters = RouteLimiters::new();
        for _ in 0..100 {
            limiters.wait_for(RouteGroup::Auth).await;
        }
    }
}
