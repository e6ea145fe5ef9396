//! Run-scoped memoization of team memberships and user keys.
//!
//! The first lookup of a team or user runs the supplied resolution; lookups
//! that arrive while it is in flight wait for it and share its result instead
//! of issuing their own remote calls.  Successful results are kept for the
//! rest of the run.  Failures are handed to every waiter but not stored, so a
//! later lookup of the same key tries the remote again.

use std::future::Future;
use std::sync::Arc;

use moka::future::Cache;
use tracing::trace;

use crate::forge::{ResolveError, TeamIdentity};
use crate::metrics::{ItemKind, MetricsRegistry};

type Shared = Arc<Vec<String>>;

pub struct ResolutionCache {
    team_members: Cache<String, Shared>,
    user_keys: Cache<String, Shared>,
    metrics: MetricsRegistry,
}

impl ResolutionCache {
    /// Create an empty cache for one run.  Entries never expire or get
    /// evicted; the run is short and bounded by its configuration.
    pub fn new(metrics: MetricsRegistry) -> Self {
        Self {
            team_members: Cache::builder().build(),
            user_keys: Cache::builder().build(),
            metrics,
        }
    }

    /// Members of `team`, running `resolve` only if no earlier or in-flight
    /// lookup of the same team exists.
    pub async fn team_members<F>(&self, team: &TeamIdentity, resolve: F) -> Result<Shared, ResolveError>
    where
        F: Future<Output = Result<Vec<String>, ResolveError>>,
    {
        self.memoize(ItemKind::Team, &self.team_members, team.cache_key(), resolve)
            .await
    }

    /// Keys of `login`, running `resolve` only if no earlier or in-flight
    /// lookup of the same user exists.
    pub async fn user_keys<F>(&self, login: &str, resolve: F) -> Result<Shared, ResolveError>
    where
        F: Future<Output = Result<Vec<String>, ResolveError>>,
    {
        self.memoize(ItemKind::User, &self.user_keys, login.to_string(), resolve)
            .await
    }

    async fn memoize<F>(
        &self,
        kind: ItemKind,
        cache: &Cache<String, Shared>,
        key: String,
        resolve: F,
    ) -> Result<Shared, ResolveError>
    where
        F: Future<Output = Result<Vec<String>, ResolveError>>,
    {
        let entry = cache
            .entry(key)
            .or_try_insert_with(async { resolve.await.map(Arc::new) })
            .await
            .map_err(|e| (*e).clone())?;

        let hit = !entry.is_fresh();
        self.metrics.metrics.cache_lookup(kind, hit);
        trace!(?kind, key = %entry.key(), hit, "resolution cache lookup");
        Ok(entry.into_value())
    }
}
