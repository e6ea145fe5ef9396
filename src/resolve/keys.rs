//! Per-account key resolution.
//!
//! Resolution runs in two phases separated by a hard barrier:
//!
//! 1. every declared team is expanded into its members concurrently, and the
//!    members are merged into the declared users (first seen wins);
//! 2. every user of the finished set has its keys fetched concurrently, and
//!    the key lists are concatenated.
//!
//! Only user identities are deduplicated.  Two users that registered the
//! same key string both contribute it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::forge::{Directory, ResolveError, TeamIdentity};
use crate::metrics::MetricsRegistry;

use super::cache::ResolutionCache;
use super::{FailedItem, ItemFailure};

/// Keys resolved for one account, plus the teams and users that failed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub keys: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

/// Results of one concurrent phase.
#[derive(Default)]
struct FanIn {
    resolved: Vec<Arc<Vec<String>>>,
    failures: Vec<ItemFailure>,
}

/// Resolves accounts' declared users and teams to keys.
///
/// Cheap to clone; clones share the directory, the run's cache, and the
/// request limiter.
#[derive(Clone)]
pub struct KeyResolver {
    directory: Arc<dyn Directory>,
    cache: Arc<ResolutionCache>,
    /// Bounds remote resolutions in flight across every account of the run.
    permits: Arc<Semaphore>,
    metrics: MetricsRegistry,
}

impl KeyResolver {
    pub fn new(
        directory: Arc<dyn Directory>,
        cache: Arc<ResolutionCache>,
        max_concurrent_requests: usize,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            directory,
            cache,
            permits: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            metrics,
        }
    }

    #[instrument(skip_all, fields(declared_users = declared_users.len(), declared_teams = declared_teams.len()))]
    pub async fn resolve(&self, declared_users: &[String], declared_teams: &[String]) -> Resolution {
        let mut seen: HashSet<String> = HashSet::new();
        let mut users: Vec<String> = Vec::new();
        for user in declared_users {
            if seen.insert(user.clone()) {
                users.push(user.clone());
            }
        }

        // Phase 1: team expansion.
        let teams = unique(declared_teams);
        let expansion = self
            .fan_out(teams, FailedItem::Team, |resolver, team| async move {
                resolver.team_members(&team).await
            })
            .await;
        for members in &expansion.resolved {
            for member in members.iter() {
                if seen.insert(member.clone()) {
                    users.push(member.clone());
                }
            }
        }
        debug!(users = users.len(), "team expansion complete");

        // Phase 2: key fetch over the finished user set.
        let fetch = self
            .fan_out(users, FailedItem::User, |resolver, user| async move {
                resolver.user_keys(&user).await
            })
            .await;

        let keys: Vec<String> = fetch
            .resolved
            .iter()
            .flat_map(|keys| keys.iter().cloned())
            .collect();
        let mut failures = expansion.failures;
        failures.extend(fetch.failures);

        debug!(keys = keys.len(), failures = failures.len(), "key fetch complete");
        Resolution { keys, failures }
    }

    async fn team_members(&self, identity: &str) -> Result<Arc<Vec<String>>, ResolveError> {
        let team = TeamIdentity::parse(identity)?;
        self.cache
            .team_members(&team, async {
                let _permit = self.permit().await?;
                let team_id = self.directory.resolve_team_id(&team).await?;
                self.directory.list_team_members(team_id).await
            })
            .await
    }

    async fn user_keys(&self, login: &str) -> Result<Arc<Vec<String>>, ResolveError> {
        self.cache
            .user_keys(login, async {
                let _permit = self.permit().await?;
                self.directory.list_user_keys(login).await
            })
            .await
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, ResolveError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| ResolveError::TaskFailed("request limiter closed".to_string()))
    }

    /// Run `op` for every item on its own task and wait for all of them.
    /// A failed or panicked item becomes an [`ItemFailure`] labelled by
    /// `label`; the others are unaffected.
    async fn fan_out<F, Fut>(&self, items: Vec<String>, label: fn(String) -> FailedItem, op: F) -> FanIn
    where
        F: Fn(KeyResolver, String) -> Fut,
        Fut: Future<Output = Result<Arc<Vec<String>>, ResolveError>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(items.len());
        for item in items {
            let handle = tasks.spawn(op(self.clone(), item.clone()));
            pending.insert(handle.id(), item);
        }

        let mut fan_in = FanIn::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (item, error) = match joined {
                Ok((_, Ok(values))) => {
                    fan_in.resolved.push(values);
                    continue;
                }
                Ok((id, Err(error))) => (pending.remove(&id), error),
                Err(join_error) => (
                    pending.remove(&join_error.id()),
                    ResolveError::TaskFailed(join_error.to_string()),
                ),
            };

            let failure = ItemFailure {
                item: label(item.unwrap_or_default()),
                error,
            };
            warn!(item = %failure.item, error = %failure.error, "resolution failed; item contributes no keys");
            self.metrics.metrics.item_failed(failure.item.kind());
            fan_in.failures.push(failure);
        }
        fan_in
    }
}

/// `items` without repeats, in first-seen order.
fn unique(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}
