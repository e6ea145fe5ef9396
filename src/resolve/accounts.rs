//! Fan-out of key resolution across configured accounts.

use std::collections::BTreeMap;

use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::config::AccountSpec;

use super::keys::KeyResolver;
use super::ItemFailure;

/// Keys resolved for one local account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountResult {
    pub account: String,
    pub keys: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl AccountResult {
    /// Whether any declared team or user could not be resolved.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Resolve every account, or only the one named by `filter`, concurrently.
///
/// All accounts share `resolver`'s cache, so a team or user declared by
/// several accounts is fetched once.  An account whose resolution task
/// panics is logged and left out of the result.
#[instrument(skip_all, fields(accounts = accounts.len(), filter = ?filter))]
pub async fn resolve_all(
    resolver: &KeyResolver,
    accounts: &[AccountSpec],
    filter: Option<&str>,
) -> BTreeMap<String, AccountResult> {
    let filter = filter.filter(|name| !name.is_empty());

    let mut tasks = JoinSet::new();
    for account in accounts
        .iter()
        .filter(|account| filter.map_or(true, |name| account.name == name))
    {
        let resolver = resolver.clone();
        let account = account.clone();
        tasks.spawn(async move {
            let resolution = resolver
                .resolve(&account.github_users, &account.github_teams)
                .await;
            AccountResult {
                account: account.name,
                keys: resolution.keys,
                failures: resolution.failures,
            }
        });
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => {
                results.insert(result.account.clone(), result);
            }
            Err(e) => error!(error = %e, "account resolution task failed"),
        }
    }

    if let Some(name) = filter {
        if results.is_empty() {
            warn!(account = name, "no configured account matches the requested name");
        }
    }
    results
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Operator-facing totals for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub accounts: usize,
    pub keys: usize,
    /// `(account, failure)` for every item that failed, in account order.
    pub failures: Vec<(String, ItemFailure)>,
}

impl RunSummary {
    pub fn from_results(results: &BTreeMap<String, AccountResult>) -> Self {
        let mut summary = Self {
            accounts: results.len(),
            ..Self::default()
        };
        for result in results.values() {
            summary.keys += result.keys.len();
            summary
                .failures
                .extend(result.failures.iter().map(|f| (result.account.clone(), f.clone())));
        }
        summary
    }

    pub fn log(&self) {
        for (account, failure) in &self.failures {
            warn!(%account, item = %failure.item, error = %failure.error, "unresolved item");
        }
        info!(
            accounts = self.accounts,
            keys = self.keys,
            failed_items = self.failures.len(),
            "resolution run complete"
        );
    }
}
