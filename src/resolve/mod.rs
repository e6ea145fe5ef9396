//! Concurrent key resolution.
//!
//! [`keys::KeyResolver`] expands one account's teams into users and fetches
//! every user's keys through the run-wide [`cache::ResolutionCache`];
//! [`accounts::resolve_all`] fans that out across every configured account.
//! A team or user that fails to resolve contributes nothing and is reported
//! as an [`ItemFailure`]; it never aborts the rest of the run.

pub mod accounts;
pub mod cache;
pub mod keys;

use std::fmt;

use crate::forge::ResolveError;
use crate::metrics::ItemKind;

/// The team or user a failure belongs to, as written in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedItem {
    Team(String),
    User(String),
}

impl FailedItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Team(_) => ItemKind::Team,
            Self::User(_) => ItemKind::User,
        }
    }
}

impl fmt::Display for FailedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Team(team) => write!(f, "team '{team}'"),
            Self::User(user) => write!(f, "user '{user}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item: FailedItem,
    pub error: ResolveError,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.error)
    }
}
