//! Remote directory abstraction.
//!
//! Provides the [`Directory`] trait that encapsulates every read the key
//! resolver needs from the hosting service: team lookup by name, team
//! membership, and user public keys.  The resolver dispatches through this
//! trait so that no GitHub-specific URL construction or response parsing leaks
//! outside this module.

pub mod github;
pub mod pagination;
pub mod rate_limit;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure to resolve a single team or user.
///
/// Cloneable so that one failed in-flight lookup can be handed to every task
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid team identity '{0}': expected '<org>/<team name>'")]
    InvalidIdentityForm(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("resolution task failed: {0}")]
    TaskFailed(String),
}

// ---------------------------------------------------------------------------
// Team identity
// ---------------------------------------------------------------------------

/// A team named as `"<org>/<team name>"`.
///
/// The org segment is matched exactly, the team name case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TeamIdentity {
    org: String,
    name: String,
}

impl TeamIdentity {
    /// Split `identity` on its first `/` into a non-empty org and team name.
    pub fn parse(identity: &str) -> Result<Self, ResolveError> {
        match identity.split_once('/') {
            Some((org, name)) if !org.is_empty() && !name.is_empty() => Ok(Self {
                org: org.to_string(),
                name: name.to_string(),
            }),
            _ => Err(ResolveError::InvalidIdentityForm(identity.to_string())),
        }
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a team name reported by the remote refers to this team.
    /// Case is ignored, including for non-ASCII names.
    pub fn matches_name(&self, remote_name: &str) -> bool {
        remote_name.eq_ignore_ascii_case(&self.name)
            || remote_name.to_lowercase() == self.name.to_lowercase()
    }

    /// Key under which this team's membership is memoized.  Spellings that
    /// differ only in team-name case share one entry.
    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.org, self.name.to_lowercase())
    }
}

impl fmt::Display for TeamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Read-only view of the hosting service's teams and users.
///
/// Every method returns only after all pages have been fetched; callers never
/// see a partial result.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    /// Find the numeric id of `team` within its org.
    async fn resolve_team_id(&self, team: &TeamIdentity) -> Result<u64, ResolveError>;

    /// List the logins of every member of the team with id `team_id`.
    async fn list_team_members(&self, team_id: u64) -> Result<Vec<String>, ResolveError>;

    /// List every public key registered for `login`.
    async fn list_user_keys(&self, login: &str) -> Result<Vec<String>, ResolveError>;
}
