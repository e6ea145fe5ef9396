//! In-memory [`Directory`] with call counters, for resolver tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Directory, ResolveError, TeamIdentity};

#[derive(Default)]
pub struct FakeDirectory {
    /// org -> [(team id, team name)]
    teams: HashMap<String, Vec<(u64, String)>>,
    members: HashMap<u64, Vec<String>>,
    keys: HashMap<String, Vec<String>>,
    failing_users: HashSet<String>,
    latency: Option<Duration>,
    team_id_calls: AtomicUsize,
    member_calls: AtomicUsize,
    key_calls: AtomicUsize,
}

impl FakeDirectory {
    /// Two orgs, three teams, four users:
    ///
    /// - `MyOrg/Team 1` (id 1): github_user_1, github_user_2
    /// - `MyOrg/Team 2` (id 2): github_user_3
    /// - `MyOtherOrg/Team 3` (id 3): github_user_4
    pub fn my_org() -> Self {
        Self::default()
            .with_team("MyOrg", 1, "Team 1", &["github_user_1", "github_user_2"])
            .with_team("MyOrg", 2, "Team 2", &["github_user_3"])
            .with_team("MyOtherOrg", 3, "Team 3", &["github_user_4"])
            .with_user_keys("github_user_1", &["github_user_1_key_1", "github_user_1_key_2"])
            .with_user_keys("github_user_2", &["github_user_2_key_1"])
            .with_user_keys("github_user_3", &["github_user_3_key_1"])
            .with_user_keys("github_user_4", &["github_user_4_key_1"])
    }

    pub fn with_team(mut self, org: &str, id: u64, name: &str, members: &[&str]) -> Self {
        self.teams
            .entry(org.to_string())
            .or_default()
            .push((id, name.to_string()));
        self.members
            .insert(id, members.iter().map(|m| m.to_string()).collect());
        self
    }

    pub fn with_user_keys(mut self, login: &str, keys: &[&str]) -> Self {
        self.keys
            .insert(login.to_string(), keys.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn with_failing_user(mut self, login: &str) -> Self {
        self.failing_users.insert(login.to_string());
        self
    }

    /// Delay every call so concurrent lookups overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn team_id_calls(&self) -> usize {
        self.team_id_calls.load(Ordering::SeqCst)
    }

    pub fn member_calls(&self) -> usize {
        self.member_calls.load(Ordering::SeqCst)
    }

    pub fn key_calls(&self) -> usize {
        self.key_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait::async_trait]
impl Directory for FakeDirectory {
    async fn resolve_team_id(&self, team: &TeamIdentity) -> Result<u64, ResolveError> {
        self.team_id_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.teams
            .get(team.org())
            .and_then(|teams| teams.iter().find(|(_, name)| team.matches_name(name)))
            .map(|(id, _)| *id)
            .ok_or_else(|| ResolveError::NotFound(team.to_string()))
    }

    async fn list_team_members(&self, team_id: u64) -> Result<Vec<String>, ResolveError> {
        self.member_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.members
            .get(&team_id)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(format!("team id {team_id}")))
    }

    async fn list_user_keys(&self, login: &str) -> Result<Vec<String>, ResolveError> {
        self.key_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.failing_users.contains(login) {
            return Err(ResolveError::Remote(format!("{login}: 502 Bad Gateway")));
        }
        self.keys
            .get(login)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(login.to_string()))
    }
}
