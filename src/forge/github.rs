//! GitHub / GitHub Enterprise directory implementation.
//!
//! Reads teams, team members, and user keys from the REST API, following
//! `Link` pagination to exhaustion for every listing.

use std::ops::ControlFlow;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, LINK};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::metrics::{Endpoint, MetricsRegistry};

use super::pagination::{self, Page};
use super::rate_limit::RateLimitState;
use super::{Directory, ResolveError, TeamIdentity};

const ACCEPT_GITHUB_V3: &str = "application/vnd.github.v3+json";

// ---------------------------------------------------------------------------
// Response records
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TeamRecord {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MemberRecord {
    login: String,
}

#[derive(Debug, Deserialize)]
struct KeyRecord {
    key: String,
}

/// Core REST quota as reported by `GET /rate_limit`.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitStatus,
}

// ---------------------------------------------------------------------------
// Directory struct
// ---------------------------------------------------------------------------

pub struct GitHubDirectory {
    http_client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    page_size: u8,
    rate_limit: RateLimitState,
    rate_limit_buffer: u32,
    /// Longest wait for a rate-limit reset before a request fails instead.
    max_rate_limit_wait: Duration,
    metrics: MetricsRegistry,
}

impl GitHubDirectory {
    pub fn new(config: &Config, metrics: MetricsRegistry) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("ghkeys/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http_client,
            api_url: config.api_url.clone(),
            token: config.github_token(),
            page_size: config.page_size,
            rate_limit: RateLimitState::new(),
            rate_limit_buffer: config.rate_limit_buffer,
            max_rate_limit_wait: Duration::from_secs(config.request_timeout_secs),
            metrics,
        })
    }

    /// Fetch the current core API quota.
    pub async fn rate_limit(&self) -> Result<RateLimitStatus> {
        let url = self.endpoint_url(&["rate_limit"], false)?;
        self.metrics.metrics.api_call(Endpoint::RateLimit);

        let resp = self
            .request(&url)
            .send()
            .await
            .context("rate limit request failed")?
            .error_for_status()
            .context("rate limit request returned non-success")?;

        let body: RateLimitResponse = resp
            .json()
            .await
            .context("failed to parse rate limit response")?;
        Ok(body.resources.core)
    }

    /// Build an absolute endpoint URL under `api_url`, percent-encoding each
    /// path segment.
    fn endpoint_url(&self, segments: &[&str], paginated: bool) -> Result<String, ResolveError> {
        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| ResolveError::Remote(format!("invalid api_url {}: {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|_| ResolveError::Remote(format!("api_url {} cannot be a base", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        if paginated {
            url.query_pairs_mut()
                .append_pair("per_page", &self.page_size.to_string());
        }
        Ok(url.into())
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http_client.get(url).header(ACCEPT, ACCEPT_GITHUB_V3);
        match &self.token {
            Some(token) => req.header(AUTHORIZATION, format!("token {token}")),
            None => req,
        }
    }

    /// Only follow `Link` targets on the `api_url` origin; every request
    /// carries the token.
    fn check_next_link(&self, next: String) -> Result<String, ResolveError> {
        let api = reqwest::Url::parse(&self.api_url)
            .map_err(|e| ResolveError::Remote(format!("invalid api_url {}: {e}", self.api_url)))?;
        let target = reqwest::Url::parse(&next)
            .map_err(|e| ResolveError::Remote(format!("invalid next page link {next}: {e}")))?;
        if target.origin() != api.origin() {
            warn!(%next, api_url = %self.api_url, "refusing next page link to another origin");
            return Err(ResolveError::Remote(format!(
                "next page link {next} is outside {}",
                self.api_url
            )));
        }
        Ok(next)
    }

    /// Fetch one page of a listing.
    async fn get_page<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        url: String,
    ) -> Result<Page<T>, ResolveError> {
        self.rate_limit
            .wait_if_needed(self.rate_limit_buffer, self.max_rate_limit_wait)
            .await?;
        self.metrics.metrics.api_call(endpoint);

        let resp = self
            .request(&url)
            .send()
            .await
            .map_err(|e| ResolveError::Remote(format!("request to {url} failed: {e}")))?;

        self.rate_limit.update_from_headers(resp.headers());
        if let Some(remaining) = self.rate_limit.remaining() {
            self.metrics
                .metrics
                .upstream_api_rate_limit_remaining
                .set(i64::try_from(remaining).unwrap_or(i64::MAX));
        }

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%url, "upstream API returned 404");
            return Err(ResolveError::NotFound(url));
        }
        if !status.is_success() {
            warn!(%url, %status, "upstream API returned non-success status");
            return Err(ResolveError::Remote(format!("{url} returned {status}")));
        }

        let next = resp
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(pagination::parse_next_link)
            .map(|next| self.check_next_link(next))
            .transpose()?;

        let items: Vec<T> = resp
            .json()
            .await
            .map_err(|e| ResolveError::Remote(format!("failed to parse response from {url}: {e}")))?;

        Ok(Page { items, next })
    }
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl Directory for GitHubDirectory {
    #[instrument(skip(self, team), fields(team = %team))]
    async fn resolve_team_id(&self, team: &TeamIdentity) -> Result<u64, ResolveError> {
        let first = self.endpoint_url(&["orgs", team.org(), "teams"], true)?;

        let found = pagination::walk_pages(
            first,
            |url| self.get_page::<TeamRecord>(Endpoint::OrgTeams, url),
            |teams: Vec<TeamRecord>| match teams.into_iter().find(|t| team.matches_name(&t.name)) {
                Some(t) => ControlFlow::Break(t.id),
                None => ControlFlow::Continue(()),
            },
        )
        .await?;

        match found {
            Some(id) => {
                debug!(team_id = id, "resolved team id");
                Ok(id)
            }
            None => Err(ResolveError::NotFound(format!(
                "team '{}' in org '{}'",
                team.name(),
                team.org()
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn list_team_members(&self, team_id: u64) -> Result<Vec<String>, ResolveError> {
        let first = self.endpoint_url(&["teams", &team_id.to_string(), "members"], true)?;
        let members = pagination::fetch_all_pages(first, |url| {
            self.get_page::<MemberRecord>(Endpoint::TeamMembers, url)
        })
        .await?;

        debug!(count = members.len(), "listed team members");
        Ok(members.into_iter().map(|m| m.login).collect())
    }

    #[instrument(skip(self))]
    async fn list_user_keys(&self, login: &str) -> Result<Vec<String>, ResolveError> {
        let first = self.endpoint_url(&["users", login, "keys"], true)?;
        let keys = pagination::fetch_all_pages(first, |url| {
            self.get_page::<KeyRecord>(Endpoint::UserKeys, url)
        })
        .await?;

        debug!(count = keys.len(), "listed user keys");
        Ok(keys.into_iter().map(|k| k.key).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
