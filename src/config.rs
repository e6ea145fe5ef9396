use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// GitHub personal access token.  May be left empty when
    /// `github_token_env` names a variable holding it, or for anonymous access
    /// to public data.
    #[serde(default)]
    pub github_token: String,
    /// Name of an environment variable consulted when `github_token` is empty.
    #[serde(default)]
    pub github_token_env: Option<String>,
    /// Full URL to the API root (e.g. `https://ghe.corp.example.com/api/v3`).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Items requested per page.  GitHub caps this at 100.
    #[serde(default = "default_page_size")]
    pub page_size: u8,
    /// Semaphore limit for concurrent team and user lookups.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Timeout (seconds) applied to each API request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Minimum number of API calls to keep in reserve before self-throttling.
    #[serde(default = "default_rate_limit_buffer")]
    pub rate_limit_buffer: u32,
    /// Local accounts and the GitHub identities whose keys they accept.
    #[serde(default)]
    pub users: Vec<AccountSpec>,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_page_size() -> u8 {
    100
}

fn default_max_concurrent_requests() -> usize {
    16
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_rate_limit_buffer() -> u32 {
    10
}

impl Config {
    /// The token to authenticate with, if any.
    pub fn github_token(&self) -> Option<String> {
        if !self.github_token.is_empty() {
            return Some(self.github_token.clone());
        }
        self.github_token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|token| !token.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// One local account and the GitHub users and teams allowed into it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountSpec {
    /// Local account name.
    #[serde(rename = "username")]
    pub name: String,
    /// GitHub logins whose keys are accepted directly.
    #[serde(default)]
    pub github_users: Vec<String>,
    /// Teams, as `"<org>/<team name>"`, whose members' keys are accepted.
    #[serde(default)]
    pub github_teams: Vec<String>,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)
        .with_context(|| format!("invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    reqwest::Url::parse(&config.api_url)
        .with_context(|| format!("api_url is not a valid URL: {}", config.api_url))?;
    anyhow::ensure!(
        (1..=100).contains(&config.page_size),
        "page_size must be 1-100"
    );
    anyhow::ensure!(
        config.max_concurrent_requests >= 1,
        "max_concurrent_requests must be at least 1"
    );
    anyhow::ensure!(
        config.request_timeout_secs >= 1,
        "request_timeout_secs must be at least 1"
    );

    let mut seen = HashSet::new();
    for account in &config.users {
        anyhow::ensure!(!account.name.is_empty(), "username must not be empty");
        anyhow::ensure!(
            seen.insert(account.name.as_str()),
            "username '{}' is declared more than once",
            account.name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CONFIG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/config.test.yml");

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        file
    }

    #[test]
    fn loads_test_config() {
        let config = load_config(TEST_CONFIG).unwrap();
        assert_eq!(config.github_token, "my_github_token");
        assert_eq!(config.users.len(), 2);
        assert_eq!(config.users[0].name, "superadmin");
        assert_eq!(config.users[0].github_users, vec!["github_user_1"]);
        assert_eq!(config.users[0].github_teams.len(), 2);
        assert_eq!(config.users[0].github_teams[0], "MyOrg/Team 1");
    }

    #[test]
    fn defaults_apply() {
        let file = write_config("users:\n  - username: deploy\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.api_url, "https://api.github.com");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.max_concurrent_requests, 16);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.users[0].github_users.is_empty());
        assert!(config.users[0].github_teams.is_empty());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config("testdata/thisfileshouldnotexist.yml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let file = write_config("invalid config yml");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }

    #[test]
    fn duplicate_usernames_are_rejected() {
        let file = write_config("users:\n  - username: admin\n  - username: admin\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("declared more than once"));
    }

    #[test]
    fn out_of_range_page_size_is_rejected() {
        let file = write_config("page_size: 0\n");
        assert!(load_config(file.path()).is_err());
        let file = write_config("page_size: 101\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn invalid_api_url_is_rejected() {
        let file = write_config("api_url: not a url\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("api_url"));
    }

    #[test]
    fn token_falls_back_to_environment() {
        let var = "GHKEYS_TEST_TOKEN_FALLBACK";
        std::env::set_var(var, "from-env");
        let file = write_config(&format!("github_token_env: {var}\n"));
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.github_token().as_deref(), Some("from-env"));
        std::env::remove_var(var);
    }

    #[test]
    fn inline_token_wins_over_environment() {
        let file = write_config("github_token: inline\ngithub_token_env: GHKEYS_TEST_UNSET\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.github_token().as_deref(), Some("inline"));
    }

    #[test]
    fn no_token_means_anonymous() {
        let file = write_config("users: []\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.github_token(), None);
    }
}
