//! Emitting resolved keys: printed to stdout, or written to each local
//! account's `~/.ssh/authorized_keys`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::resolve::accounts::AccountResult;

/// Where resolved keys go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Print,
    Write,
}

/// Newline-joined keys, without a trailing newline.
pub fn render_keys(keys: &[String]) -> String {
    keys.join("\n")
}

pub fn authorized_keys_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".ssh").join("authorized_keys")
}

/// Replace `<home_dir>/.ssh/authorized_keys` with `keys`, one per line and a
/// single trailing newline.  The `.ssh` directory must already exist.
pub async fn write_authorized_keys(keys: &[String], home_dir: &Path) -> Result<PathBuf> {
    let path = authorized_keys_path(home_dir);
    let mut contents = render_keys(keys);
    contents.push('\n');
    tokio::fs::write(&path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Home directory of local account `name`, or `None` if no such account.
pub fn lookup_home_dir(name: &str) -> Result<Option<PathBuf>> {
    let user = nix::unistd::User::from_name(name)
        .with_context(|| format!("failed to look up local user '{name}'"))?;
    Ok(user.map(|u| u.dir))
}

/// Hand every account's keys to the chosen destination.
pub async fn emit(results: &BTreeMap<String, AccountResult>, mode: OutputMode) -> Result<()> {
    match mode {
        OutputMode::Print => print_keys(results, &mut std::io::stdout().lock()),
        OutputMode::Write => write_all(results, lookup_home_dir).await,
    }
}

/// Write every account's keys, finding home directories with `lookup`.
/// Accounts whose home cannot be found are skipped; a failed write stops
/// the run.
async fn write_all<L>(results: &BTreeMap<String, AccountResult>, lookup: L) -> Result<()>
where
    L: Fn(&str) -> Result<Option<PathBuf>>,
{
    for result in results.values() {
        write_account(result, lookup(&result.account)).await?;
    }
    Ok(())
}

fn print_keys(results: &BTreeMap<String, AccountResult>, out: &mut impl Write) -> Result<()> {
    for result in results.values() {
        writeln!(out, "{}", render_keys(&result.keys)).context("failed to write keys to stdout")?;
    }
    out.flush().context("failed to flush stdout")?;
    Ok(())
}

async fn write_account(result: &AccountResult, home_dir: Result<Option<PathBuf>>) -> Result<()> {
    let home_dir = match home_dir {
        Ok(Some(home_dir)) => home_dir,
        Ok(None) => {
            warn!(account = %result.account, "local user not found, no keys written");
            return Ok(());
        }
        Err(e) => {
            warn!(
                account = %result.account,
                error = %format!("{e:#}"),
                "local user lookup failed, no keys written"
            );
            return Ok(());
        }
    };

    // A fully failed resolution would otherwise lock every holder out.
    if result.keys.is_empty() && result.is_partial() {
        warn!(
            account = %result.account,
            failed_items = result.failures.len(),
            "no keys resolved and some lookups failed; leaving authorized_keys unchanged"
        );
        return Ok(());
    }

    let path = write_authorized_keys(&result.keys, &home_dir).await?;
    info!(account = %result.account, path = %path.display(), keys = result.keys.len(), "authorized_keys written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const EXPECTED_AUTHORIZED_KEYS: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/authorized_keys");

    fn keys() -> Vec<String> {
        ["github_user_1_key_1", "github_user_1_key_2", "github_user_1_key_3"]
            .iter()
            .map(|k| k.to_string())
            .collect()
    }

    fn result(account: &str, keys: Vec<String>) -> AccountResult {
        AccountResult {
            account: account.to_string(),
            keys,
            failures: vec![],
        }
    }

    #[test]
    fn keys_are_newline_joined() {
        assert_eq!(
            render_keys(&keys()),
            "github_user_1_key_1\ngithub_user_1_key_2\ngithub_user_1_key_3"
        );
        assert_eq!(render_keys(&[]), "");
    }

    #[tokio::test]
    async fn missing_ssh_dir_is_an_error() {
        let home = tempfile::tempdir().unwrap();
        assert!(write_authorized_keys(&keys(), home.path()).await.is_err());
    }

    #[tokio::test]
    async fn existing_file_is_replaced() {
        let home = tempfile::tempdir().unwrap();
        let path = authorized_keys_path(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "junk").unwrap();

        let written = write_authorized_keys(&keys(), home.path()).await.unwrap();

        assert_eq!(written, path);
        assert_eq!(
            std::fs::read(&path).unwrap(),
            std::fs::read(EXPECTED_AUTHORIZED_KEYS).unwrap()
        );
    }

    #[tokio::test]
    async fn written_keys_read_back_as_the_same_set() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join(".ssh")).unwrap();
        let keys = vec![
            "ssh-ed25519 AAAAC3Nza user@host".to_string(),
            "ssh-rsa AAAAB3Nza".to_string(),
            "not a key at all".to_string(),
        ];

        let path = write_authorized_keys(&keys, home.path()).await.unwrap();
        let contents = std::fs::read_to_string(path).unwrap();

        assert!(contents.ends_with('\n'));
        assert!(!contents.ends_with("\n\n"));
        let read_back: HashSet<&str> = contents.lines().collect();
        let expected: HashSet<&str> = keys.iter().map(String::as_str).collect();
        assert_eq!(read_back, expected);
    }

    #[test]
    fn printed_output_has_one_block_per_account() {
        let mut results = BTreeMap::new();
        results.insert("admin".to_string(), result("admin", keys()[..1].to_vec()));
        results.insert("ops".to_string(), result("ops", keys()[1..].to_vec()));

        let mut out = Vec::new();
        print_keys(&results, &mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "github_user_1_key_1\ngithub_user_1_key_2\ngithub_user_1_key_3\n"
        );
    }

    #[test]
    fn unknown_local_user_has_no_home() {
        assert_eq!(lookup_home_dir("ghkeys-no-such-user-4242").unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_local_user_is_skipped() {
        let name = "ghkeys-no-such-user-4242";
        write_account(&result(name, keys()), lookup_home_dir(name))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_lookup_does_not_stop_later_accounts() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join(".ssh")).unwrap();
        let mut results = BTreeMap::new();
        results.insert("admin".to_string(), result("admin", keys()[..1].to_vec()));
        results.insert("deploy".to_string(), result("deploy", keys()));

        let home_dir = home.path().to_path_buf();
        write_all(&results, |account| match account {
            "admin" => Err(anyhow::anyhow!("passwd lookup failed")),
            _ => Ok(Some(home_dir.clone())),
        })
        .await
        .unwrap();

        assert_eq!(
            std::fs::read(authorized_keys_path(home.path())).unwrap(),
            std::fs::read(EXPECTED_AUTHORIZED_KEYS).unwrap()
        );
    }

    #[tokio::test]
    async fn failed_write_stops_the_run() {
        let home = tempfile::tempdir().unwrap();
        let mut results = BTreeMap::new();
        results.insert("admin".to_string(), result("admin", keys()));

        let home_dir = home.path().to_path_buf();
        assert!(write_all(&results, |_| Ok(Some(home_dir.clone()))).await.is_err());
    }
}
