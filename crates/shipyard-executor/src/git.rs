//! Repository checkout into a clean workspace.

use shipyard_core::executor::{CommandRunner, CommandSpec, LineSink, LogLine};
use shipyard_core::{Error, Result};
use std::path::Path;
use tracing::{info, warn};
use url::Url;

const REDACTED: &str = "[REDACTED]";

/// Quote a value for inclusion in an `sh -c` line.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Secret embedded in the clone URL, if any.
fn url_secret(url: &Url) -> Option<&str> {
    url.password()
        .or_else(|| Some(url.username()).filter(|u| !u.is_empty() && url.scheme() == "https"))
}

/// The clone URL with any embedded credential replaced.
pub fn redact_url(url: &Url) -> String {
    let mut shown = url.clone();
    if shown.password().is_some() {
        let _ = shown.set_password(Some(REDACTED));
    } else if url_secret(url).is_some() {
        let _ = shown.set_username(REDACTED);
    }
    shown.to_string()
}

/// Shallow single-branch clone command for `url` into `dest`.
pub fn clone_command(url: &Url, branch: &str, dest: &Path) -> String {
    format!(
        "git clone --depth 1 --single-branch --branch {} {} {}",
        shell_quote(branch),
        shell_quote(url.as_str()),
        shell_quote(&dest.to_string_lossy()),
    )
}

/// Fetch `branch` of `url` into `dest`, replacing whatever was there.
///
/// Output lines are passed through with any credential in the URL redacted.
pub async fn checkout(
    runner: &dyn CommandRunner,
    url: &Url,
    branch: &str,
    dest: &Path,
    on_line: LineSink<'_>,
) -> Result<()> {
    if tokio::fs::try_exists(dest).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dest)
            .await
            .map_err(|e| Error::Checkout(format!("failed to clean {}: {}", dest.display(), e)))?;
    }
    let parent = dest
        .parent()
        .ok_or_else(|| Error::Checkout(format!("{} has no parent directory", dest.display())))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| Error::Checkout(format!("failed to create {}: {}", parent.display(), e)))?;

    info!(url = %redact_url(url), branch = %branch, dest = %dest.display(), "Cloning repository");

    let secret = url_secret(url).map(str::to_string);
    let redact = |text: &str| match &secret {
        Some(s) => text.replace(s.as_str(), REDACTED),
        None => text.to_string(),
    };
    let forward = |line: LogLine| {
        on_line(LogLine {
            content: redact(&line.content),
            ..line
        })
    };

    let mut env = std::collections::BTreeMap::new();
    env.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());
    let spec = CommandSpec::new(clone_command(url, branch, dest), parent).with_env(env);
    let status = runner.run(&spec, &forward).await.map_err(|e| match e {
        Error::Build(msg) | Error::Internal(msg) => Error::Checkout(redact(&msg)),
        other => other,
    })?;

    if !status.success() {
        // Don't log the raw URL, it may carry a token
        warn!(code = ?status.code, "Git clone failed");
        return Err(Error::Checkout(format!(
            "git clone of {} (branch {}) exited with {:?}",
            redact_url(url),
            branch,
            status.code
        )));
    }

    info!(dest = %dest.display(), "Repository cloned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shipyard_core::executor::{ExitStatus, LogStream};
    use std::sync::Mutex;

    /// Pretends to clone by writing a file into the destination.
    struct FakeGit {
        exit: i32,
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for FakeGit {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn run(&self, spec: &CommandSpec, on_line: LineSink<'_>) -> Result<ExitStatus> {
            self.commands.lock().unwrap().push(spec.command.clone());
            on_line(LogLine::new(
                LogStream::Stderr,
                "fatal: could not read from https://s3cret@example.com",
            ));
            Ok(ExitStatus {
                code: Some(self.exit),
            })
        }
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("main"), "'main'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_redact_url_hides_token() {
        let url = Url::parse("https://s3cret@github.com/acme/app.git").unwrap();
        let shown = redact_url(&url);
        assert!(!shown.contains("s3cret"));
        assert!(shown.contains("github.com/acme/app.git"));

        let url = Url::parse("https://user:pw@github.com/acme/app.git").unwrap();
        assert!(!redact_url(&url).contains("pw@"));

        let url = Url::parse("https://github.com/acme/app.git").unwrap();
        assert_eq!(redact_url(&url), "https://github.com/acme/app.git");
    }

    #[test]
    fn test_clone_command_is_shallow_single_branch() {
        let url = Url::parse("https://github.com/acme/app.git").unwrap();
        let cmd = clone_command(&url, "develop", Path::new("/work/app"));
        assert_eq!(
            cmd,
            "git clone --depth 1 --single-branch --branch 'develop' \
             'https://github.com/acme/app.git' '/work/app'"
        );
    }

    #[tokio::test]
    async fn test_checkout_cleans_existing_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("app");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("stale.txt"), "old").unwrap();

        let runner = FakeGit {
            exit: 0,
            commands: Mutex::new(Vec::new()),
        };
        let url = Url::parse("https://github.com/acme/app.git").unwrap();
        checkout(&runner, &url, "main", &dest, &|_: LogLine| {})
            .await
            .unwrap();

        assert!(!dest.join("stale.txt").exists());
        assert_eq!(runner.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_checkout_redacts_token() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeGit {
            exit: 128,
            commands: Mutex::new(Vec::new()),
        };
        let lines = Mutex::new(Vec::new());
        let sink = |line: LogLine| lines.lock().unwrap().push(line.content);

        let url = Url::parse("https://s3cret@example.com/acme/app.git").unwrap();
        let err = checkout(&runner, &url, "main", &dir.path().join("app"), &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Checkout(ref m) if !m.contains("s3cret")));
        let lines = lines.into_inner().unwrap();
        assert!(lines.iter().all(|l| !l.contains("s3cret")));
    }
}
