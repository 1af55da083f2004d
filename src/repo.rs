//! Source tree synchronizer.
//!
//! Converges a remote working tree onto a named repository and branch:
//! clone when absent, switch and fast-forward when present on the wrong
//! branch, and do nothing when already converged. A detached HEAD, a missing
//! remote, or a merge conflict is fatal; recovery is not attempted.

use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::errors::RocError;
use crate::session::{CommandResult, Session, Transport};
use crate::util::quote;

/// A repository to materialize on the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    /// Logical name; also the clone directory name under `parent_dir`.
    pub name: String,
    /// Branch to check out and fast-forward.
    pub revision: String,
    /// Remote parent directory for the working tree.
    pub parent_dir: String,
}

impl RepositoryDescriptor {
    pub fn new(
        name: impl Into<String>,
        revision: impl Into<String>,
        parent_dir: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            revision: revision.into(),
            parent_dir: parent_dir.into(),
        }
    }

    /// Remote path of the working tree.
    pub fn working_tree(&self) -> String {
        format!("{}/{}", self.parent_dir.trim_end_matches('/'), self.name)
    }
}

/// Ensure `parent_dir/name` is a working tree of the repository with
/// `revision` checked out. Returns the working tree path.
///
/// Calling this twice with identical arguments performs no network
/// operations on the second call.
pub async fn ensure_repository<T: Transport>(
    session: &mut Session<T>,
    sync: &SyncConfig,
    repo: &RepositoryDescriptor,
) -> Result<String, RocError> {
    let tree = repo.working_tree();

    let probe = format!("test -d {}", quote(&format!("{tree}/.git")));
    if !session.exec(&probe).await?.success() {
        let url = format!("{}{}.git", sync.url_prefix, repo.name);
        let command = format!(
            "git clone --branch {} {} {}",
            quote(&repo.revision),
            quote(&url),
            quote(&tree)
        );
        let result = session.exec(&command).await?;
        if !result.success() {
            return Err(sync_failed(repo, command, &result));
        }
        info!(
            repository = %repo.name,
            revision = %repo.revision,
            working_tree = %tree,
            "cloned working tree"
        );
        return Ok(tree);
    }

    let mut branch = current_branch(session, &tree).await?;
    if branch.is_none() {
        // Branch determination failed; reset to the default branch and
        // probe again before giving up.
        let command = format!(
            "git -C {} checkout {}",
            quote(&tree),
            quote(&sync.default_branch)
        );
        let result = session.exec(&command).await?;
        if !result.success() {
            return Err(sync_failed(repo, command, &result));
        }
        branch = current_branch(session, &tree).await?;
    }
    let Some(branch) = branch else {
        return Err(RocError::RepositorySync {
            repository: repo.name.clone(),
            command: format!("git -C {tree} rev-parse --abbrev-ref HEAD"),
            stderr: "could not determine the current branch".to_string(),
        });
    };
    if branch == "HEAD" {
        return Err(RocError::RepositorySync {
            repository: repo.name.clone(),
            command: format!("git -C {tree} rev-parse --abbrev-ref HEAD"),
            stderr: "working tree is in detached HEAD state".to_string(),
        });
    }

    if branch != repo.revision {
        let checkout = format!("git -C {} checkout {}", quote(&tree), quote(&repo.revision));
        let result = session.exec(&checkout).await?;
        if !result.success() {
            return Err(sync_failed(repo, checkout, &result));
        }
        // --ff-only so a divergent history fails instead of merging.
        let pull = format!(
            "git -C {} pull --ff-only origin {}",
            quote(&tree),
            quote(&repo.revision)
        );
        let result = session.exec(&pull).await?;
        if !result.success() {
            return Err(sync_failed(repo, pull, &result));
        }
        info!(
            repository = %repo.name,
            from = %branch,
            to = %repo.revision,
            "switched working tree branch"
        );
    } else {
        debug!(
            repository = %repo.name,
            revision = %repo.revision,
            "working tree already on requested branch"
        );
    }

    Ok(tree)
}

/// The currently checked-out branch, or `None` when the probe fails.
/// A detached HEAD answers `Some("HEAD")`.
async fn current_branch<T: Transport>(
    session: &mut Session<T>,
    tree: &str,
) -> Result<Option<String>, RocError> {
    let command = format!("git -C {} rev-parse --abbrev-ref HEAD", quote(tree));
    let result = session.exec(&command).await?;
    Ok(result
        .success()
        .then(|| result.stdout.trim().to_string()))
}

fn sync_failed(repo: &RepositoryDescriptor, command: String, result: &CommandResult) -> RocError {
    RocError::RepositorySync {
        repository: repo.name.clone(),
        command,
        stderr: result.stderr.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn descriptor() -> RepositoryDescriptor {
        RepositoryDescriptor::new("utils-repo", "main", "/scratch")
    }

    fn session(transport: MockTransport) -> Session<MockTransport> {
        Session::new(transport, "hpc.example.org", "svc")
    }

    #[test]
    fn test_working_tree_path_strips_trailing_slash() {
        let repo = RepositoryDescriptor::new("utils-repo", "main", "/scratch/");
        assert_eq!(repo.working_tree(), "/scratch/utils-repo");
    }

    #[tokio::test]
    async fn test_absent_tree_is_cloned_at_revision() {
        let transport = MockTransport::new()
            .respond("test -d", CommandResult::err(1, ""))
            .respond("git clone", CommandResult::ok(""));
        let log = transport.log_handle();
        let mut session = session(transport);

        let tree = ensure_repository(&mut session, &SyncConfig::default(), &descriptor())
            .await
            .expect("sync failed");

        assert_eq!(tree, "/scratch/utils-repo");
        let commands = log.lock().unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[1].command,
            "git clone --branch main 'https://github.com/climdyn-lab/utils-repo.git' /scratch/utils-repo"
        );
    }

    #[tokio::test]
    async fn test_clone_failure_is_fatal() {
        let transport = MockTransport::new()
            .respond("test -d", CommandResult::err(1, ""))
            .respond("git clone", CommandResult::err(128, "fatal: repository not found"));
        let mut session = session(transport);

        let err = ensure_repository(&mut session, &SyncConfig::default(), &descriptor())
            .await
            .expect_err("clone should fail");
        assert_eq!(err.kind(), "RepositorySyncError");
        assert!(err.to_string().contains("repository not found"));
    }

    #[tokio::test]
    async fn test_tree_on_requested_branch_does_nothing_further() {
        let transport = MockTransport::new()
            .respond("test -d", CommandResult::ok(""))
            .respond("rev-parse --abbrev-ref HEAD", CommandResult::ok("main"));
        let log = transport.log_handle();
        let mut session = session(transport);

        ensure_repository(&mut session, &SyncConfig::default(), &descriptor())
            .await
            .expect("sync failed");

        let commands = log.lock().unwrap();
        assert!(!commands.iter().any(|c| c.command.contains("git clone")));
        assert!(!commands.iter().any(|c| c.command.contains("git pull")
            || c.command.contains("pull --ff-only")));
    }

    #[tokio::test]
    async fn test_branch_switch_is_checkout_then_pull() {
        let transport = MockTransport::new()
            .respond("test -d", CommandResult::ok(""))
            .respond("rev-parse --abbrev-ref HEAD", CommandResult::ok("feature"));
        let log = transport.log_handle();
        let mut session = session(transport);

        ensure_repository(&mut session, &SyncConfig::default(), &descriptor())
            .await
            .expect("sync failed");

        let commands = log.lock().unwrap();
        let checkout = commands
            .iter()
            .position(|c| c.command == "git -C /scratch/utils-repo checkout main")
            .expect("checkout not issued");
        let pull = commands
            .iter()
            .position(|c| c.command == "git -C /scratch/utils-repo pull --ff-only origin main")
            .expect("pull not issued");
        assert!(checkout < pull);
    }

    #[tokio::test]
    async fn test_failed_branch_probe_falls_back_to_default_branch() {
        let transport = MockTransport::new()
            .respond("test -d", CommandResult::ok(""))
            .respond_seq(
                "rev-parse --abbrev-ref HEAD",
                vec![
                    CommandResult::err(128, "fatal: ambiguous argument"),
                    CommandResult::ok("main"),
                ],
            )
            .respond("checkout main", CommandResult::ok(""));
        let log = transport.log_handle();
        let mut session = session(transport);

        ensure_repository(&mut session, &SyncConfig::default(), &descriptor())
            .await
            .expect("fallback should recover");

        let commands = log.lock().unwrap();
        assert!(
            commands
                .iter()
                .any(|c| c.command == "git -C /scratch/utils-repo checkout main")
        );
    }

    #[tokio::test]
    async fn test_branch_probe_failing_twice_is_fatal() {
        let transport = MockTransport::new()
            .respond("test -d", CommandResult::ok(""))
            .respond(
                "rev-parse --abbrev-ref HEAD",
                CommandResult::err(128, "fatal: not a git repository"),
            )
            .respond("checkout main", CommandResult::ok(""));
        let mut session = session(transport);

        let err = ensure_repository(&mut session, &SyncConfig::default(), &descriptor())
            .await
            .expect_err("probe should fail twice");
        assert_eq!(err.kind(), "RepositorySyncError");
    }

    #[tokio::test]
    async fn test_detached_head_is_fatal() {
        let transport = MockTransport::new()
            .respond("test -d", CommandResult::ok(""))
            .respond("rev-parse --abbrev-ref HEAD", CommandResult::ok("HEAD"));
        let mut session = session(transport);

        let err = ensure_repository(&mut session, &SyncConfig::default(), &descriptor())
            .await
            .expect_err("detached HEAD should be fatal");
        assert_eq!(err.kind(), "RepositorySyncError");
        assert!(err.to_string().contains("detached HEAD"));
    }

    #[tokio::test]
    async fn test_non_fast_forward_pull_is_fatal() {
        let transport = MockTransport::new()
            .respond("test -d", CommandResult::ok(""))
            .respond("rev-parse --abbrev-ref HEAD", CommandResult::ok("feature"))
            .respond("checkout main", CommandResult::ok(""))
            .respond(
                "pull --ff-only",
                CommandResult::err(128, "fatal: Not possible to fast-forward, aborting."),
            );
        let mut session = session(transport);

        let err = ensure_repository(&mut session, &SyncConfig::default(), &descriptor())
            .await
            .expect_err("divergent pull should fail");
        assert_eq!(err.kind(), "RepositorySyncError");
    }
}
