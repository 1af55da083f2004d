//! Filesystem and mount probes.
//!
//! Explicit probes with typed failures; nothing here prints or treats
//! "does X exist?" as exception control flow.

use std::path::Path;
use tracing::debug;

use crate::errors::RocError;
use crate::session::{Session, Transport};
use crate::util::quote;

/// Fail unless `prefix` appears in the remote mount table.
///
/// Checked before any I/O that depends on the mount. A mount point equal to
/// the prefix or nested under it satisfies the assertion.
pub async fn require_mount<T: Transport>(
    session: &mut Session<T>,
    prefix: &str,
) -> Result<(), RocError> {
    let command = "mount";
    let result = session.exec(command).await?;
    if !result.success() {
        return Err(RocError::CommandFailed {
            command: command.to_string(),
            exit_status: result.exit_status,
            stderr: result.stderr,
        });
    }
    let satisfied = mount_points(&result.stdout)
        .any(|point| point == prefix || Path::new(point).starts_with(prefix));
    if satisfied {
        debug!(prefix, "mount present");
        Ok(())
    } else {
        Err(RocError::MountMissing {
            prefix: prefix.to_string(),
            host: session.host().to_string(),
        })
    }
}

/// Mount points out of `mount(8)` listing lines
/// (`<source> on <mount point> type <fs> (<options>)`).
fn mount_points(listing: &str) -> impl Iterator<Item = &str> {
    listing.lines().filter_map(|line| {
        let rest = line.split_once(" on ")?.1;
        let point = match rest.split_once(" type ") {
            Some((point, _)) => point,
            None => rest,
        };
        Some(point.trim_end())
    })
}

/// Create `path` if absent. A pre-existing directory is not an error;
/// a failure to create is fatal.
pub async fn ensure_directory<T: Transport>(
    session: &mut Session<T>,
    path: &str,
) -> Result<(), RocError> {
    let command = format!("mkdir -p {}", quote(path));
    let result = session.exec(&command).await?;
    if !result.success() {
        return Err(RocError::CommandFailed {
            command,
            exit_status: result.exit_status,
            stderr: result.stderr,
        });
    }
    Ok(())
}

/// [`ensure_directory`] applied sequentially; stops at the first failure.
pub async fn ensure_directories<T: Transport>(
    session: &mut Session<T>,
    paths: &[&str],
) -> Result<(), RocError> {
    for path in paths {
        ensure_directory(session, path).await?;
    }
    Ok(())
}

/// Whether `inner_path` is a descendant of `outer_path` as observed by the
/// remote filesystem (symlinks resolved remotely).
pub async fn is_under<T: Transport>(
    session: &mut Session<T>,
    inner_path: &str,
    outer_path: &str,
) -> Result<bool, RocError> {
    let inner = resolve_remote_path(session, inner_path).await?;
    let outer = resolve_remote_path(session, outer_path).await?;
    Ok(inner != outer && Path::new(&inner).starts_with(&outer))
}

async fn resolve_remote_path<T: Transport>(
    session: &mut Session<T>,
    path: &str,
) -> Result<String, RocError> {
    let command = format!("realpath -m {}", quote(path));
    let result = session.exec(&command).await?;
    if !result.success() {
        return Err(RocError::CommandFailed {
            command,
            exit_status: result.exit_status,
            stderr: result.stderr,
        });
    }
    Ok(result.stdout.trim().to_string())
}
