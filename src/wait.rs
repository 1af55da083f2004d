//! Completion waiter.
//!
//! Polls the scheduler queue for a set of job identifiers until every one is
//! absent. Absence is the sole completion signal; the waiter cannot tell a
//! finished job from a cancelled one — artifact inspection is the
//! composition's concern. The polling interval is fixed, with no backoff.

use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::WaitConfig;
use crate::dispatch::{JobId, JobSet};
use crate::errors::RocError;
use crate::session::{Session, Transport};

/// Block until every job in `jobs` has left the scheduler queue, then emit
/// `completion_message`.
///
/// The caller's set is never mutated; the waiter works on a private copy
/// that only shrinks. Cancellation is dropping the returned future, which
/// takes effect at the next poll boundary; jobs still queued at that point
/// are left to the scheduler.
pub async fn wait_for_jobs<T: Transport>(
    session: &mut Session<T>,
    config: &WaitConfig,
    jobs: &JobSet,
    completion_message: &str,
) -> Result<(), RocError> {
    let mut pending = jobs.clone();
    let interval = config.poll_interval();
    let mut cycles: u64 = 0;

    debug!(jobs = ?pending, "waiting for scheduler jobs");
    loop {
        for job_id in pending.clone() {
            if query_job_absent(session, job_id).await? {
                pending.remove(&job_id);
                debug!(job_id, remaining = pending.len(), "job left the queue");
            }
        }
        if pending.is_empty() {
            break;
        }
        cycles += 1;
        if let Some(max_cycles) = config.max_cycles
            && cycles >= max_cycles
        {
            return Err(RocError::CompletionTimeout {
                remaining: pending.iter().copied().collect(),
                cycles,
            });
        }
        sleep(interval).await;
    }

    info!("{completion_message}");
    Ok(())
}

/// Whether the scheduler reports `job_id` as absent from the queue.
///
/// Empty query output means absent. The scheduler forgets finished jobs, so
/// a query rejected as an unknown/invalid job id also means absent; any
/// other query failure is a [`RocError::JobWait`].
async fn query_job_absent<T: Transport>(
    session: &mut Session<T>,
    job_id: JobId,
) -> Result<bool, RocError> {
    let command = format!("squeue --noheader --jobs {job_id}");
    let result = session.exec(&command).await?;
    if result.success() {
        return Ok(result.stdout.trim().is_empty());
    }
    if result.stderr.to_ascii_lowercase().contains("invalid job id") {
        return Ok(true);
    }
    Err(RocError::JobWait {
        job_id,
        command,
        stderr: result.stderr,
    })
}
