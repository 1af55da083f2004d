//! Remote orchestration core for scientific-data processing jobs on HPC
//! hosts.
//!
//! Workflows ("compositions") drive remote batch processing through a small
//! set of building blocks, composed bottom-up:
//!
//! - [`session`] / [`ssh`]: an authenticated command channel to one host,
//!   opened with a private key and closed on every exit path.
//! - [`probes`]: mount assertions and remote directory management.
//! - [`repo`]: converge a remote working tree onto a repository and branch.
//! - [`provision`]: converge the package manager, a named environment, and
//!   scheduler tooling.
//! - [`dispatch`]: run a launcher program and collect the scheduler job ids
//!   it prints.
//! - [`wait`]: poll the scheduler until every job has left the queue.
//!
//! A composition owns exactly one [`Session`], issues commands strictly
//! sequentially, and shares no state with concurrently running
//! compositions. All failures are typed ([`RocError`]) and fatal to the
//! composition; retries belong to the ambient orchestrator.
//!
//! ```no_run
//! use roc::{
//!     CompositionParams, Launcher, OrchestratorConfig, RepositoryDescriptor,
//!     run_composition,
//! };
//! use roc::provision::EnvironmentDescriptor;
//! use std::path::Path;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = OrchestratorConfig::load(Path::new("roc.toml"))?;
//! let params = CompositionParams {
//!     models: Some("MPI-ESM ACCESS-CM2".into()),
//!     scenarios: Some("ssp370".into()),
//!     ..Default::default()
//! };
//!
//! let session = roc::open_session(&config.session).await?;
//! run_composition(session, async |session| {
//!     roc::require_mount(session, "/import/beegfs").await?;
//!     let tree = roc::ensure_repository(
//!         session,
//!         &config.sync,
//!         &RepositoryDescriptor::new("utils-repo", "main", "/scratch"),
//!     )
//!     .await?;
//!     roc::ensure_package_manager(session, &config.provision).await?;
//!     roc::ensure_environment(
//!         session,
//!         &config.provision,
//!         &EnvironmentDescriptor::new("env-A", format!("{tree}/env.yml")),
//!     )
//!     .await?;
//!     roc::ensure_scheduler(session, &config.provision).await?;
//!
//!     let launcher = Launcher::new(format!("{tree}/launch_regrid.py"), "env-A")
//!         .with_interpreter("python");
//!     let jobs =
//!         roc::dispatch(session, &config.provision, &launcher, &params.launcher_args())
//!             .await?;
//!     roc::wait_for_jobs(session, &config.wait, &jobs, "regrid jobs finished").await
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod probes;
pub mod provision;
pub mod repo;
pub mod session;
pub mod ssh;
pub mod testing;
mod util;
pub mod wait;

pub use config::{
    CompositionParams, OrchestratorConfig, ProvisionConfig, SessionConfig, SyncConfig, WaitConfig,
};
pub use dispatch::{
    JobExpectation, JobId, JobSet, Launcher, LauncherArgs, dispatch, parse_job_ids,
};
pub use errors::{RocError, TransportError};
pub use probes::{ensure_directories, ensure_directory, is_under, require_mount};
pub use provision::{
    EnvironmentDescriptor, ensure_environment, ensure_package_manager, ensure_scheduler,
};
pub use repo::{RepositoryDescriptor, ensure_repository};
pub use session::{CommandResult, ExecOptions, Session, Transport, run_composition};
pub use ssh::{SshTransport, open_session};
pub use wait::wait_for_jobs;
