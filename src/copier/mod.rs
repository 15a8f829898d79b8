//! Backup Copier Execution Module
//!
//! Runs the external backup copier executable that performs the actual
//! byte-level transfer to and from a backup store.
//!
//! ## Flow
//! 1. **Describe**: a [`job::JobDescriptor`] names the store, the paths and
//!    the direction of one transfer.
//! 2. **Throttle**: the [`queue::JobQueue`] bounds how many copiers run at
//!    once; the bound follows the live configuration.
//! 3. **Execute**: [`process::run_copier`] builds the command line, spawns
//!    the process in a private temp working directory and waits for it,
//!    bounded by the adjusted timeout.
//! 4. **Map**: the exit code and the copier's error-details file become a
//!    typed [`crate::error::AgentError`].
//!
//! ## Submodules
//! - **`job`**: job descriptor and the store-kind sum type.
//! - **`args`**: `/name:"value"` command-line construction and redaction.
//! - **`registry`**: table of live copier processes (abort / disable).
//! - **`process`**: the execution state machine.
//! - **`queue`**: the throttled job queue.
//! - **`orchestrator`**: single-job entry point used by the backup module.

pub mod args;
pub mod job;
pub mod orchestrator;
pub mod process;
pub mod queue;
pub mod registry;
