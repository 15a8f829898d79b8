//! Node-Local Backup Agent Library
//!
//! This library crate defines the subsystems of the backup agent. It serves
//! as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`copier`**: runs the external backup copier executable. Builds its
//!   command line, spawns it in a private temp directory, waits for it under
//!   a deadline and maps its exit into a typed error. A throttled job queue
//!   bounds how many copiers run at once.
//! - **`backup`**: the upload and download actions. A download fans out to
//!   one copier per backup location and reports one aggregated outcome.
//! - **`routing`**: forwards messages that must be handled elsewhere, either
//!   to the primary of the backup/restore service on another node or to the
//!   service process hosting a partition on this node.
//! - **`transport`**: message envelope, HTTP transports and inbound handlers.
//! - **`config`**: TOML configuration with live reload.
//! - **`error`**: the agent error taxonomy.
//! - **`logging`**: tracing subscriber setup.

pub mod backup;
pub mod config;
pub mod copier;
pub mod error;
pub mod logging;
pub mod routing;
pub mod transport;
