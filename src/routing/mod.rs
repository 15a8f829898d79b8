//! Cross-Node Routing Module
//!
//! Handles the two forwarding actions. A `ForwardToBRSAction` message goes
//! to the node holding the primary replica of the backup/restore service; a
//! `ForwardToBAPAction` message goes to the service process hosting the
//! primary replica of the partition in its target-partition header.
//!
//! ## Submodules
//! - **`types`**: node identities, replica info and the routing context.
//! - **`resolver`**: the resolution collaborator traits.
//! - **`topology`**: config-backed implementation of those traits.
//! - **`router`**: the forwarding logic.

pub mod resolver;
pub mod router;
pub mod topology;
pub mod types;
