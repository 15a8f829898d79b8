//! Transport Module
//!
//! Message envelope plus the two channels it travels over: the inter-node
//! transport between agents and the intra-process transport to service
//! processes hosted on the same node. Both are JSON over HTTP.
//!
//! ## Submodules
//! - **`message`**: envelope, action names, headers, time budget.
//! - **`protocol`**: endpoint paths and status DTO.
//! - **`client`**: outbound transports with connect retries.
//! - **`handlers`**: inbound dispatch (axum).

pub mod client;
pub mod handlers;
pub mod message;
pub mod protocol;
