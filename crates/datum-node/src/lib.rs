//! # Datum Node
//!
//! The deployable registry: an axum HTTP surface over the registry index,
//! the federation endpoints peers talk to, a reqwest-based
//! [`HttpPeerTransport`] for talking to them, and [`DatumNode`] which
//! assembles all of it from a [`DatumConfig`](datum_core::DatumConfig).

#![forbid(unsafe_code)]

pub mod api;
pub mod error;
pub mod node;
pub mod peer;

pub use api::{router, AppState};
pub use error::{status_for, ApiError, ErrorBody};
pub use node::{load_or_create_registry_id, DatumNode};
pub use peer::HttpPeerTransport;
