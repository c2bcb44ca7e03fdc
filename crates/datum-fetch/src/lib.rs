//! # Datum Fetch
//!
//! Retrieves dataset bytes from the publisher's origin and confirms they
//! match the fingerprint recorded for a release.
//!
//! Origins are reached through the [`OriginSource`] trait. [`SchemeRouter`]
//! dispatches `http`/`https` to [`HttpOrigin`] and `file` to [`FileOrigin`];
//! [`MemoryOrigin`] serves canned bytes and scripted failures for tests.
//!
//! Failure reporting keeps two classes apart:
//!
//! - `FetchError`: the bytes could not be obtained (retried when transient)
//! - `IntegrityViolation`: the bytes were obtained and do not match (never retried)

#![forbid(unsafe_code)]

pub mod client;
pub mod origin;

pub use client::{FetchClient, FetchedDigest, VerifiedContent};
pub use origin::{ByteStream, FileOrigin, HttpOrigin, MemoryOrigin, OriginSource, ScriptedFailure, SchemeRouter};
