//! # treegate-gateway
//!
//! The write-coordination gateway daemon for a content-addressed,
//! read-mostly distributed filesystem.
//!
//! Publishers acquire **leases** on repository subtrees, push signed
//! **payloads** against a live lease, and finally commit or drop the lease.
//! The gateway arbitrates subtree ownership (at most one writer per
//! subtree, where "same subtree" means component-wise path prefix overlap),
//! authenticates every mutating request with per-key HMAC, and verifies
//! payload content hashes before anything reaches the storage backend.
//!
//! # Architecture
//!
//! ```text
//! HTTP ──▶ authz middleware ──▶ handlers ──▶ LeaseManager ──▶ LeaseStore
//!          (HMAC-SHA1)                  └──▶ PayloadIngest ──▶ PayloadSink
//! ```
//!
//! - [`store`]: the transactional lease store behind one trait, with an
//!   embedded (`rusqlite`) and a replicated (`hiqlite`) backend.
//! - [`manager`]: the lease lifecycle — acquire / check / release / commit,
//!   overlap enforcement, lazy expiry reaping.
//! - [`ingest`]: binds a payload submission to a lease via its session
//!   token and verifies the declared content hash.
//! - [`http`]: the axum surface under `/api/v1` plus the authorization
//!   middleware that selects and verifies each route's signed material.
//! - [`access`]: the repository/key configuration answering secret lookups.
//! - [`config`], [`metrics`]: gateway configuration and Prometheus export.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod access;
pub mod config;
pub mod http;
pub mod ingest;
pub mod manager;
pub mod metrics;
pub mod store;

pub use config::GatewayConfig;
pub use manager::LeaseManager;
