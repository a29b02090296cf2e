//! # treegate-core
//!
//! Domain logic for treegate, the write-coordination gateway of a
//! content-addressed, read-mostly distributed filesystem.
//!
//! Many publishers push updates into the same repository tree, but the
//! underlying storage requires that at any moment only one writer owns any
//! given subtree. This crate holds the pure pieces of that arbitration:
//!
//! - **Lease paths** ([`path`]): canonical repository subpaths and the
//!   component-wise prefix-overlap predicate that decides write conflicts.
//! - **Leases** ([`lease`]): the time-bounded exclusive write grant and its
//!   derived expiry rules.
//! - **Session tokens** ([`token`]): opaque, MAC-authenticated handles that
//!   bind follow-up requests to a lease.
//! - **Request signatures** ([`signature`]): HMAC verification of mutating
//!   HTTP requests, with constant-time comparison.
//! - **Errors** ([`error`]): the closed, transport-independent error
//!   taxonomy shared by the whole gateway.
//!
//! Everything that touches a socket, a database, or the filesystem lives in
//! `treegate-gateway`; this crate is deliberately I/O-free so the conflict
//! rules can be tested exhaustively.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod error;
pub mod lease;
pub mod path;
pub mod signature;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::GatewayError;
pub use lease::{Lease, LeaseContext, LeaseSecret, PublicId};
pub use path::LeasePath;
