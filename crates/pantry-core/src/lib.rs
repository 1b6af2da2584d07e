//! Core abstractions for Pantry: the key-value store contract, the shared-secret
//! credential, and the request/response shapes exchanged over HTTP.
//! No I/O lives here; concrete backends are in `pantry-storage`.

pub mod auth;
pub mod store;
pub mod wire;
