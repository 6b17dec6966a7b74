//! HTTP API layer for the Sacco Gateway
//!
//! Management surface for API keys plus the guarded chama routes. The
//! guard chain itself is wired per route group in [`rest`].

mod error;
mod rest;

pub use error::ApiError;
pub use rest::*;
