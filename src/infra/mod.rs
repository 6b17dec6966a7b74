//! Infrastructure helpers for the Sacco Gateway
//!
//! - Graceful shutdown (signal handling, shutdown-aware background tasks)

mod shutdown;

pub use shutdown::{shutdown_signal, spawn_until_shutdown, ShutdownCoordinator, ShutdownSignal};
