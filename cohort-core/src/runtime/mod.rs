//! Background task management
//!
//! Periodic coordination loops and broadcast-based shutdown signaling.

pub mod shutdown;
pub mod task;

pub use shutdown::ShutdownSignal;
pub use task::PeriodicTask;
