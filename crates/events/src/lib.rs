//! In-process event fan-out for session runtimes.

pub mod bus;

pub use bus::{SessionEvent, SessionEventBus};
