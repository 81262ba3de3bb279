// Timetravel Kernel
//
// Versioned record engine: delta computation, history replay, and the
// storage contract it runs on.

pub mod adapters;
pub mod config;
pub mod guard;
pub mod log;
pub mod replay;
pub mod state;
pub mod store;
