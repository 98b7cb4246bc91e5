// Core types live in callcore; the runtime pieces live here.
pub use callcore::{events, signaling, state, types};

pub mod calls;
pub mod config;
pub mod loopback;
pub mod test_utils;

pub use calls::{CallDependencies, CallError, CallManager};
pub use config::CallManagerConfig;
