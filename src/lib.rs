//! Library crate for gatekeeper-sim: simulated scanner and traffic engines
//! plus the helpers the presentation layers share.
pub mod config;
pub mod format;
pub mod history;
pub mod random;
pub mod scanner;
pub mod server;
pub mod ticker;
pub mod traffic;
pub mod types;
