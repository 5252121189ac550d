//! Library crate for port-scan-rs: the scanning engine and its collaborators.
pub mod error;
pub mod export;
pub mod logging;
pub mod ports;
pub mod prober;
pub mod resolver;
pub mod scanner;
pub mod server;
pub mod services;
pub mod types;
