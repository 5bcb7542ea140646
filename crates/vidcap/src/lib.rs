//! Native-messaging host that captures streaming URLs to local files.
//!
//! A browser extension talks to this process over stdin/stdout using
//! [`vidcap_frame`] frames. `DOWNLOAD` requests become jobs, each supervised on
//! its own thread while the dispatch loop keeps reading.
//!
//! # Crate Structure
//!
//! - [`frame`]: Re-exported wire codec
//! - [`protocol`]: Request routing and status event payloads
//! - [`sanitize`]: Safe, unique output filenames
//! - [`command`]: Capture tool argument vector
//! - [`job`]: Subprocess supervision and outcome reporting
//! - [`dispatch`]: The control loop

pub mod command;
pub mod config;
pub mod dispatch;
pub mod job;
pub mod protocol;
pub mod sanitize;
pub mod sink;

/// Re-export frame types.
pub mod frame {
    pub use vidcap_frame::*;
}

pub use config::HostConfig;
pub use dispatch::{Dispatcher, Shutdown};
