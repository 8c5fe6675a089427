#![forbid(unsafe_code)]

//! Client-side synchronization core for the Cognisphere dashboard.
//!
//! A single engine task polls the remote simulation's read endpoints, merges
//! each settled result into one snapshot, and mediates control commands.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod model;
pub mod poller;
pub mod reducer;
pub mod registry;
pub mod time;

pub use config::*;
pub use connection::*;
pub use dispatcher::*;
pub use engine::*;
pub use error::*;
pub use http::*;
pub use lifecycle::*;
pub use model::*;
pub use poller::*;
pub use reducer::*;
pub use registry::*;
pub use time::*;
