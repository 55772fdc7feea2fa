//! Send HTTP requests to the app a [`SelfRequest`] is registered on, without knowing
//! its port or protocol.
//!
//! The first request starts the app's server on an ephemeral loopback port if it is
//! not listening yet, resolves the base URL from the bound address, and builds one
//! client that every later request reuses.

#![forbid(unsafe_code)]

mod client;
pub mod decorator;
pub mod error;
pub mod join;
pub mod options;
pub mod response;
mod retry;

pub use decorator::{AppRequestExt, SelfRequest};
pub use error::SelfRequestError;
pub use options::{ClientDefaults, RegisterOptions, RequestOptions, RequestTarget, ResponseType};
pub use response::{ResponseBody, SelfResponse, Timings};
