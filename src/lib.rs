//! wiretap
//!
//! Async HTTP client with a typed request pipeline and a built-in stub
//! interception engine. Requests are described once, executed through a
//! validator-driven pipeline (retries, alternate requests, redirects,
//! per-attempt metrics), and can be transparently diverted to programmable
//! in-process stub responders.
#![deny(unsafe_code)]

pub mod body;
pub mod client;
pub mod cookies;
pub mod defaults;
pub mod error;
pub mod headers;
pub mod metrics;
pub mod observer;
pub mod request;
pub mod response;
pub mod security;
pub mod stub;
pub mod transport;
pub mod utils;
pub mod validator;

pub use body::{Body, FormValue};
pub use client::{CachePolicy, Client, ClientBuilder, FollowMode};
pub use error::Error;
pub use headers::HeaderSet;
pub use request::Request;
pub use response::Response;
pub use stub::{StubEngine, StubResponse, UnhandledMode};
pub use utils::cancel::CancelHandle;
