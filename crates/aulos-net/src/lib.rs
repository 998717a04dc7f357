#![forbid(unsafe_code)]

//! HTTP request abstraction for the aulos streaming engine.
//!
//! The rest of the engine never talks to a transport directly: everything
//! goes through the [`Net`] trait, which models a single request function
//! returning either a typed response or a typed [`NetError`]. A
//! reqwest-backed [`HttpClient`] is provided as the default implementation,
//! and [`NetExt`] adds timeout and retry decorators on top of any `Net`.

mod client;
mod error;
mod retry;
mod timeout;
mod traits;
mod types;

pub use client::HttpClient;
pub use error::{NetError, NetResult};
pub use retry::RetryNet;
pub use timeout::TimeoutNet;
pub use traits::{ChunkStream, Net, NetExt};
pub use types::{Headers, HttpResponse, NetOptions, RangeSpec, RetryPolicy};
