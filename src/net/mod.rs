//! Network layer: everything between "here is a URL" and "here is its body".
//!
//! # Submodules
//!
//! - [`rate_limiter`]: per-source sliding-window call accounting
//! - [`proxy`]: round-robin proxy selection
//! - [`cache`]: run-scoped, single-flight response cache
//! - [`transport`]: the HTTP client seam and its `reqwest` implementation
//! - [`engine`]: retry/backoff composition of all of the above
//!
//! Every piece of cross-request state (window logs, proxy cursor, cache,
//! failed URLs) is owned by a [`FetchEngine`] instance, so two runs never
//! share anything.

pub mod cache;
pub mod engine;
pub mod proxy;
pub mod rate_limiter;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CachedPage, ResponseCache};
pub use engine::{FailedUrls, FetchEngine, RetryPolicy};
pub use proxy::ProxyRotator;
pub use rate_limiter::RateLimiter;
pub use transport::{RawResponse, ReqwestTransport, Transport};
