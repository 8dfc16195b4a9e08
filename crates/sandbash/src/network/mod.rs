//! Network layer for Sandbash
//!
//! Outbound HTTP is denied unless the URL matches the allowlist. The
//! interpreter never talks to sockets itself: requests go through an
//! [`HttpTransport`], real (`http_client` feature) or supplied by the host.

mod allowlist;
mod client;

pub use allowlist::{NetworkAllowlist, UrlMatch};
pub use client::{
    DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_TIMEOUT, HttpClient, HttpRequest, HttpResponse,
    HttpTransport, MAX_REDIRECTS, Method,
};

#[cfg(feature = "http_client")]
pub use client::ReqwestTransport;
