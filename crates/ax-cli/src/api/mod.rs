//! Control-plane API client

mod client;

pub use client::{ApiClient, ExecTransport, Transport};
