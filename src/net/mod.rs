//! Requests, responses and the network the worker fetches through.

mod client;
#[cfg(test)]
pub mod testing;
mod types;

pub use client::{is_forwardable_header, HttpNetwork, Network};
pub use types::{Headers, Request, Response};
