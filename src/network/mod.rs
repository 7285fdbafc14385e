//! Network side of the fetch policy: request/response model and the
//! transport used when the cache cannot answer.

mod client;
mod types;

#[cfg(test)]
pub mod testing;

pub use client::{HttpNetwork, Network};
pub use types::{Destination, Request, Response, ResponseType};
