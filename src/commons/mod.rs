//! Wikimedia Commons API access: category listings and video metadata.

pub mod client;
pub mod limiter;
pub mod models;
pub mod retry;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{CommonsClient, CommonsTransport, HttpTransport};
pub use limiter::OutboundLimiter;
pub use models::{CategoryListing, CategoryMember, CATEGORY_PREFIX, FILE_PREFIX};
pub use retry::RetryPolicy;
