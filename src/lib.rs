//! OCR dispatch and collection fulfillment.
//!
//! Routes document OCR to a local or cloud provider by subscription tier,
//! enforces monthly quotas, falls back once on failure and keeps each
//! collection's aggregate status in step with its documents.

pub mod collection;
pub mod config;
pub mod dispatch;
pub mod entitlement;
pub mod error;
pub mod fulfillment;
pub mod indexing;
pub mod metrics;
pub mod ocr;
pub mod quota;
pub mod registry;
pub mod server;
pub mod store;
pub mod tier;

#[cfg(test)]
mod testing;
