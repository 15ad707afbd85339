//! Persisted entities
//!
//! Table layout: `models`, `requests`, `requests_content`, `metrics`,
//! `transactions`, `api_keys`, `wallet`, `family`.

pub mod api_key;
pub mod family;
pub mod metric;
pub mod model;
pub mod request;
pub mod request_content;
pub mod transaction;
pub mod wallet;
