//! Client for the legacy application's Data API.
mod http_source;

pub use http_source::{HttpLegacySource, HttpLegacySourceConfig};
