//! Engine client: typed operations over the subprocess protocol

pub mod client;
pub mod protocol;
pub mod traits;

pub use client::{EngineClient, EngineCommand, EngineConfig, RawOutput};
pub use protocol::{
    parse_config_listing, parse_search_output, parse_search_output_or_empty, SearchResponse,
    SearchResult, SearchTimings,
};
pub use traits::{AddOutcome, EngineBackend};
