// Guitar stem separation
// Wire protocol, HTTP client, and the separation service itself

pub mod client;
pub mod protocol;
pub mod service;

pub use client::{HttpSeparationClient, SeparationClient, SeparationError, SeparationUpdate};
pub use protocol::{parse_data_line, SeparationEvent, SseDecoder};
pub use service::{
    router, spawn_download_sweeper, CommandStemSeparator, StemError, StemSeparator, StemService,
};
