#![forbid(unsafe_code)]

pub mod app;
pub mod chunk;
pub mod cli;
pub mod discover;
pub mod epub;
pub mod extract;
pub mod fetch;
pub mod ingest;
pub mod logging;
pub mod openai;
pub mod package;
pub mod synth;
pub mod synthesize;
