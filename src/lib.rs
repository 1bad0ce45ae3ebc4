//! ethdex: an Ethereum execution-layer indexer.
//!
//! The engine lives in [`ethdex_core`]; this crate wires it to a JSON-RPC
//! node and a redb store and ships the `ethdex` binary.

pub mod adapters;
pub mod prelude;
pub mod settings;

pub use ethdex_core as core;
