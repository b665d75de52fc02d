//! Bridge<->client frame protocol for Relay.
//!
//! Defines the schema-versioned JSON frames exchanged between the bridge
//! process and web clients, plus parse-error classification used to build
//! well-formed error replies for malformed input.

pub mod bridge_frames;

pub use bridge_frames::*;
