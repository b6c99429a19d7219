//! Pure translators between the canonical messages format and each upstream
//! provider wire, for requests, responses and streaming.
//!
//! Translation is total on well-formed upstream input: missing fields
//! degrade to empty blocks rather than errors. IO never happens here.

pub mod generate;
