//! Wire formats spoken by the gateway.
//!
//! `claude` is the canonical format: every inbound request is normalised into
//! it and every upstream response is translated back to it before leaving the
//! pipeline. `gemini` and `openai` cover the upstream provider wires.

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod sse;
