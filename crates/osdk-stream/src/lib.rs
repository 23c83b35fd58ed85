//! Server-sent event decoding for OSDK object-set subscriptions.
//!
//! [`SseDecoder`] turns arbitrary byte chunks into [`SseEvent`]s;
//! [`parse_sse_events`] wraps it around an async chunk stream. Event payloads
//! decode into [`StreamMessage`]s, the messages a subscription server sends
//! (changed objects, refresh requests, closure, initial-load markers).
//!
//! # Design Rules
//!
//! 1. Output never depends on where the input was split into chunks.
//! 2. A record with no `data` field is never dispatched.
//! 3. Decoding stops at the first error; nothing after it is yielded.

pub mod error;
pub mod message;
pub mod sse;

pub use error::{StreamError, StreamResult};
pub use message::{
    InitialLoad, ObjectSetUpdate, ObjectState, StreamMessage, SubscribeRequest,
    SubscribeResponse,
};
pub use sse::{decode_all, parse_sse_events, SseDecoder, SseEvent};
