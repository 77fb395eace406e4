//! Codec module - serialization/deserialization for envelopes.
//!
//! Envelopes travel as UTF-8 JSON. [`JsonCodec`] is the only codec; it is a
//! marker struct with static methods so call sites stay monomorphic.
//!
//! # Example
//!
//! ```
//! use pipe_rpc::codec::JsonCodec;
//!
//! let encoded = JsonCodec::encode(&"hello").unwrap();
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;

pub use json::JsonCodec;
