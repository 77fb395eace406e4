//! JSON codec using `serde_json`.
//!
//! Output is always UTF-8. Input is decoded with `serde_json::from_slice`,
//! which rejects invalid UTF-8 instead of lossily replacing it.

use crate::error::{PipeRpcError, Result};

/// JSON codec for envelopes and parameters.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to UTF-8 JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized (e.g. a map with
    /// non-string keys).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode UTF-8 JSON bytes to a value.
    ///
    /// Empty or whitespace-only input is reported as a protocol error so the
    /// caller can tell "nothing was sent" apart from "garbage was sent".
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(PipeRpcError::Protocol("empty payload".to_string()));
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestStruct {
            id: 42,
            name: "test".to_string(),
            active: true,
        };

        let encoded = JsonCodec::encode(&original).unwrap();
        let decoded: TestStruct = JsonCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encoding_is_utf8_text() {
        let encoded = JsonCodec::encode(&"žluťoučký kůň").unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert_eq!(text, "\"žluťoučký kůň\"");
    }

    #[test]
    fn test_decode_empty_is_protocol_error() {
        let err = JsonCodec::decode::<i32>(b"").unwrap_err();
        assert!(matches!(err, PipeRpcError::Protocol(_)));

        let err = JsonCodec::decode::<i32>(b"  \n").unwrap_err();
        assert!(matches!(err, PipeRpcError::Protocol(_)));
    }

    #[test]
    fn test_decode_malformed_is_json_error() {
        let err = JsonCodec::decode::<TestStruct>(b"{\"id\": 1,").unwrap_err();
        assert!(matches!(err, PipeRpcError::Json(_)));
    }

    #[test]
    fn test_decode_wrong_shape() {
        let err = JsonCodec::decode::<i32>(b"\"five\"").unwrap_err();
        assert!(matches!(err, PipeRpcError::Json(_)));
    }
}
