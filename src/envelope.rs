//! Request and response envelopes.
//!
//! These are the documents exchanged on the wire. Field names are fixed:
//!
//! ```text
//! request:  {"name": "Double", "parameter": 5}
//! response: {"success": true, "errorMessage": "", "data": 10}
//! failure:  {"success": false, "errorMessage": "Unable to find method on server."}
//! ```
//!
//! A present `data` field is always `Some`, even when it is `null`, so a
//! handler returning `()` round-trips as `Some(())`.
//!
//! The server reads every request twice: first as a [`RequestHeader`] to
//! learn the method name, then as `Request<T>` once the registry has told it
//! which `T` that method expects.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A named call with a typed parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request<T> {
    /// Name of the registered handler to invoke.
    pub name: String,
    /// Parameter passed to the handler.
    pub parameter: T,
}

impl<T> Request<T> {
    /// Create a new request.
    pub fn new(name: impl Into<String>, parameter: T) -> Self {
        Self {
            name: name.into(),
            parameter,
        }
    }
}

/// Name-only view of a request, used before the parameter type is known.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RequestHeader {
    /// Name of the registered handler to invoke.
    pub name: String,
}

/// Outcome of a call.
///
/// `error_message` is empty iff `success` is true. `data` is only
/// meaningful on success and is `None` for failures, which leave the field
/// out of the encoded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Response<T> {
    /// Whether the call succeeded.
    pub success: bool,
    /// Failure description, empty on success.
    #[serde(default)]
    pub error_message: String,
    /// Handler result.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_data",
        bound(deserialize = "T: Deserialize<'de>")
    )]
    pub data: Option<T>,
}

/// Decode a `data` field that is present on the wire.
///
/// `null` becomes `Some` when `T` accepts it (`()`, `Option<_>`, `Value`)
/// and `None` otherwise, so peers that send `"data": null` with a failure
/// still decode.
fn present_data<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(T::deserialize(Value::Null).ok());
    }
    T::deserialize(value).map(Some).map_err(D::Error::custom)
}

impl<T> Response<T> {
    /// Successful response carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            error_message: String::new(),
            data: Some(data),
        }
    }

    /// Failed response with no data.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
            data: None,
        }
    }

    /// Convert into a `Result`, returning the error message on failure.
    pub fn into_result(self) -> std::result::Result<Option<T>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self.error_message)
        }
    }
}
