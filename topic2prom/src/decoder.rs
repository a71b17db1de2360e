//! Decoding of message payloads into gauge values.

use std::num::ParseFloatError;
use std::str::Utf8Error;

use thiserror::Error;

/// Why a payload could not be turned into a number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("payload is not valid UTF-8: {0}")]
    NotUtf8(#[from] Utf8Error),

    #[error("payload is empty")]
    Empty,

    #[error("payload is not a number: {0}")]
    NotANumber(#[from] ParseFloatError),

    #[error("payload is not a finite number")]
    NotFinite,
}

/// A payload that could not be decoded, with enough context to log it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value {payload:?} on topic {topic}: {reason}")]
pub struct DecodeError {
    pub topic: String,
    pub payload: String,
    #[source]
    pub reason: DecodeFailure,
}

/// Parse a textual base-10 number from a message payload.
///
/// Leading and trailing ASCII whitespace is ignored. Infinities are rejected,
/// `NaN` is accepted.
pub fn decode(topic: &str, payload: &[u8]) -> Result<f64, DecodeError> {
    parse(payload).map_err(|reason| DecodeError {
        topic: topic.to_string(),
        payload: String::from_utf8_lossy(payload).into_owned(),
        reason,
    })
}

fn parse(payload: &[u8]) -> Result<f64, DecodeFailure> {
    let text = std::str::from_utf8(payload)?.trim_ascii();
    if text.is_empty() {
        return Err(DecodeFailure::Empty);
    }
    let value = text.parse::<f64>()?;
    if value.is_infinite() {
        return Err(DecodeFailure::NotFinite);
    }
    Ok(value)
}
