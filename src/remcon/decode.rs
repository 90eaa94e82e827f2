//! Payload decoders for typed getters.
//!
//! Numeric payloads are whitespace-separated decimal text. A payload that does not
//! parse is a [`SemError::ValueDecode`], never a panic and never a silent default
//! (the one documented exception, `prb?`, handles its fallback itself).

use crate::error::{SemError, SemResult};

/// Payload must be present.
pub fn require<'a>(command: &str, payload: Option<&'a str>) -> SemResult<&'a str> {
    payload.ok_or_else(|| SemError::decode(command, "", "expected a value, got bare acknowledgement"))
}

/// Single float.
pub fn parse_f64(command: &str, payload: &str) -> SemResult<f64> {
    payload
        .trim()
        .parse::<f64>()
        .map_err(|e| SemError::decode(command, payload, format!("expected a number: {e}")))
}

/// Single integer.
pub fn parse_i64(command: &str, payload: &str) -> SemResult<i64> {
    payload
        .trim()
        .parse::<i64>()
        .map_err(|e| SemError::decode(command, payload, format!("expected an integer: {e}")))
}

/// Integer flag, nonzero is true.
pub fn parse_flag(command: &str, payload: &str) -> SemResult<bool> {
    parse_i64(command, payload).map(|v| v != 0)
}

/// Whitespace-separated floats.
pub fn parse_floats(command: &str, payload: &str) -> SemResult<Vec<f64>> {
    payload
        .split_whitespace()
        .map(|field| {
            field.parse::<f64>().map_err(|e| {
                SemError::decode(command, payload, format!("bad field {field:?}: {e}"))
            })
        })
        .collect()
}

/// Whitespace-separated integers.
pub fn parse_ints(command: &str, payload: &str) -> SemResult<Vec<i64>> {
    payload
        .split_whitespace()
        .map(|field| {
            field.parse::<i64>().map_err(|e| {
                SemError::decode(command, payload, format!("bad field {field:?}: {e}"))
            })
        })
        .collect()
}

/// Exactly two floats, e.g. an x/y pair.
pub fn parse_pair(command: &str, payload: &str) -> SemResult<(f64, f64)> {
    match parse_floats(command, payload)?.as_slice() {
        [x, y] => Ok((*x, *y)),
        other => Err(SemError::decode(
            command,
            payload,
            format!("expected 2 values, got {}", other.len()),
        )),
    }
}
