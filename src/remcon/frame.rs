//! Two-line response frames.
//!
//! Every command is answered with two CRLF-terminated lines:
//!
//! ```text
//! @\r\n            ack: accepted          #\r\n        ack: rejected
//! >[value]\r\n     data: value or empty   * 603\r\n    data: error code
//! ```
//!
//! Only `@` followed by `>` is a success. Interpretation is a pure function of
//! the two lines so it can be tested without a channel.

use crate::error::{SemError, SemResult};
use crate::remcon::codes;

/// Success marker on the ack line.
pub const ACK_OK: u8 = b'@';
/// Failure marker on the ack line.
pub const ACK_FAIL: u8 = b'#';
/// Success marker on the data line.
pub const DATA_OK: u8 = b'>';
/// Error-code marker on the data line.
pub const DATA_ERROR: u8 = b'*';

/// Raw ack and data lines of one exchange, terminators included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// First line.
    pub ack: String,
    /// Second line.
    pub data: String,
}

fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(&['\r', '\n'][..])
}

impl ResponseFrame {
    /// Frame from two already-decoded lines.
    pub fn new(ack: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            ack: ack.into(),
            data: data.into(),
        }
    }

    /// Frame from raw line bytes. Non-ASCII bytes are replaced, not rejected.
    pub fn from_bytes(ack: &[u8], data: &[u8]) -> Self {
        Self::new(
            String::from_utf8_lossy(ack).into_owned(),
            String::from_utf8_lossy(data).into_owned(),
        )
    }

    /// Ack starts with `@` and data starts with `>`.
    pub fn is_success(&self) -> bool {
        self.ack.as_bytes().first() == Some(&ACK_OK) && self.data.as_bytes().first() == Some(&DATA_OK)
    }

    /// Success payload: the data line without marker and terminator.
    /// `None` for a bare acknowledgement or a failed frame.
    pub fn payload(&self) -> Option<&str> {
        if !self.is_success() {
            return None;
        }
        let body = strip_terminator(&self.data[1..]);
        (!body.is_empty()).then_some(body)
    }

    /// Turn the frame into the result of `command`.
    ///
    /// - success: `Ok(payload)`, `None` for a bare acknowledgement
    /// - failure with `error_tolerant`: `Ok(Some(raw data line))`, unmodified
    /// - failure with `* <code>`: [`SemError::Remcon`]
    /// - anything else: [`SemError::ProtocolViolation`]
    pub fn interpret(&self, command: &str, error_tolerant: bool) -> SemResult<Option<String>> {
        if self.is_success() {
            return Ok(self.payload().map(str::to_string));
        }

        if error_tolerant {
            return Ok(Some(self.data.clone()));
        }

        if let Some(code) = self.error_code() {
            return Err(SemError::Remcon {
                code,
                message: codes::describe(code),
            });
        }

        Err(SemError::ProtocolViolation {
            command: command.to_string(),
            ack: self.ack.clone(),
            data: self.data.clone(),
        })
    }

    /// Code from a `* <code>` data line. `None` if the line is not in that shape.
    pub fn error_code(&self) -> Option<i32> {
        strip_terminator(&self.data)
            .strip_prefix(DATA_ERROR as char)
            .and_then(|rest| rest.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remcon::codes::{REMCON_ERRORS, UNMAPPED_ERROR_MESSAGE};

    #[test]
    fn test_success_payload_for_all_lengths() {
        for len in 0..64 {
            let payload: String = "7".repeat(len);
            let frame = ResponseFrame::new("@\r\n", format!(">{payload}\r\n"));
            let got = frame.interpret("mag?", false).unwrap();
            if len == 0 {
                assert_eq!(got, None);
            } else {
                assert_eq!(got.as_deref(), Some(payload.as_str()));
            }
        }
    }

    #[test]
    fn test_payload_keeps_inner_spaces() {
        let frame = ResponseFrame::new("@\r\n", ">1.5 -2.0\r\n");
        assert_eq!(frame.payload(), Some("1.5 -2.0"));
    }

    #[test]
    fn test_every_table_code_decodes() {
        for (code, message) in REMCON_ERRORS {
            let frame = ResponseFrame::new("#\r\n", format!("* {code}\r\n"));
            match frame.interpret("x", false) {
                Err(SemError::Remcon { code: c, message: m }) => {
                    assert_eq!(c, *code);
                    assert_eq!(m, *message);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_unmapped_code_gets_placeholder() {
        let frame = ResponseFrame::new("#\r\n", "* 699\r\n");
        match frame.interpret("x", false) {
            Err(SemError::Remcon { code, message }) => {
                assert_eq!(code, 699);
                assert_eq!(message, UNMAPPED_ERROR_MESSAGE);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_code_without_space_and_with_ok_ack() {
        // Error data line wins even if the ack looked fine
        let frame = ResponseFrame::new("@\r\n", "*601\r\n");
        assert_eq!(frame.interpret("x", false).unwrap_err().remcon_code(), Some(601));
    }

    #[test]
    fn test_tolerant_returns_raw_data_line() {
        let frame = ResponseFrame::new("#\r\n", "* 614\r\n");
        assert_eq!(
            frame.interpret("prb?", true).unwrap().as_deref(),
            Some("* 614\r\n")
        );
    }

    #[test]
    fn test_unrecognised_shapes_are_violations() {
        let cases = [
            ("", ">1\r\n"),
            ("@\r\n", ""),
            ("?\r\n", ">1\r\n"),
            ("#\r\n", "garbage\r\n"),
            ("#\r\n", "* abc\r\n"),
        ];
        for (ack, data) in cases {
            let frame = ResponseFrame::new(ack, data);
            match frame.interpret("foc?", false) {
                Err(SemError::ProtocolViolation { command, ack: a, data: d }) => {
                    assert_eq!(command, "foc?");
                    assert_eq!(a, ack);
                    assert_eq!(d, data);
                }
                other => panic!("unexpected {other:?} for {ack:?}/{data:?}"),
            }
        }
    }
}
