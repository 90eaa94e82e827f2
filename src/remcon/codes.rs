//! Numbered failure codes reported by the RemCon32 console.
//!
//! A failed command answers `#` on the ack line and `* <code>` on the data line.
//! The table below is closed; anything outside it still decodes, with
//! [`UNMAPPED_ERROR_MESSAGE`] as its text.

/// Placeholder text for codes missing from [`REMCON_ERRORS`].
pub const UNMAPPED_ERROR_MESSAGE: &str = "Unmapped error code";

/// Code 603, returned for out-of-range stage targets among others.
pub const PARAMETER_OUT_OF_RANGE: i32 = 603;

/// Code 614, returned by `prb?` while the specimen current monitor is off.
pub const OPTION_NOT_FITTED: i32 = 614;

/// Known console error codes and their descriptions.
pub static REMCON_ERRORS: &[(i32, &str)] = &[
    (600, "Unknown command"),
    (601, "Invalid number of parameters"),
    (602, "Invalid parameter type"),
    (603, "Parameter out of range"),
    (604, "Command timeout"),
    (605, "Catastrophic error - reboot system"),
    (611, "Unexpected external control abort"),
    (613, "Parameter Unattainable"),
    (614, "Option Not Fitted"),
    (615, "Cannot change that parameter"),
    (616, "Cannot execute that command"),
    (617, "Command exceeded the max length of chars"),
];

/// Table lookup. `None` for unmapped codes.
pub fn error_message(code: i32) -> Option<&'static str> {
    REMCON_ERRORS
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, message)| *message)
}

/// Table lookup that never fails.
pub fn describe(code: i32) -> &'static str {
    error_message(code).unwrap_or(UNMAPPED_ERROR_MESSAGE)
}
