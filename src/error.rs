//! Error types for device and bridge operations.

use thiserror::Error;

/// Errors from the USB HID device layer
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("HID backend error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("No supported CDU device found")]
    NotFound,
}

/// Errors from font packaging.
///
/// Geometry mismatches are programmer/data errors: they are reported
/// immediately and never retried.
#[derive(Error, Debug)]
pub enum FontError {
    #[error("Glyph height {got} does not match template height {expected}")]
    HeightMismatch { expected: u8, got: u8 },

    #[error("Glyph '{ch}' has {got} bitmap bytes, template expects {expected}")]
    SizeMismatch { ch: char, expected: usize, got: usize },
}

/// Top-level bridge errors
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Font error: {0}")]
    Font(#[from] FontError),

    #[error("Unsupported simulator backend: {0}")]
    UnknownBackend(String),
}
