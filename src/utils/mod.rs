//! Shared utility functions.
//!
//! - `mime`: MIME detection and file extension mapping
//! - `text`: key normalization and path-safe names

pub mod mime;
mod text;

pub use mime::{detect_mime, mime_to_extension};
pub use text::{normalize_key, sanitize_filename, sanitize_segment};
