//! Percent encoding helpers for the grant URLs.
//!
//! The server percent-encodes the `put`/`get` attributes of the upload
//! grant; everything outside the URL-unreserved set is escaped.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Everything except ALPHA / DIGIT / "-" / "." / "_" / "~" (RFC 3986
/// unreserved).
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Decodes a percent-encoded component; invalid UTF-8 sequences are
/// replaced rather than rejected.
pub fn decode_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Percent-encodes a component, escaping all non-unreserved octets.
pub fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, COMPONENT).to_string()
}
