//! Outbound stanza builders.
//!
//! Stanzas are written as preformatted strings; the dialect is small enough
//! that a serializer would be overhead. Attribute and text values are
//! entity-escaped before interpolation.

use crate::constants::{
    NS_AUTH, NS_BIND, NS_CLIENT, NS_PUSH, NS_STREAM, NS_UPLOAD, PUSH_MAX_INTERVAL,
    SASL_MECHANISM, STREAM_VERSION,
};

/// Opening stream declaration; also re-sent verbatim after a successful
/// authentication restarts the stream.
pub fn stream_open(host: &str) -> String {
    format!(
        "<stream:stream xmlns='{NS_CLIENT}' o='{}' xmlns:stream='{NS_STREAM}' v='{STREAM_VERSION}'>",
        escape(host)
    )
}

/// SASL PLAIN authentication stanza carrying the credential blob as text.
pub fn auth(blob: &str) -> String {
    format!(
        "<ah xmlns='{NS_AUTH}' e='{SASL_MECHANISM}'>{}</ah>",
        escape(blob)
    )
}

/// Resource bind request (`iq` type `set`).
pub fn bind_request(id: &str) -> String {
    format!(
        "<iq i='{}' t='set'><b1 xmlns='{NS_BIND}'/></iq>",
        escape(id)
    )
}

/// Pong reply to a keep-alive ping.
pub fn pong(id: &str) -> String {
    format!("<p i='{}'/>", escape(id))
}

/// Push-enable stanza sent once the bind is accepted.
pub fn push_enable() -> String {
    format!("<en xmlns='{NS_PUSH}' u='true' max='{PUSH_MAX_INTERVAL}'/>")
}

/// Pre-signed upload URL request (`iq` type `get`) for a payload of
/// `size` bytes.
pub fn upload_request(id: &str, size: u64) -> String {
    format!(
        "<iq i='{}' t='get'>\
         <query xmlns='{NS_UPLOAD}' type='1' persistent='false' size='{size}' room=''/>\
         </iq>",
        escape(id)
    )
}

fn escape(s: &str) -> String {
    if !s.contains(['&', '<', '>', '\'', '"']) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}
