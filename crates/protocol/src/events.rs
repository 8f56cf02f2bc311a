//! Classification of decoded elements into the closed set of wire events.
//!
//! The negotiation engine never inspects tag strings itself; every decoded
//! element is mapped here, once, into a [`WireEvent`] the state machine can
//! match exhaustively.

use crate::constants::{NS_BIND, NS_CLIENT, NS_SASL, NS_STREAM, NS_UPLOAD};
use crate::element::Element;

/// Pre-signed URL pair carried by an upload grant reply, still
/// percent-encoded exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSlot {
    pub put: String,
    pub get: String,
}

/// One decoded wire event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// Stream capabilities offered by the server.
    Features { sasl: bool, bind: bool },
    /// Authentication accepted; the stream restarts.
    AuthOk,
    /// Credentials rejected.
    NotAuthorized,
    /// Server-initiated connection timeout.
    ConnectionTimeout,
    /// Keep-alive ping; expects a pong reply.
    KeepAlive,
    /// An `iq` reply. Correlation and identity checks are the state
    /// machine's job; the decoder only extracts the relevant fields.
    IqResult {
        id: Option<String>,
        origin: Option<String>,
        upload: Option<UploadSlot>,
    },
    /// Anything else; dropped without a state change.
    Ignored,
}

impl WireEvent {
    /// Classifies a fully-closed element.
    pub fn from_element(el: &Element) -> WireEvent {
        if el.is(NS_STREAM, "features") {
            return WireEvent::Features {
                sasl: el.find(NS_SASL, "es").is_some(),
                bind: el.find(NS_BIND, "b1").is_some(),
            };
        }
        if el.is(NS_SASL, "ok") {
            return WireEvent::AuthOk;
        }
        if el.is(NS_CLIENT, "not-authorized") {
            return WireEvent::NotAuthorized;
        }
        if el.is(NS_CLIENT, "connection-timeout") {
            return WireEvent::ConnectionTimeout;
        }
        if el.is(NS_CLIENT, "ed") {
            return WireEvent::KeepAlive;
        }
        if el.is(NS_CLIENT, "iq") && el.attr("t") == Some("result") {
            let upload = el.find(NS_UPLOAD, "query").and_then(|q| {
                match (q.attr("put"), q.attr("get")) {
                    (Some(put), Some(get)) => Some(UploadSlot {
                        put: put.to_string(),
                        get: get.to_string(),
                    }),
                    _ => None,
                }
            });
            return WireEvent::IqResult {
                id: el.attr("i").map(str::to_string),
                origin: el.attr("o").map(str::to_string),
                upload,
            };
        }
        WireEvent::Ignored
    }
}
