//! Per-negotiation session identity.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of the random session id.
const SID_LEN: usize = 5;

/// Identity of one negotiation attempt.
///
/// The session id prefixes every message id the client sends, correlating
/// asynchronous replies with this attempt. It is fixed for the lifetime of
/// the negotiation and never reused; a retry builds a new `Session`.
#[derive(Debug, Clone)]
pub struct Session {
    /// Phone identifier extracted from the bearer token.
    pub phone: String,
    /// Short random token unique to this attempt.
    pub sid: String,
    /// Base64 SASL PLAIN payload.
    pub auth_blob: String,
}

impl Session {
    pub fn new(phone: impl Into<String>, auth_blob: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            sid: generate_sid(),
            auth_blob: auth_blob.into(),
        }
    }

    /// Message id for the given request sequence number, e.g. `"a1b2c-3"`.
    pub fn message_id(&self, seq: u32) -> String {
        format!("{}-{seq}", self.sid)
    }

    /// Expected prefix of the `o` attribute on replies addressed to this
    /// session's account.
    pub fn origin_prefix(&self, host: &str) -> String {
        format!("{}@{host}", self.phone)
    }
}

fn generate_sid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SID_LEN)
        .map(char::from)
        .collect()
}
