//! REST endpoints of the authentication service.
//!
//! Plain request/response calls, no state machine: reserve a phone number
//! (SMS code), validate the received code for the account password, and
//! log in for a bearer token. Bodies are the service's hand-rolled
//! protobuf frames, reproduced byte for byte.

use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use tracing::debug;

use crate::AuthError;

const DEFAULT_BASE_URL: &str = "https://auth.todus.cu";

/// Length of the random nonce embedded in every auth frame.
const NONCE_LEN: usize = 150;

/// Client for the authentication REST service.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    version: String,
    version_code: String,
}

impl AuthClient {
    pub fn new(
        version: &str,
        version_code: &str,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            version: version.to_string(),
            version_code: version_code.to_string(),
        })
    }

    /// Points the client at a local server (for testing).
    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// Asks the service to send a verification SMS code to `phone`.
    pub async fn request_code(&self, phone: &str) -> Result<(), AuthError> {
        let body = reserve_frame(phone, &nonce());
        self.post("/v2/auth/users.reserve", body).await?;
        debug!(phone, "verification code requested");
        Ok(())
    }

    /// Validates the received SMS code; returns the account password.
    pub async fn validate_code(&self, phone: &str, code: &str) -> Result<String, AuthError> {
        let body = register_frame(phone, &nonce(), code);
        let content = self.post("/v2/auth/users.register", body).await?;
        Ok(extract_password(&content))
    }

    /// Logs in with phone and password; returns the bearer token.
    pub async fn login(&self, phone: &str, password: &str) -> Result<String, AuthError> {
        let body = login_frame(phone, &nonce(), password, &self.version_code);
        let content = self.post("/v2/auth/token", body).await?;
        Ok(printable(&content))
    }

    async fn post(&self, endpoint: &str, body: Vec<u8>) -> Result<Vec<u8>, AuthError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .http
            .post(&url)
            .header(USER_AGENT, format!("ToDus {} Auth", self.version))
            .header(CONTENT_TYPE, "application/x-protobuf")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Frame building and response parsing
// ---------------------------------------------------------------------------

/// `users.reserve` body: phone field then the padding nonce.
fn reserve_frame(phone: &str, nonce: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + phone.len() + nonce.len());
    frame.extend_from_slice(&[0x0a, 0x0a]);
    frame.extend_from_slice(phone.as_bytes());
    frame.extend_from_slice(&[0x12, 0x96, 0x01]);
    frame.extend_from_slice(nonce.as_bytes());
    frame
}

/// `users.register` body: the reserve frame plus the SMS code field.
fn register_frame(phone: &str, nonce: &str, code: &str) -> Vec<u8> {
    let mut frame = reserve_frame(phone, nonce);
    frame.extend_from_slice(&[0x1a, 0x06]);
    frame.extend_from_slice(code.as_bytes());
    frame
}

/// `token` body: phone, nonce, password and client version code.
fn login_frame(phone: &str, nonce: &str, password: &str, version_code: &str) -> Vec<u8> {
    let mut frame = reserve_frame(phone, nonce);
    frame.extend_from_slice(&[0x12, 0x60]);
    frame.extend_from_slice(password.as_bytes());
    frame.extend_from_slice(&[0x1a, 0x05]);
    frame.extend_from_slice(version_code.as_bytes());
    frame
}

/// Pulls the 96-character password out of the register reply. A backtick
/// marks its start; older replies carry it at a fixed offset instead.
fn extract_password(content: &[u8]) -> String {
    let range = match content.iter().position(|&b| b == b'`') {
        Some(idx) => {
            let start = idx + 1;
            start..(start + 96).min(content.len())
        }
        None => 5.min(content.len())..166.min(content.len()),
    };
    String::from_utf8_lossy(&content[range]).into_owned()
}

/// Strips non-printable bytes from the token reply.
fn printable(content: &[u8]) -> String {
    content
        .iter()
        .map(|&b| b as char)
        .filter(|c| c.is_ascii_graphic() || matches!(c, ' ' | '\t' | '\n' | '\r'))
        .collect()
}
