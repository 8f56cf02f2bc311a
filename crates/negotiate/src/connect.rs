//! TLS transport connector.
//!
//! Opens the exclusive TLS 1.2 connection a negotiation runs over. No
//! retry here: connection and TLS failures surface directly and the caller
//! decides whether to start a new attempt.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::NegotiateError;

/// Dial timeout covering TCP connect plus the TLS handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// TLS behavior of the connector.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Skip certificate verification. The service fronts its negotiation
    /// host with a private CA, so connecting to production requires this;
    /// it stays off by default.
    pub accept_invalid_certs: bool,
}

/// Opens a TLS 1.2 connection to `host:port`.
pub async fn open(
    host: &str,
    port: u16,
    options: &TlsOptions,
    cancel: &CancellationToken,
) -> Result<TlsStream<TcpStream>, NegotiateError> {
    let config = client_config(options)?;
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| NegotiateError::Tls(format!("invalid host name: {e}")))?;

    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(NegotiateError::Cancelled);
        }
        result = tokio::time::timeout(CONNECT_TIMEOUT, async {
            let tcp = TcpStream::connect((host, port)).await?;
            connector.connect(server_name, tcp).await
        }) => {
            match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(NegotiateError::ConnectTimeout),
            }
        }
    };

    debug!(host, port, "negotiation transport connected");
    Ok(stream)
}

fn client_config(options: &TlsOptions) -> Result<ClientConfig, NegotiateError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    // The protocol pins TLS 1.2; the server does not speak 1.3.
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12])
        .map_err(|e| NegotiateError::Tls(e.to_string()))?;

    let config = if options.accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification { provider }))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    Ok(config)
}

/// Accepts any server certificate while still verifying handshake
/// signatures. Only installed when [`TlsOptions::accept_invalid_certs`]
/// is set.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
