//! Stanza negotiation state machine.
//!
//! Drives the handshake over an established transport until the server
//! grants a pre-signed URL pair or the attempt fails. Stanza processing is
//! strictly sequential: every fully-closed element is handled (and any
//! reply written) before more bytes are read. Terminal conditions are
//! ordinary values returned from [`advance`]; the driving loop never
//! unwinds through the state machine.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use todus_protocol::constants::NEGOTIATION_HOST;
use todus_protocol::{StanzaDecoder, UploadGrant, WireEvent, percent, writer};

use crate::error::NegotiateError;
use crate::session::Session;

/// Transport read size. Stanzas are tiny; this only bounds how much of a
/// burst one read can drain.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Where the handshake currently waits for the server.
///
/// The write-side steps of the protocol (opening the stream, requesting
/// the upload URL) happen inside a transition, so only the await points
/// are modeled as states. Completion and failure leave the loop as values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitFeatures,
    Authenticating,
    AwaitBindResult,
    AwaitUploadResult,
}

/// Outcome of feeding one wire event into the state machine.
#[derive(Debug)]
enum Reaction {
    None,
    Send(String),
    Granted(UploadGrant),
}

/// Runs a full negotiation over `stream` and returns the upload grant.
///
/// The transport is shut down on every exit path, success included; the
/// stream (and the decoder owned by the loop) never outlive the attempt.
pub async fn negotiate<S>(
    mut stream: S,
    session: &Session,
    file_size: u64,
    cancel: &CancellationToken,
) -> Result<UploadGrant, NegotiateError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = drive(&mut stream, session, file_size, cancel).await;
    let _ = stream.shutdown().await;
    match &result {
        Ok(_) => debug!(sid = %session.sid, "negotiation completed"),
        Err(err) => debug!(sid = %session.sid, error = %err, "negotiation failed"),
    }
    result
}

async fn drive<S>(
    stream: &mut S,
    session: &Session,
    file_size: u64,
    cancel: &CancellationToken,
) -> Result<UploadGrant, NegotiateError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = StanzaDecoder::new();
    let mut phase = Phase::AwaitFeatures;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    send(stream, &writer::stream_open(NEGOTIATION_HOST)).await?;

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(NegotiateError::Cancelled);
            }
            result = stream.read(&mut buf) => result?,
        };
        if n == 0 {
            return Err(NegotiateError::EndOfStream);
        }
        decoder.feed(&buf[..n]);

        while let Some(element) = decoder.next_stanza() {
            let event = WireEvent::from_element(&element);
            trace!(sid = %session.sid, ?event, "stanza received");
            match advance(&mut phase, session, file_size, event)? {
                Reaction::None => {}
                Reaction::Send(stanza) => send(stream, &stanza).await?,
                Reaction::Granted(grant) => return Ok(grant),
            }
        }
    }
}

async fn send<S>(stream: &mut S, stanza: &str) -> Result<(), NegotiateError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(stanza.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Applies one wire event to the state machine.
///
/// Returns what the driving loop should do next; terminal failures come
/// back as errors and end the attempt from any phase.
fn advance(
    phase: &mut Phase,
    session: &Session,
    file_size: u64,
    event: WireEvent,
) -> Result<Reaction, NegotiateError> {
    match event {
        WireEvent::Features { sasl, bind } => {
            if *phase != Phase::AwaitFeatures {
                return Ok(Reaction::None);
            }
            if sasl {
                *phase = Phase::Authenticating;
                Ok(Reaction::Send(writer::auth(&session.auth_blob)))
            } else if bind {
                *phase = Phase::AwaitBindResult;
                Ok(Reaction::Send(writer::bind_request(&session.message_id(1))))
            } else {
                Err(NegotiateError::Negotiation(
                    "server offered no supported stream feature".into(),
                ))
            }
        }
        WireEvent::AuthOk => {
            if *phase != Phase::Authenticating {
                return Ok(Reaction::None);
            }
            // The protocol restarts the stream after authentication:
            // re-open it on the same socket and wait for fresh features.
            *phase = Phase::AwaitFeatures;
            Ok(Reaction::Send(writer::stream_open(NEGOTIATION_HOST)))
        }
        WireEvent::NotAuthorized => Err(NegotiateError::Authentication),
        WireEvent::ConnectionTimeout => Err(NegotiateError::ConnectionTimeout),
        WireEvent::KeepAlive => Ok(Reaction::Send(writer::pong(&session.message_id(4)))),
        WireEvent::IqResult { id, origin, upload } => {
            if id.as_deref() == Some(session.message_id(1).as_str())
                && *phase == Phase::AwaitBindResult
            {
                *phase = Phase::AwaitUploadResult;
                let mut out = writer::push_enable();
                out.push_str(&writer::upload_request(&session.message_id(3), file_size));
                return Ok(Reaction::Send(out));
            }
            if id.as_deref() == Some(session.message_id(3).as_str())
                && *phase == Phase::AwaitUploadResult
            {
                // Replies for this account carry the phone as the origin
                // prefix; anything else is not addressed to this session.
                let prefix = session.origin_prefix(NEGOTIATION_HOST);
                let addressed = origin.as_deref().is_some_and(|o| o.starts_with(&prefix));
                if addressed {
                    if let Some(slot) = upload {
                        return Ok(Reaction::Granted(UploadGrant {
                            upload_url: percent::decode_component(&slot.put),
                            download_url: percent::decode_component(&slot.get),
                            file_size,
                        }));
                    }
                }
            }
            Ok(Reaction::None)
        }
        WireEvent::Ignored => Ok(Reaction::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    const HEADER: &str =
        "<stream:stream xmlns='jc' xmlns:stream='x1' o='im.todus.cu' v='1.0'>";

    fn session() -> Session {
        Session::new("5350000000", "AGJsb2I=")
    }

    // -----------------------------------------------------------------------
    // State machine unit tests
    // -----------------------------------------------------------------------

    #[test]
    fn features_with_sasl_sends_single_auth() {
        let s = session();
        let mut phase = Phase::AwaitFeatures;
        let reaction = advance(
            &mut phase,
            &s,
            10,
            WireEvent::Features {
                sasl: true,
                bind: true,
            },
        )
        .unwrap();
        match reaction {
            Reaction::Send(out) => {
                assert!(out.contains("<ah "));
                assert!(out.contains("e='PLAIN'"));
                assert!(!out.contains("<iq"), "must never bind when SASL is offered");
            }
            other => panic!("unexpected reaction {other:?}"),
        }
        assert_eq!(phase, Phase::Authenticating);
    }

    #[test]
    fn features_with_bind_only_sends_bind() {
        let s = session();
        let mut phase = Phase::AwaitFeatures;
        let reaction = advance(
            &mut phase,
            &s,
            10,
            WireEvent::Features {
                sasl: false,
                bind: true,
            },
        )
        .unwrap();
        match reaction {
            Reaction::Send(out) => {
                assert!(out.contains(&format!("i='{}-1'", s.sid)));
                assert!(out.contains("<b1 xmlns='x4'/>"));
            }
            other => panic!("unexpected reaction {other:?}"),
        }
        assert_eq!(phase, Phase::AwaitBindResult);
    }

    #[test]
    fn features_without_capabilities_fails() {
        let s = session();
        let mut phase = Phase::AwaitFeatures;
        let result = advance(
            &mut phase,
            &s,
            10,
            WireEvent::Features {
                sasl: false,
                bind: false,
            },
        );
        assert!(matches!(result, Err(NegotiateError::Negotiation(_))));
    }

    #[test]
    fn auth_ok_restarts_stream() {
        let s = session();
        let mut phase = Phase::Authenticating;
        let reaction = advance(&mut phase, &s, 10, WireEvent::AuthOk).unwrap();
        match reaction {
            Reaction::Send(out) => assert!(out.starts_with("<stream:stream")),
            other => panic!("unexpected reaction {other:?}"),
        }
        assert_eq!(phase, Phase::AwaitFeatures);
    }

    #[test]
    fn bind_result_requests_upload_url() {
        let s = session();
        let mut phase = Phase::AwaitBindResult;
        let reaction = advance(
            &mut phase,
            &s,
            4096,
            WireEvent::IqResult {
                id: Some(s.message_id(1)),
                origin: None,
                upload: None,
            },
        )
        .unwrap();
        match reaction {
            Reaction::Send(out) => {
                assert!(out.starts_with("<en xmlns='x7'"));
                assert!(out.contains("size='4096'"));
                assert!(out.contains(&format!("i='{}-3'", s.sid)));
            }
            other => panic!("unexpected reaction {other:?}"),
        }
        assert_eq!(phase, Phase::AwaitUploadResult);
    }

    #[test]
    fn grant_requires_matching_origin_prefix() {
        let s = session();
        let mut phase = Phase::AwaitUploadResult;
        let slot = todus_protocol::UploadSlot {
            put: "https%3A%2F%2Fup".into(),
            get: "https%3A%2F%2Fdown".into(),
        };

        // Wrong phone: ignored, no state change.
        let reaction = advance(
            &mut phase,
            &s,
            10,
            WireEvent::IqResult {
                id: Some(s.message_id(3)),
                origin: Some("9999@im.todus.cu/dev".into()),
                upload: Some(slot.clone()),
            },
        )
        .unwrap();
        assert!(matches!(reaction, Reaction::None));
        assert_eq!(phase, Phase::AwaitUploadResult);

        // Right phone: grant produced with decoded URLs.
        let reaction = advance(
            &mut phase,
            &s,
            10,
            WireEvent::IqResult {
                id: Some(s.message_id(3)),
                origin: Some("5350000000@im.todus.cu/dev".into()),
                upload: Some(slot),
            },
        )
        .unwrap();
        match reaction {
            Reaction::Granted(grant) => {
                assert_eq!(grant.upload_url, "https://up");
                assert_eq!(grant.download_url, "https://down");
                assert_eq!(grant.file_size, 10);
            }
            other => panic!("unexpected reaction {other:?}"),
        }
    }

    #[test]
    fn unrelated_iq_is_ignored() {
        let s = session();
        let mut phase = Phase::AwaitUploadResult;
        let reaction = advance(
            &mut phase,
            &s,
            10,
            WireEvent::IqResult {
                id: Some("zzzzz-3".into()),
                origin: Some("5350000000@im.todus.cu/dev".into()),
                upload: None,
            },
        )
        .unwrap();
        assert!(matches!(reaction, Reaction::None));
        assert_eq!(phase, Phase::AwaitUploadResult);
    }

    #[test]
    fn keep_alive_pongs_in_any_phase() {
        let s = session();
        for phase_value in [
            Phase::AwaitFeatures,
            Phase::Authenticating,
            Phase::AwaitBindResult,
            Phase::AwaitUploadResult,
        ] {
            let mut phase = phase_value;
            let reaction = advance(&mut phase, &s, 10, WireEvent::KeepAlive).unwrap();
            match reaction {
                Reaction::Send(out) => assert_eq!(out, format!("<p i='{}-4'/>", s.sid)),
                other => panic!("unexpected reaction {other:?}"),
            }
            assert_eq!(phase, phase_value, "keep-alive must not change state");
        }
    }

    #[test]
    fn terminal_conditions_fail_from_any_phase() {
        let s = session();
        let mut phase = Phase::AwaitBindResult;
        assert!(matches!(
            advance(&mut phase, &s, 10, WireEvent::NotAuthorized),
            Err(NegotiateError::Authentication)
        ));
        assert!(matches!(
            advance(&mut phase, &s, 10, WireEvent::ConnectionTimeout),
            Err(NegotiateError::ConnectionTimeout)
        ));
    }

    // -----------------------------------------------------------------------
    // Driving loop integration tests over an in-memory duplex transport
    // -----------------------------------------------------------------------

    async fn read_until(server: &mut DuplexStream, needle: &str) -> String {
        let mut collected = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer closed while waiting for {needle:?}");
            collected.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&collected).into_owned();
            if text.contains(needle) {
                return text;
            }
        }
    }

    /// Scripted server side of a full SASL + bind + grant exchange.
    async fn script_happy_server(mut server: DuplexStream, sid: String, phone: String) {
        read_until(&mut server, "<stream:stream").await;
        server
            .write_all(
                format!("{HEADER}<stream:features><es xmlns='x2'/></stream:features>")
                    .as_bytes(),
            )
            .await
            .unwrap();

        let auth = read_until(&mut server, "</ah>").await;
        assert!(auth.contains("e='PLAIN'"));
        assert!(!auth.contains("<iq"), "client must not bind before auth");
        server.write_all(b"<ok xmlns='x2'/>").await.unwrap();

        // Stream restart, then bind-only features.
        read_until(&mut server, "<stream:stream").await;
        server
            .write_all(
                format!("{HEADER}<stream:features><b1 xmlns='x4'/></stream:features>")
                    .as_bytes(),
            )
            .await
            .unwrap();

        let bind = read_until(&mut server, "</iq>").await;
        assert!(bind.contains(&format!("i='{sid}-1'")));
        server
            .write_all(format!("<iq t='result' i='{sid}-1'/>").as_bytes())
            .await
            .unwrap();

        let request = read_until(&mut server, "</iq>").await;
        assert!(request.contains("<en xmlns='x7' u='true' max='300'/>"));
        assert!(request.contains(&format!("i='{sid}-3'")));
        server
            .write_all(
                format!(
                    "<iq t='result' i='{sid}-3' o='{phone}@im.todus.cu/dev'>\
                     <query xmlns='todus:purl' put='https%3A%2F%2Fup' get='https%3A%2F%2Fdown'/>\
                     </iq>"
                )
                .as_bytes(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn full_negotiation_happy_path() {
        let (client, server) = tokio::io::duplex(8192);
        let s = session();
        let cancel = CancellationToken::new();

        let server_task = tokio::spawn(script_happy_server(
            server,
            s.sid.clone(),
            s.phone.clone(),
        ));

        let grant = negotiate(client, &s, 42, &cancel).await.unwrap();
        assert_eq!(grant.upload_url, "https://up");
        assert_eq!(grant.download_url, "https://down");
        assert_eq!(grant.file_size, 42);

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_features_close_the_transport() {
        let (client, mut server) = tokio::io::duplex(8192);
        let s = session();
        let cancel = CancellationToken::new();

        let server_task = tokio::spawn(async move {
            read_until(&mut server, "<stream:stream").await;
            server
                .write_all(format!("{HEADER}<stream:features/>").as_bytes())
                .await
                .unwrap();
            // The engine must close its side without sending auth or bind.
            let mut collected = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = server.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                collected.extend_from_slice(&buf[..n]);
            }
            let trailing = String::from_utf8_lossy(&collected).into_owned();
            assert!(!trailing.contains("<ah"));
            assert!(!trailing.contains("<iq"));
        });

        let err = negotiate(client, &s, 42, &cancel).await.unwrap_err();
        assert!(matches!(err, NegotiateError::Negotiation(_)));

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn crafted_origin_never_produces_grant() {
        let (client, mut server) = tokio::io::duplex(8192);
        let s = session();
        let cancel = CancellationToken::new();
        let sid = s.sid.clone();

        let server_task = tokio::spawn(async move {
            read_until(&mut server, "<stream:stream").await;
            server
                .write_all(
                    format!("{HEADER}<stream:features><b1 xmlns='x4'/></stream:features>")
                        .as_bytes(),
                )
                .await
                .unwrap();
            read_until(&mut server, "</iq>").await;
            server
                .write_all(format!("<iq t='result' i='{sid}-1'/>").as_bytes())
                .await
                .unwrap();
            read_until(&mut server, "</iq>").await;
            // A grant for someone else's account first, then the real one.
            server
                .write_all(
                    format!(
                        "<iq t='result' i='{sid}-3' o='9999@im.todus.cu/dev'>\
                         <query xmlns='todus:purl' put='https%3A%2F%2Fevil' get='https%3A%2F%2Fevil'/>\
                         </iq>\
                         <iq t='result' i='{sid}-3' o='5350000000@im.todus.cu/dev'>\
                         <query xmlns='todus:purl' put='https%3A%2F%2Fup' get='https%3A%2F%2Fdown'/>\
                         </iq>"
                    )
                    .as_bytes(),
                )
                .await
                .unwrap();
        });

        let grant = negotiate(client, &s, 42, &cancel).await.unwrap();
        assert_eq!(grant.upload_url, "https://up");

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_credentials_fail_terminally() {
        let (client, mut server) = tokio::io::duplex(8192);
        let s = session();
        let cancel = CancellationToken::new();

        let server_task = tokio::spawn(async move {
            read_until(&mut server, "<stream:stream").await;
            server
                .write_all(
                    format!("{HEADER}<stream:features><es xmlns='x2'/></stream:features>")
                        .as_bytes(),
                )
                .await
                .unwrap();
            read_until(&mut server, "</ah>").await;
            server.write_all(b"<not-authorized/>").await.unwrap();
        });

        let err = negotiate(client, &s, 42, &cancel).await.unwrap_err();
        assert!(matches!(err, NegotiateError::Authentication));

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn keep_alive_is_answered_without_state_change() {
        let (client, mut server) = tokio::io::duplex(8192);
        let s = session();
        let cancel = CancellationToken::new();
        let sid = s.sid.clone();

        let server_task = tokio::spawn(async move {
            read_until(&mut server, "<stream:stream").await;
            server.write_all(HEADER.as_bytes()).await.unwrap();
            // Two pings before features; both must be answered.
            server.write_all(b"<ed/>").await.unwrap();
            let pong = read_until(&mut server, "/>").await;
            assert!(pong.contains(&format!("<p i='{sid}-4'/>")));
            server.write_all(b"<ed/>").await.unwrap();
            read_until(&mut server, "/>").await;
            server.write_all(b"<connection-timeout/>").await.unwrap();
        });

        let err = negotiate(client, &s, 42, &cancel).await.unwrap_err();
        assert!(matches!(err, NegotiateError::ConnectionTimeout));

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn server_eof_is_end_of_stream() {
        let (client, mut server) = tokio::io::duplex(8192);
        let s = session();
        let cancel = CancellationToken::new();

        let server_task = tokio::spawn(async move {
            read_until(&mut server, "<stream:stream").await;
            server.write_all(HEADER.as_bytes()).await.unwrap();
            // Drop without ever issuing a grant.
        });

        let err = negotiate(client, &s, 42, &cancel).await.unwrap_err();
        assert!(matches!(err, NegotiateError::EndOfStream));

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_aborts_promptly() {
        let (client, _server) = tokio::io::duplex(8192);
        let s = session();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = negotiate(client, &s, 42, &cancel).await.unwrap_err();
        assert!(matches!(err, NegotiateError::Cancelled));
    }

    #[tokio::test]
    async fn concurrent_negotiations_are_isolated() {
        let (client_a, server_a) = tokio::io::duplex(8192);
        let (client_b, server_b) = tokio::io::duplex(8192);
        let a = session();
        let b = session();
        assert_ne!(a.sid, b.sid, "each attempt gets its own session id");
        let cancel = CancellationToken::new();

        let task_a = tokio::spawn(script_happy_server(
            server_a,
            a.sid.clone(),
            a.phone.clone(),
        ));
        let task_b = tokio::spawn(script_happy_server(
            server_b,
            b.sid.clone(),
            b.phone.clone(),
        ));

        let (grant_a, grant_b) = tokio::join!(
            negotiate(client_a, &a, 1, &cancel),
            negotiate(client_b, &b, 2, &cancel),
        );
        assert_eq!(grant_a.unwrap().file_size, 1);
        assert_eq!(grant_b.unwrap().file_size, 2);

        task_a.await.unwrap();
        task_b.await.unwrap();
    }
}
