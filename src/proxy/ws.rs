//! WebSocket proxying.
//!
//! An upgrade request opens a dedicated connection to the upstream and
//! splices messages in both directions until either side closes.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio_tungstenite::tungstenite::{self, Message as TgMessage};
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use tracing::{error, info, warn};
use url::Url;

use crate::observability::metrics;

/// Handle a WebSocket upgrade and proxy it to the upstream.
pub fn handle_upgrade(
    upgrade: WebSocketUpgrade,
    upstream: &Url,
    tls_skip_verify: bool,
    timer_name: String,
) -> Response {
    // http(s) targets advertise the equivalent ws(s) endpoint.
    let mut upstream = upstream.clone();
    let scheme = match upstream.scheme() {
        "http" => "ws",
        "https" | "wss" => "wss",
        s => s,
    }
    .to_string();
    if upstream.set_scheme(&scheme).is_err() {
        error!(upstream = %upstream, "Cannot derive websocket scheme");
    }

    upgrade.on_upgrade(move |socket| async move {
        let start = Instant::now();
        proxy_ws(socket, &upstream, tls_skip_verify).await;
        metrics::record_request(&timer_name, 101, start.elapsed());
    })
}

async fn proxy_ws(client_ws: WebSocket, upstream: &Url, tls_skip_verify: bool) {
    let connector = if tls_skip_verify {
        Some(Connector::Rustls(Arc::new(insecure_client_config())))
    } else {
        None
    };

    let upstream_ws =
        match connect_async_tls_with_config(upstream.as_str(), None, false, connector).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                error!(upstream = %upstream, error = %e, "Cannot open upstream websocket");
                return;
            }
        };

    let (mut up_sink, mut up_stream) = upstream_ws.split();
    let (mut client_sink, mut client_stream) = client_ws.split();

    let client_to_upstream = async {
        while let Some(Ok(msg)) = client_stream.next().await {
            let up_msg = match msg {
                Message::Text(t) => TgMessage::Text(t.to_string().into()),
                Message::Binary(b) => TgMessage::Binary(b.into()),
                Message::Ping(p) => TgMessage::Ping(p.into()),
                Message::Pong(p) => TgMessage::Pong(p.into()),
                Message::Close(c) => TgMessage::Close(c.map(to_tungstenite_close)),
            };
            if let Err(e) = up_sink.send(up_msg).await {
                warn!(error = %e, "Error forwarding to upstream websocket");
                break;
            }
        }
    };

    let upstream_to_client = async {
        while let Some(Ok(msg)) = up_stream.next().await {
            let client_msg = match msg {
                TgMessage::Text(t) => Message::Text(t.to_string().into()),
                TgMessage::Binary(b) => Message::Binary(b.into()),
                TgMessage::Ping(p) => Message::Ping(p.into()),
                TgMessage::Pong(p) => Message::Pong(p.into()),
                TgMessage::Close(c) => Message::Close(c.map(to_axum_close)),
                _ => continue,
            };
            if let Err(e) = client_sink.send(client_msg).await {
                warn!(error = %e, "Error forwarding to client websocket");
                break;
            }
        }
    };

    tokio::select! {
        _ = client_to_upstream => {},
        _ = upstream_to_client => {},
    }
    info!(upstream = %upstream, "Websocket connection closed");
}

fn to_tungstenite_close(cf: axum::extract::ws::CloseFrame) -> tungstenite::protocol::CloseFrame {
    tungstenite::protocol::CloseFrame {
        code: cf.code.into(),
        reason: cf.reason.to_string().into(),
    }
}

fn to_axum_close(cf: tungstenite::protocol::CloseFrame) -> axum::extract::ws::CloseFrame {
    axum::extract::ws::CloseFrame {
        code: cf.code.into(),
        reason: cf.reason.to_string().into(),
    }
}

/// Client TLS config that accepts any upstream certificate, for
/// targets marked tlsskipverify.
fn insecure_client_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipVerification))
        .with_no_client_auth()
}

#[derive(Debug)]
struct SkipVerification;

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
