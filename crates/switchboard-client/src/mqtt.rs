//! MQTT transport built on `rumqttc`.
//!
//! Production mode connects over TLS with a verifier that accepts any
//! certificate (the mixers use self-signed certificates); test mode connects
//! over plaintext TCP. The poller reports the first error and stops; the
//! session decides whether to reconnect.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter, TlsConfiguration,
    Transport as Wire,
    tokio_rustls::rustls::{
        self, DigitallySignedStruct, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};

use crate::transport::{ConnectOptions, Transport, TransportError, TransportEvent};

/// Request channel capacity between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// `rumqttc`-backed [`Transport`].
#[derive(Default)]
pub struct MqttTransport {
    client: Mutex<Option<AsyncClient>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Create a disconnected transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Result<AsyncClient, TransportError> {
        self.client.lock().clone().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError> {
        let mut mqtt = MqttOptions::new(
            options.client_id.clone(),
            options.endpoint.host.clone(),
            options.endpoint.port,
        );
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_credentials(options.username.clone(), options.password.clone());
        if options.endpoint.tls {
            mqtt.set_transport(Wire::tls_with_config(TlsConfiguration::Rustls(Arc::new(
                trust_all_config(),
            ))));
        }

        tracing::info!(
            host = %options.endpoint.host,
            port = options.endpoint.port,
            tls = options.endpoint.tls,
            "connecting to broker"
        );

        let (client, eventloop) = AsyncClient::new(mqtt, REQUEST_CAPACITY);
        let poller = tokio::spawn(poll(eventloop, events));

        *self.client.lock() = Some(client);
        if let Some(old) = self.poller.lock().replace(poller) {
            old.abort();
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.client()?
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish { topic: topic.to_string(), reason: e.to_string() })
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        let filters =
            topics.iter().map(|t| SubscribeFilter::new(t.clone(), QoS::AtLeastOnce)).collect::<Vec<_>>();
        self.client()?
            .subscribe_many(filters)
            .await
            .map_err(|e| TransportError::Subscribe { reason: e.to_string() })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let client = self.client.lock().take();
        let poller = self.poller.lock().take();

        let result = match client {
            Some(client) => client
                .disconnect()
                .await
                .map_err(|e| TransportError::Connect { reason: e.to_string() }),
            None => Ok(()),
        };
        if let Some(poller) = poller {
            poller.abort();
        }
        result
    }
}

async fn poll(mut eventloop: EventLoop, events: UnboundedSender<TransportEvent>) {
    let mut connected = false;
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected = true;
                TransportEvent::Connected
            },
            Ok(Event::Incoming(Packet::Publish(publish))) => TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Ok(_) => continue,
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(connected, %reason, "broker connection ended");
                let event = if connected {
                    TransportEvent::ConnectionLost { reason }
                } else {
                    TransportEvent::ConnectionFailed { reason }
                };
                let _ = events.send(event);
                return;
            },
        };
        if events.send(event).is_err() {
            tracing::debug!("event receiver dropped, stopping poller");
            return;
        }
    }
}

fn trust_all_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(TrustAll))
        .with_no_client_auth()
}

/// Accepts every server certificate.
#[derive(Debug)]
struct TrustAll;

impl ServerCertVerifier for TrustAll {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}
