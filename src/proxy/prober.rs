//! Transport-level connectivity probes
//!
//! A probe measures how long it takes until a connection of the declared
//! transport is usable, then tears it down. It never speaks the proxy
//! protocol itself.

use crate::error::ProbeError;
use crate::proxy::models::{Descriptor, Endpoint, Transport};
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::{client_async_tls_with_config, Connector};

/// Latency of one successful probe in whole milliseconds
pub type Latency = u64;

/// Something that can measure whether a descriptor's endpoint is reachable
pub trait Prober: Send + Sync + 'static {
    /// Probe one descriptor, finishing within roughly `timeout`
    fn probe(
        &self,
        descriptor: &Descriptor,
        timeout: Duration,
    ) -> impl Future<Output = std::result::Result<Latency, ProbeError>> + Send;
}

impl<T: Prober> Prober for Arc<T> {
    fn probe(
        &self,
        descriptor: &Descriptor,
        timeout: Duration,
    ) -> impl Future<Output = std::result::Result<Latency, ProbeError>> + Send {
        (**self).probe(descriptor, timeout)
    }
}

/// Prober that opens real TCP, TLS and WebSocket connections
///
/// Certificate and hostname validation are disabled: self-signed and
/// mismatched certificates are normal for these endpoints.
#[derive(Clone)]
pub struct TransportProber {
    native: native_tls::TlsConnector,
    tls: tokio_native_tls::TlsConnector,
}

impl TransportProber {
    pub fn new() -> Result<Self> {
        let native = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        let tls = tokio_native_tls::TlsConnector::from(native.clone());
        Ok(Self { native, tls })
    }

    /// Establish a usable connection of the declared transport, then close it
    async fn open(&self, endpoint: &Endpoint) -> std::result::Result<(), ProbeError> {
        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;

        match endpoint.transport {
            Transport::PlainTcp => drop(tcp),
            Transport::TlsTcp => {
                let _stream = self.tls.connect(endpoint.server_name(), tcp).await?;
            }
            Transport::PlainWs | Transport::TlsWs => {
                let connector = if endpoint.transport.is_tls() {
                    Connector::NativeTls(self.native.clone())
                } else {
                    Connector::Plain
                };
                let (_stream, _response) =
                    client_async_tls_with_config(endpoint.ws_url(), tcp, None, Some(connector))
                        .await?;
            }
        }
        Ok(())
    }
}

impl Prober for TransportProber {
    fn probe(
        &self,
        descriptor: &Descriptor,
        timeout: Duration,
    ) -> impl Future<Output = std::result::Result<Latency, ProbeError>> + Send {
        async move {
            let endpoint = descriptor.endpoint.as_ref().ok_or(ProbeError::NoEndpoint)?;
            let start = Instant::now();

            tokio::time::timeout(timeout, self.open(endpoint))
                .await
                .map_err(|_| ProbeError::Timeout(timeout))??;

            Ok(start.elapsed().as_millis() as Latency)
        }
    }
}
