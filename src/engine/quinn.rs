//! A transport engine backed by `quinn`.
//!
//! Every connection and listener runs on the tokio runtime captured at
//! construction and reports through an [`EventSink`]; run the paired
//! [`Dispatcher`](crate::dispatch::Dispatcher) on the same runtime.
//!
//! Stream payloads belong to the data layer, which this crate does not cover,
//! so quinn streams only end with their connection. Datagrams are reported
//! `Acknowledged` once the connection accepts them for sending, since quinn
//! does not surface datagram acknowledgements.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use parking_lot::Mutex;
use quinn::{ConnectionError, VarInt};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::address::AddressValue;
use crate::callbacks::{
    DatagramId, DatagramStatus, HandshakeInfo, SessionSubscriptions, StreamSubscriptions,
    VersionNegotiation,
};
use crate::config::{CongestionControl, EndpointOptions, SessionOptions};
use crate::dispatch::EventSink;
use crate::errors::{CloseContext, ErrorType, QuicError, TransportError};
use crate::native::{
    EndpointOwner, NativeEndpoint, NativeSession, NativeStream, SessionOwner, StreamOwner,
    Transport, TransportEvent,
};
use crate::stats::{EndpointState, EndpointStats, SessionState, SessionStats, StreamState, StreamStats};
use crate::stream::{Direction, PriorityFlags, StreamPriority};

const DEFAULT_SERVER_NAME: &str = "localhost";

fn tls_error(err: impl std::fmt::Display) -> QuicError {
    QuicError::invalid_value("tls", err.to_string())
}

fn varint(code: u64) -> VarInt {
    VarInt::from_u64(code).unwrap_or(VarInt::MAX)
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn transport_config(endpoint: &EndpointOptions, session: &SessionOptions) -> quinn::TransportConfig {
    let params = &session.transport_params;
    let mut config = quinn::TransportConfig::default();
    config.max_concurrent_bidi_streams(varint(params.initial_max_streams_bidi));
    config.max_concurrent_uni_streams(varint(params.initial_max_streams_uni));
    config.receive_window(varint(params.initial_max_data));
    config.stream_receive_window(varint(params.initial_max_stream_data_bidi_remote));
    config.max_idle_timeout(quinn::IdleTimeout::try_from(params.max_idle_timeout).ok());
    config.datagram_receive_buffer_size(
        (params.max_datagram_frame_size > 0).then_some(params.max_datagram_frame_size as usize),
    );
    match endpoint.cc_algorithm {
        CongestionControl::Cubic => {
            config.congestion_controller_factory(Arc::new(quinn::congestion::CubicConfig::default()))
        }
        CongestionControl::Reno => {
            config.congestion_controller_factory(Arc::new(quinn::congestion::NewRenoConfig::default()))
        }
        CongestionControl::Bbr | CongestionControl::Bbr2 => {
            config.congestion_controller_factory(Arc::new(quinn::congestion::BbrConfig::default()))
        }
    };
    config
}

fn server_config(endpoint: &EndpointOptions, options: &SessionOptions) -> Result<quinn::ServerConfig, QuicError> {
    let tls = &options.tls;
    let (certs, key) = match (tls.certs.as_slice(), tls.keys.as_slice()) {
        ([], []) => {
            let generated = rcgen::generate_simple_self_signed(vec![DEFAULT_SERVER_NAME.to_string()])
                .map_err(tls_error)?;
            let cert = CertificateDer::from(generated.cert.der().to_vec());
            let key = PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der());
            (vec![cert], PrivateKeyDer::Pkcs8(key))
        }
        (certs, [key, ..]) if !certs.is_empty() => (
            certs.iter().cloned().map(CertificateDer::from).collect(),
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.clone())),
        ),
        _ => {
            return Err(QuicError::invalid_argument(
                "tls",
                "certs and keys must be supplied together",
            ))
        }
    };

    let mut crypto = rustls::ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(tls_error)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(tls_error)?;
    crypto.alpn_protocols = vec![tls.alpn.as_bytes().to_vec()];
    crypto.max_early_data_size = u32::MAX;

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(crypto).map_err(tls_error)?;
    let mut config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    config.transport_config(Arc::new(transport_config(endpoint, options)));
    config.retry_token_lifetime(endpoint.retry_token_expiration);
    Ok(config)
}

fn client_config(endpoint: &EndpointOptions, options: &SessionOptions) -> Result<quinn::ClientConfig, QuicError> {
    let tls = &options.tls;
    let builder = rustls::ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(tls_error)?;
    let mut crypto = if tls.reject_unauthorized {
        let mut roots = rustls::RootCertStore::empty();
        for ca in tls.ca.as_slice() {
            roots.add(CertificateDer::from(ca.clone())).map_err(tls_error)?;
        }
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider())))
            .with_no_client_auth()
    };
    crypto.alpn_protocols = vec![tls.alpn.as_bytes().to_vec()];
    crypto.enable_early_data = options.session_ticket.is_some();

    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto).map_err(tls_error)?;
    let mut config = quinn::ClientConfig::new(Arc::new(crypto));
    config.transport_config(Arc::new(transport_config(endpoint, options)));
    Ok(config)
}

// Used when `reject_unauthorized` is off.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Maps how a quinn connection ended onto the session close event.
fn close_event(owner: SessionOwner, error: ConnectionError) -> TransportEvent {
    let error = match error {
        ConnectionError::LocallyClosed => return TransportEvent::SessionClose(owner),
        ConnectionError::ApplicationClosed(close) if close.error_code.into_inner() == 0 => {
            return TransportEvent::SessionClose(owner)
        }
        ConnectionError::ApplicationClosed(close) => TransportError::from_wire(
            ErrorType::Application,
            close.error_code.into_inner(),
            Some(String::from_utf8_lossy(&close.reason).into_owned()),
        ),
        ConnectionError::ConnectionClosed(close) => TransportError::from_wire(
            ErrorType::Transport,
            u64::from(close.error_code),
            Some(String::from_utf8_lossy(&close.reason).into_owned()),
        ),
        ConnectionError::TimedOut => TransportError::from_wire(ErrorType::IdleClose, 0, None),
        ConnectionError::VersionMismatch => {
            TransportError::from_wire(ErrorType::VersionNegotiation, 0, None)
        }
        other => TransportError::from_wire(ErrorType::Transport, 0x1, Some(other.to_string())),
    };
    TransportEvent::SessionError { owner, error }
}

/// Creates quinn-backed endpoints on the current tokio runtime.
///
/// A graceful session close sends CONNECTION_CLOSE right away instead of
/// waiting for open streams, since streams here carry no data of their own.
pub struct QuinnTransport {
    sink: EventSink,
    runtime: Handle,
}

impl QuinnTransport {
    pub fn new(sink: EventSink) -> Result<Self, QuicError> {
        let runtime = Handle::try_current()
            .map_err(|_| QuicError::invalid_state("the quinn engine needs a tokio runtime"))?;
        Ok(Self { sink, runtime })
    }
}

impl Transport for QuinnTransport {
    fn bind(
        &self,
        options: &EndpointOptions,
        owner: EndpointOwner,
    ) -> Result<Box<dyn NativeEndpoint>, QuicError> {
        let address = options
            .address
            .map(SocketAddr::from)
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
        let _runtime = self.runtime.enter();
        let endpoint = quinn::Endpoint::client(address).map_err(|err| QuicError::EndpointClosed {
            context: CloseContext::BindFailure,
            code: err.raw_os_error().unwrap_or(-1),
        })?;
        debug!(%address, "quinn endpoint bound");
        Ok(Box::new(QuinnEndpoint {
            context: Arc::new(EndpointContext {
                owner,
                sink: self.sink.clone(),
                runtime: self.runtime.clone(),
                options: options.clone(),
                state: Mutex::new(EndpointState {
                    bound: true,
                    referenced: true,
                    ..Default::default()
                }),
                stats: Mutex::new(EndpointStats::default()),
            }),
            endpoint,
        }))
    }
}

struct EndpointContext {
    owner: EndpointOwner,
    sink: EventSink,
    runtime: Handle,
    options: EndpointOptions,
    state: Mutex<EndpointState>,
    stats: Mutex<EndpointStats>,
}

struct QuinnEndpoint {
    context: Arc<EndpointContext>,
    endpoint: quinn::Endpoint,
}

async fn accept_loop(endpoint: quinn::Endpoint, context: Arc<EndpointContext>) {
    while let Some(incoming) = endpoint.accept().await {
        let refuse = {
            let state = context.state.lock();
            state.busy || state.closing
        };
        if refuse {
            context.stats.lock().server_busy_count += 1;
            incoming.refuse();
            continue;
        }
        let context = context.clone();
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            let connection = match incoming.await {
                Ok(connection) => connection,
                Err(err) => {
                    debug!(error = %err, "inbound handshake failed");
                    return;
                }
            };
            context.stats.lock().server_sessions += 1;
            let session = SessionContext::new(context.sink.clone(), SessionOwner::new(), Some(connection.clone()));
            let local = inbound_local_address(connection.local_ip(), endpoint.local_addr().ok());
            let native = QuinnSession::new(session.clone(), &connection, local);
            context.sink.emit(TransportEvent::SessionNew {
                owner: context.owner.clone(),
                session: Box::new(native),
            });
            session.established(&connection);
            session.drive(connection).await;
        });
    }
}

impl NativeEndpoint for QuinnEndpoint {
    fn local_address(&self) -> Option<AddressValue> {
        self.endpoint.local_addr().ok().map(AddressValue::from)
    }

    fn listen(&mut self, options: &SessionOptions) -> Result<(), QuicError> {
        let config = server_config(&self.context.options, options)?;
        self.endpoint.set_server_config(Some(config));
        self.context.state.lock().listening = true;
        self.context
            .runtime
            .spawn(accept_loop(self.endpoint.clone(), self.context.clone()));
        Ok(())
    }

    fn connect(
        &mut self,
        remote: AddressValue,
        options: &SessionOptions,
        owner: SessionOwner,
    ) -> Option<Box<dyn NativeSession>> {
        if self.context.state.lock().closing {
            return None;
        }
        let config = match client_config(&self.context.options, options) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "unable to build client configuration");
                return None;
            }
        };
        let server_name = options.tls.sni.as_deref().unwrap_or(DEFAULT_SERVER_NAME);
        let connecting = self
            .endpoint
            .connect_with(config, remote.socket_addr(), server_name)
            .map_err(|err| debug!(error = %err, %remote, "quinn refused to connect"))
            .ok()?;
        self.context.stats.lock().client_sessions += 1;

        let session = SessionContext::new(self.context.sink.clone(), owner, None);
        let native = QuinnSession::pending(session.clone(), remote, self.local_address());
        self.context.runtime.spawn(async move {
            match connecting.await {
                Ok(connection) => {
                    {
                        let mut slot = session.connection.lock();
                        if session.destroyed.is_cancelled() {
                            debug!(%remote, "session destroyed during the handshake");
                            connection.close(VarInt::from_u32(0), b"destroyed");
                            return;
                        }
                        *slot = Some(connection.clone());
                    }
                    session.established(&connection);
                    session.drive(connection).await;
                }
                Err(_) if session.destroyed.is_cancelled() => {}
                Err(err) => {
                    session.sink.emit(close_event(session.owner.clone(), err));
                }
            }
        });
        Some(Box::new(native))
    }

    fn mark_busy(&mut self, busy: bool) {
        self.context.state.lock().busy = busy;
    }

    fn close_gracefully(&mut self) {
        {
            let mut state = self.context.state.lock();
            if state.closing {
                return;
            }
            state.closing = true;
            state.listening = false;
        }
        self.endpoint.set_server_config(None);
        let endpoint = self.endpoint.clone();
        let context = self.context.clone();
        self.context.runtime.spawn(async move {
            endpoint.wait_idle().await;
            context.state.lock().bound = false;
            context.sink.emit(TransportEvent::EndpointDone(context.owner.clone()));
        });
    }

    fn set_ref(&mut self, referenced: bool) {
        self.context.state.lock().referenced = referenced;
    }

    fn stats(&self) -> EndpointStats {
        *self.context.stats.lock()
    }

    fn state(&self) -> EndpointState {
        *self.context.state.lock()
    }
}

struct SessionContext {
    sink: EventSink,
    owner: SessionOwner,
    connection: Mutex<Option<quinn::Connection>>,
    destroyed: CancellationToken,
    subscriptions: Mutex<SessionSubscriptions>,
    handshake_completed: Mutex<bool>,
    next_datagram: AtomicU64,
}

impl SessionContext {
    fn new(sink: EventSink, owner: SessionOwner, connection: Option<quinn::Connection>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            owner,
            connection: Mutex::new(connection),
            destroyed: CancellationToken::new(),
            subscriptions: Mutex::new(SessionSubscriptions::default()),
            handshake_completed: Mutex::new(false),
            next_datagram: AtomicU64::new(1),
        })
    }

    fn established(&self, connection: &quinn::Connection) {
        *self.handshake_completed.lock() = true;
        let data = connection
            .handshake_data()
            .and_then(|data| data.downcast::<quinn::crypto::rustls::HandshakeData>().ok());
        let info = HandshakeInfo {
            servername: data
                .as_ref()
                .and_then(|data| data.server_name.clone())
                .unwrap_or_default(),
            protocol: data
                .as_ref()
                .and_then(|data| data.protocol.clone())
                .map(|protocol| String::from_utf8_lossy(&protocol).into_owned())
                .unwrap_or_default(),
            cipher: String::new(),
            cipher_version: "TLSv1.3".into(),
            validation_error: None,
            early_data: false,
        };
        self.sink.emit(TransportEvent::SessionHandshake {
            owner: self.owner.clone(),
            info,
        });
    }

    fn inbound_stream(&self, stream: QuinnStream) {
        self.sink.emit(TransportEvent::StreamCreated {
            owner: self.owner.clone(),
            stream: Box::new(stream),
        });
    }

    async fn drive(self: Arc<Self>, connection: quinn::Connection) {
        let ended = loop {
            tokio::select! {
                bi = connection.accept_bi() => match bi {
                    Ok((send, recv)) => self.inbound_stream(QuinnStream::new(Direction::Bidi, Some(send), Some(recv))),
                    Err(err) => break err,
                },
                uni = connection.accept_uni() => match uni {
                    Ok(recv) => self.inbound_stream(QuinnStream::new(Direction::Uni, None, Some(recv))),
                    Err(err) => break err,
                },
                datagram = connection.read_datagram() => match datagram {
                    Ok(payload) => {
                        if self.subscriptions.lock().datagram {
                            self.sink.emit(TransportEvent::SessionDatagram {
                                owner: self.owner.clone(),
                                payload,
                                early: false,
                            });
                        }
                    }
                    Err(err) => break err,
                },
            }
        };
        debug!(reason = %ended, "quinn connection ended");
        if matches!(ended, ConnectionError::VersionMismatch) && self.subscriptions.lock().version_negotiation {
            self.sink.emit(TransportEvent::SessionVersionNegotiation {
                owner: self.owner.clone(),
                info: VersionNegotiation {
                    current: 1,
                    requested: 1,
                    supported: Vec::new(),
                },
            });
        }
        self.sink.emit(close_event(self.owner.clone(), ended));
    }
}

/// The address an inbound connection arrived on: the packet's destination IP
/// where the platform reports it, and the listener's port.
fn inbound_local_address(ip: Option<IpAddr>, bound: Option<SocketAddr>) -> Option<AddressValue> {
    match (ip, bound) {
        (Some(ip), Some(bound)) => Some(SocketAddr::new(ip, bound.port()).into()),
        (None, bound) => bound.map(AddressValue::from),
        (Some(ip), None) => Some(SocketAddr::new(ip, 0).into()),
    }
}

struct QuinnSession {
    context: Arc<SessionContext>,
    remote: AddressValue,
    local: Option<AddressValue>,
    stats: SessionStats,
    destroyed: bool,
}

impl QuinnSession {
    fn new(context: Arc<SessionContext>, connection: &quinn::Connection, local: Option<AddressValue>) -> Self {
        Self {
            context,
            remote: connection.remote_address().into(),
            local,
            stats: SessionStats::default(),
            destroyed: false,
        }
    }

    fn pending(context: Arc<SessionContext>, remote: AddressValue, local: Option<AddressValue>) -> Self {
        Self {
            context,
            remote,
            local,
            stats: SessionStats::default(),
            destroyed: false,
        }
    }

    fn connection(&self) -> Option<quinn::Connection> {
        self.context.connection.lock().clone()
    }
}

impl NativeSession for QuinnSession {
    fn owner(&self) -> &SessionOwner {
        &self.context.owner
    }

    fn local_address(&self) -> Option<AddressValue> {
        self.local
    }

    fn remote_address(&self) -> Option<AddressValue> {
        Some(self.remote)
    }

    fn subscribe(&mut self, subscriptions: SessionSubscriptions) {
        *self.context.subscriptions.lock() = subscriptions;
    }

    fn open_stream(
        &mut self,
        direction: Direction,
        subscriptions: StreamSubscriptions,
        owner: StreamOwner,
    ) -> Option<Box<dyn NativeStream>> {
        let connection = self.connection()?;
        // Opening only completes immediately while the peer grants stream credit.
        let mut stream = match direction {
            Direction::Bidi => {
                let (send, recv) = connection.open_bi().now_or_never()?.ok()?;
                QuinnStream::new(direction, Some(send), Some(recv))
            }
            Direction::Uni => {
                let send = connection.open_uni().now_or_never()?.ok()?;
                QuinnStream::new(direction, Some(send), None)
            }
        };
        stream.owner = owner;
        stream.subscribe(subscriptions);
        self.stats.outbound_streams_count += 1;
        Some(Box::new(stream))
    }

    fn send_datagram(&mut self, payload: Bytes) -> DatagramId {
        let id = self.context.next_datagram.fetch_add(1, Ordering::Relaxed);
        let status = match self.connection() {
            Some(connection) if !self.destroyed => match connection.send_datagram(payload) {
                Ok(()) => DatagramStatus::Acknowledged,
                Err(err) => {
                    debug!(id, error = %err, "datagram not sent");
                    DatagramStatus::Lost
                }
            },
            _ => DatagramStatus::Lost,
        };
        self.stats.datagrams_sent += 1;
        if self.context.subscriptions.lock().datagram {
            self.context.sink.emit(TransportEvent::SessionDatagramStatus {
                owner: self.context.owner.clone(),
                id,
                status,
            });
        }
        id
    }

    fn update_key(&mut self) -> Result<(), QuicError> {
        match self.connection() {
            Some(connection) => {
                connection.force_key_update();
                self.stats.key_update_count += 1;
                Ok(())
            }
            None => Err(QuicError::invalid_state("the handshake has not completed")),
        }
    }

    fn graceful_close(&mut self) {
        if let Some(connection) = self.connection() {
            connection.close(VarInt::from_u32(0), b"");
        }
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        let connection = {
            // Cancelled under the slot lock so a handshake finishing now sees it.
            let mut slot = self.context.connection.lock();
            self.context.destroyed.cancel();
            slot.take()
        };
        if let Some(connection) = connection {
            connection.close(VarInt::from_u32(0), b"destroyed");
        }
    }

    fn stats(&self) -> SessionStats {
        let mut stats = self.stats;
        if let Some(connection) = self.connection() {
            let live = connection.stats();
            stats.bytes_sent = live.udp_tx.bytes;
            stats.bytes_received = live.udp_rx.bytes;
            stats.cwnd = live.path.cwnd;
            stats.smoothed_rtt = live.path.rtt.as_nanos() as u64;
            stats.retransmit_count = live.path.lost_packets;
        }
        stats
    }

    fn state(&self) -> SessionState {
        let open = self.connection().map(|c| c.close_reason().is_none()).unwrap_or(false);
        let handshake_completed = *self.context.handshake_completed.lock();
        SessionState {
            handshake_completed,
            handshake_confirmed: handshake_completed,
            stream_open_allowed: open && handshake_completed,
            priority_supported: true,
            closing: !open && handshake_completed,
            destroyed: self.destroyed,
            subscriptions: *self.context.subscriptions.lock(),
            ..Default::default()
        }
    }
}

struct QuinnStream {
    owner: StreamOwner,
    id: u64,
    direction: Direction,
    send: Option<quinn::SendStream>,
    recv: Option<quinn::RecvStream>,
    priority: StreamPriority,
    state: StreamState,
}

impl QuinnStream {
    fn new(direction: Direction, send: Option<quinn::SendStream>, recv: Option<quinn::RecvStream>) -> Self {
        let id = send
            .as_ref()
            .map(|s| s.id())
            .or_else(|| recv.as_ref().map(|r| r.id()))
            .map(|id| VarInt::from(id).into_inner())
            .unwrap_or_default();
        Self {
            owner: StreamOwner::new(),
            id,
            direction,
            send,
            recv,
            priority: StreamPriority::Default,
            state: StreamState::default(),
        }
    }
}

impl NativeStream for QuinnStream {
    fn owner(&self) -> &StreamOwner {
        &self.owner
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn subscribe(&mut self, subscriptions: StreamSubscriptions) {
        self.state.subscriptions = subscriptions;
    }

    fn reset(&mut self, code: u64) {
        if let Some(send) = self.send.as_mut() {
            let _ = send.reset(varint(code));
            self.state.reset = true;
            self.state.write_ended = true;
        }
    }

    fn stop_sending(&mut self, code: u64) {
        if let Some(recv) = self.recv.as_mut() {
            let _ = recv.stop(varint(code));
            self.state.read_ended = true;
        }
    }

    fn set_priority(&mut self, priority: StreamPriority, _flags: PriorityFlags) {
        let urgency = match priority {
            StreamPriority::High => 1,
            StreamPriority::Default => 0,
            StreamPriority::Low => -1,
        };
        if let Some(send) = self.send.as_ref() {
            if send.set_priority(urgency).is_ok() {
                self.priority = priority;
            }
        }
    }

    fn priority(&self) -> StreamPriority {
        self.priority
    }

    fn destroy(&mut self) {
        if let Some(mut send) = self.send.take() {
            let _ = send.finish();
        }
        self.recv.take();
        self.state.destroyed = true;
    }

    fn stats(&self) -> StreamStats {
        StreamStats::default()
    }

    fn state(&self) -> StreamState {
        self.state
    }
}
