//! An in-memory transport engine.
//!
//! Endpoints bound through a [`LoopbackNetwork`] share one address table and
//! talk to each other without sockets. Every transport event is queued and
//! only delivered by [`LoopbackNetwork::run_until_idle`], so tests decide
//! exactly when callbacks run. Stream data is not modelled; the wire hooks
//! (`finish_stream`, `reset_stream`, ...) stand in for peer activity.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::address::AddressValue;
use crate::callbacks::{
    DatagramId, DatagramStatus, HandshakeInfo, Headers, HeadersKind, PathValidation,
    PathValidationResult, SessionSubscriptions, SessionTicket, StreamSubscriptions,
    VersionNegotiation,
};
use crate::config::{EndpointOptions, SessionOptions, Side};
use crate::dispatch::{self, Dispatcher, EventSink};
use crate::errors::{CloseContext, ErrorType, QuicError, TransportError};
use crate::native::{
    EndpointOwner, NativeEndpoint, NativeSession, NativeStream, SessionOwner, StreamOwner,
    Transport, TransportEvent,
};
use crate::session::Session;
use crate::stats::{
    EndpointState, EndpointStats, SessionState, SessionStats, StreamState, StreamStats, Timestamp,
};
use crate::stream::{Direction, PriorityFlags, Stream, StreamPriority};

const FIRST_PORT: u16 = 40_000;
const EADDRINUSE: i32 = -98;
const EADDRNOTAVAIL: i32 = -99;
const CONNECTION_REFUSED: u64 = 0x2;
const INTERNAL_ERROR: u64 = 0x1;
const NO_APPLICATION_PROTOCOL: u64 = 0x178;
const TLS_CIPHER: &str = "TLS_AES_128_GCM_SHA256";
const TLS_VERSION: &str = "TLSv1.3";

/// Identifies a session by the addresses of its local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub local: AddressValue,
    pub remote: AddressValue,
}

impl SessionKey {
    pub fn of(session: &Session) -> Option<Self> {
        Some(Self {
            local: session.endpoint()?.address()?,
            remote: session.remote_address()?,
        })
    }
}

/// Identifies a stream by its session and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub session: SessionKey,
    pub id: u64,
}

impl StreamKey {
    pub fn of(stream: &Stream) -> Option<Self> {
        Some(Self {
            session: SessionKey::of(&stream.session()?)?,
            id: stream.id(),
        })
    }
}

struct EndpointRecord {
    owner: EndpointOwner,
    address: AddressValue,
    options: EndpointOptions,
    listen: Option<SessionOptions>,
    busy: bool,
    closing: bool,
    closed: bool,
    referenced: bool,
    sessions: Vec<usize>,
    loss: f64,
    stats: EndpointStats,
}

struct SessionRecord {
    owner: SessionOwner,
    endpoint: usize,
    side: Side,
    peer: Option<usize>,
    local: AddressValue,
    remote: AddressValue,
    options: SessionOptions,
    subscriptions: SessionSubscriptions,
    handshake_completed: bool,
    graceful: bool,
    closed: bool,
    streams: Vec<usize>,
    opened: [u64; 2],
    stats: SessionStats,
}

struct StreamRecord {
    owner: StreamOwner,
    session: usize,
    peer: usize,
    id: u64,
    direction: Direction,
    subscriptions: StreamSubscriptions,
    priority: StreamPriority,
    closed: bool,
    stats: StreamStats,
    state: StreamState,
}

fn slot(direction: Direction) -> usize {
    match direction {
        Direction::Bidi => 0,
        Direction::Uni => 1,
    }
}

fn stream_id(sequence: u64, direction: Direction, side: Side) -> u64 {
    let initiator = match side {
        Side::Client => 0,
        Side::Server => 1,
    };
    (sequence << 2) | ((slot(direction) as u64) << 1) | initiator
}

enum Refusal {
    Unreachable,
    Refused,
    AlpnMismatch,
}

/// What the owner of a closed session record hears about it.
enum Report {
    Silent,
    Close,
    Error(TransportError),
}

struct Net {
    sink: EventSink,
    clock: Timestamp,
    next_port: u16,
    next_datagram: DatagramId,
    bound: HashMap<SocketAddr, usize>,
    endpoints: Vec<EndpointRecord>,
    sessions: Vec<SessionRecord>,
    streams: Vec<StreamRecord>,
}

impl Net {
    fn tick(&mut self) -> Timestamp {
        self.clock += 1_000;
        self.clock
    }

    fn emit(&self, event: TransportEvent) {
        trace!(event = event.name(), "loopback event queued");
        self.sink.emit(event);
    }

    /// Next free port on `host`, or None once every port from `FIRST_PORT` up is taken.
    fn allocate(&mut self, host: IpAddr) -> Option<AddressValue> {
        for _ in FIRST_PORT..=u16::MAX {
            let candidate = SocketAddr::new(host, self.next_port);
            self.next_port = self.next_port.wrapping_add(1).max(FIRST_PORT);
            if !self.bound.contains_key(&candidate) {
                return Some(candidate.into());
            }
        }
        None
    }

    fn find_session(&self, key: SessionKey) -> Option<usize> {
        self.sessions
            .iter()
            .position(|s| !s.closed && s.local == key.local && s.remote == key.remote)
    }

    fn find_stream(&self, key: StreamKey) -> Option<usize> {
        let session = self.find_session(key.session)?;
        self.sessions[session]
            .streams
            .iter()
            .copied()
            .find(|&s| self.streams[s].id == key.id)
    }

    fn accepting(&self, remote: AddressValue, from: AddressValue, alpn: &str) -> Result<usize, Refusal> {
        let server = *self.bound.get(&remote.socket_addr()).ok_or(Refusal::Unreachable)?;
        let ep = &self.endpoints[server];
        let listen = match &ep.listen {
            Some(listen) if !ep.closed && !ep.closing => listen,
            _ => return Err(Refusal::Unreachable),
        };
        if ep.busy || ep.sessions.len() as u64 >= ep.options.max_connections_total {
            return Err(Refusal::Refused);
        }
        let from_host = ep
            .sessions
            .iter()
            .filter(|&&s| self.sessions[s].remote.host() == from.host())
            .count() as u64;
        if from_host >= ep.options.max_connections_per_host {
            return Err(Refusal::Refused);
        }
        if listen.tls.alpn != alpn {
            return Err(Refusal::AlpnMismatch);
        }
        Ok(server)
    }

    fn new_session(
        &mut self,
        owner: SessionOwner,
        endpoint: usize,
        side: Side,
        local: AddressValue,
        remote: AddressValue,
        options: SessionOptions,
    ) -> usize {
        let now = self.tick();
        let index = self.sessions.len();
        self.sessions.push(SessionRecord {
            owner,
            endpoint,
            side,
            peer: None,
            local,
            remote,
            options,
            subscriptions: SessionSubscriptions::default(),
            handshake_completed: false,
            graceful: false,
            closed: false,
            streams: Vec::new(),
            opened: [0; 2],
            stats: SessionStats {
                created_at: now,
                ..Default::default()
            },
        });
        let ep = &mut self.endpoints[endpoint];
        ep.sessions.push(index);
        match side {
            Side::Client => ep.stats.client_sessions += 1,
            Side::Server => ep.stats.server_sessions += 1,
        }
        index
    }

    /// Creates the client record and, when the remote accepts, the server
    /// record. A refused client is failed through its own event.
    fn open_session(
        &mut self,
        endpoint: usize,
        remote: AddressValue,
        options: &SessionOptions,
        owner: SessionOwner,
    ) -> Option<(usize, Option<usize>)> {
        let ep = &self.endpoints[endpoint];
        if ep.closed || ep.closing || ep.sessions.len() as u64 >= ep.options.max_connections_total {
            return None;
        }
        let local = ep.address;
        let client = self.new_session(owner, endpoint, Side::Client, local, remote, options.clone());

        match self.accepting(remote, local, &options.tls.alpn) {
            Ok(server_endpoint) => {
                let server_options = self.endpoints[server_endpoint]
                    .listen
                    .clone()
                    .unwrap_or_default();
                let server = self.new_session(
                    SessionOwner::new(),
                    server_endpoint,
                    Side::Server,
                    remote,
                    local,
                    server_options,
                );
                self.sessions[client].peer = Some(server);
                self.sessions[server].peer = Some(client);
                Some((client, Some(server)))
            }
            Err(refusal) => {
                let error = match refusal {
                    Refusal::Unreachable => TransportError::from_wire(
                        ErrorType::IdleClose,
                        0,
                        Some(format!("no listener at {remote}")),
                    ),
                    Refusal::Refused => {
                        if let Some(&server) = self.bound.get(&remote.socket_addr()) {
                            self.endpoints[server].stats.server_busy_count += 1;
                        }
                        TransportError::transport(CONNECTION_REFUSED)
                    }
                    Refusal::AlpnMismatch => TransportError::from_wire(
                        ErrorType::Transport,
                        NO_APPLICATION_PROTOCOL,
                        Some("no application protocol".into()),
                    ),
                };
                debug!(%remote, %error, "loopback connect refused");
                self.close_session(client, Report::Error(error));
                Some((client, None))
            }
        }
    }

    fn complete_handshake(&mut self, session: usize) {
        let now = self.tick();
        let rec = &mut self.sessions[session];
        rec.handshake_completed = true;
        rec.stats.handshake_completed_at = now;
        rec.stats.handshake_confirmed_at = now;
        let info = HandshakeInfo {
            servername: rec
                .options
                .tls
                .sni
                .clone()
                .unwrap_or_else(|| rec.remote.host().to_string()),
            protocol: rec.options.tls.alpn.clone(),
            cipher: TLS_CIPHER.into(),
            cipher_version: TLS_VERSION.into(),
            validation_error: None,
            early_data: rec.options.session_ticket.is_some(),
        };
        let owner = rec.owner.clone();
        self.emit(TransportEvent::SessionHandshake { owner, info });
    }

    /// Closes a session record, reports it to the owner and then lets a
    /// closing endpoint finish.
    fn close_session(&mut self, session: usize, report: Report) {
        if self.sessions[session].closed {
            return;
        }
        let now = self.tick();
        let rec = &mut self.sessions[session];
        rec.closed = true;
        rec.stats.closing_at = now;
        rec.stats.destroyed_at = now;
        let streams = std::mem::take(&mut rec.streams);
        let endpoint = rec.endpoint;
        for stream in streams {
            self.close_stream(stream);
        }
        self.endpoints[endpoint].sessions.retain(|&s| s != session);
        let owner = self.sessions[session].owner.clone();
        match report {
            Report::Silent => {}
            Report::Close => self.emit(TransportEvent::SessionClose(owner)),
            Report::Error(error) => self.emit(TransportEvent::SessionError { owner, error }),
        }
        self.maybe_finish_endpoint(endpoint);
    }

    fn close_peer(&mut self, session: usize) {
        if let Some(peer) = self.sessions[session].peer {
            self.close_session(peer, Report::Close);
        }
    }

    fn close_session_pair(&mut self, session: usize) {
        self.close_session(session, Report::Close);
        self.close_peer(session);
    }

    fn try_finish_graceful(&mut self, session: usize) {
        let rec = &self.sessions[session];
        if rec.graceful && !rec.closed && rec.streams.is_empty() {
            debug!(local = %rec.local, remote = %rec.remote, "loopback session drained");
            self.close_session_pair(session);
        }
    }

    fn maybe_finish_endpoint(&mut self, endpoint: usize) {
        let now = self.tick();
        let ep = &mut self.endpoints[endpoint];
        if ep.closing && !ep.closed && ep.sessions.is_empty() {
            ep.closed = true;
            ep.stats.destroyed_at = now;
            let address = ep.address.socket_addr();
            let owner = ep.owner.clone();
            self.bound.remove(&address);
            self.emit(TransportEvent::EndpointDone(owner));
        }
    }

    fn open_stream(
        &mut self,
        session: usize,
        direction: Direction,
        subscriptions: StreamSubscriptions,
        owner: StreamOwner,
    ) -> Option<(usize, usize)> {
        let rec = &self.sessions[session];
        if rec.closed || rec.graceful || !rec.handshake_completed {
            return None;
        }
        let peer = rec.peer?;
        let peer_rec = &self.sessions[peer];
        if peer_rec.closed {
            return None;
        }
        let limit = match direction {
            Direction::Bidi => peer_rec.options.transport_params.initial_max_streams_bidi,
            Direction::Uni => peer_rec.options.transport_params.initial_max_streams_uni,
        };
        let sequence = rec.opened[slot(direction)];
        if sequence >= limit {
            trace!(?direction, limit, "loopback stream limit reached");
            return None;
        }
        let id = stream_id(sequence, direction, rec.side);
        let now = self.tick();

        let local = self.streams.len();
        let remote = local + 1;
        for (index, owner, parent, peer_index, subscriptions) in [
            (local, owner, session, remote, subscriptions),
            (remote, StreamOwner::new(), peer, local, StreamSubscriptions::default()),
        ] {
            debug_assert_eq!(index, self.streams.len());
            self.streams.push(StreamRecord {
                owner,
                session: parent,
                peer: peer_index,
                id,
                direction,
                subscriptions,
                priority: StreamPriority::Default,
                closed: false,
                stats: StreamStats {
                    created_at: now,
                    ..Default::default()
                },
                state: StreamState {
                    subscriptions,
                    ..Default::default()
                },
            });
            self.sessions[parent].streams.push(index);
        }

        let rec = &mut self.sessions[session];
        rec.opened[slot(direction)] += 1;
        rec.stats.outbound_streams_count += 1;
        match direction {
            Direction::Bidi => rec.stats.bidi_stream_count += 1,
            Direction::Uni => rec.stats.uni_stream_count += 1,
        }
        let peer_rec = &mut self.sessions[peer];
        peer_rec.stats.inbound_streams_count += 1;
        match direction {
            Direction::Bidi => peer_rec.stats.bidi_stream_count += 1,
            Direction::Uni => peer_rec.stats.uni_stream_count += 1,
        }
        Some((local, remote))
    }

    fn close_stream(&mut self, stream: usize) {
        if self.streams[stream].closed {
            return;
        }
        let now = self.tick();
        let rec = &mut self.streams[stream];
        rec.closed = true;
        rec.state.destroyed = true;
        rec.stats.closing_at = now;
        rec.stats.destroyed_at = now;
        let session = rec.session;
        self.sessions[session].streams.retain(|&s| s != stream);
    }

    /// Ends a stream on both sides, then lets draining sessions finish.
    fn end_stream_pair(&mut self, stream: usize, event: impl Fn(StreamOwner) -> TransportEvent) {
        let peer = self.streams[stream].peer;
        let mut sessions = Vec::with_capacity(2);
        for index in [stream, peer] {
            if !self.streams[index].closed {
                self.close_stream(index);
                let rec = &self.streams[index];
                sessions.push(rec.session);
                self.emit(event(rec.owner.clone()));
            }
        }
        for session in sessions {
            self.try_finish_graceful(session);
        }
    }

    fn send_datagram(&mut self, session: usize, payload: Bytes) -> DatagramId {
        let id = self.next_datagram;
        self.next_datagram += 1;
        let len = payload.len() as u64;

        let rec = &self.sessions[session];
        let peer = rec.peer.filter(|&peer| {
            !rec.closed
                && !self.sessions[peer].closed
                && len <= self.sessions[peer].options.transport_params.max_datagram_frame_size
        });
        let endpoint = rec.endpoint;
        let ep = &mut self.endpoints[endpoint];
        ep.loss += ep.options.tx_loss;
        let dropped = ep.loss >= 1.0;
        if dropped {
            ep.loss -= 1.0;
        }
        ep.stats.packets_sent += 1;
        ep.stats.bytes_sent += len;

        let status = match peer {
            Some(peer) if !dropped => {
                let peer_rec = &mut self.sessions[peer];
                peer_rec.stats.datagrams_received += 1;
                peer_rec.stats.bytes_received += len;
                if peer_rec.subscriptions.datagram {
                    let owner = peer_rec.owner.clone();
                    self.emit(TransportEvent::SessionDatagram {
                        owner,
                        payload,
                        early: false,
                    });
                }
                DatagramStatus::Acknowledged
            }
            _ => DatagramStatus::Lost,
        };

        let rec = &mut self.sessions[session];
        rec.stats.datagrams_sent += 1;
        rec.stats.bytes_sent += len;
        match status {
            DatagramStatus::Acknowledged => rec.stats.datagrams_acknowledged += 1,
            DatagramStatus::Lost => rec.stats.datagrams_lost += 1,
        }
        if rec.subscriptions.datagram {
            let owner = rec.owner.clone();
            self.emit(TransportEvent::SessionDatagramStatus { owner, id, status });
        }
        id
    }
}

/// A shared in-memory network. Clones refer to the same network.
#[derive(Clone)]
pub struct LoopbackNetwork {
    net: Arc<Mutex<Net>>,
    dispatcher: Arc<Mutex<Dispatcher>>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        let (sink, dispatcher) = dispatch::channel();
        Self {
            net: Arc::new(Mutex::new(Net {
                sink,
                clock: 0,
                next_port: FIRST_PORT,
                next_datagram: 1,
                bound: HashMap::new(),
                endpoints: Vec::new(),
                sessions: Vec::new(),
                streams: Vec::new(),
            })),
            dispatcher: Arc::new(Mutex::new(dispatcher)),
        }
    }

    /// Delivers queued events until none are left. Must not be called from
    /// inside a callback.
    pub fn run_until_idle(&self) -> usize {
        self.dispatcher.lock().drain()
    }

    /// The peer closes the stream cleanly.
    pub fn finish_stream(&self, key: StreamKey) -> bool {
        let mut net = self.net.lock();
        match net.find_stream(key) {
            Some(stream) => {
                net.end_stream_pair(stream, TransportEvent::StreamClose);
                true
            }
            None => false,
        }
    }

    /// The stream fails on both sides with an application error code.
    pub fn fail_stream(&self, key: StreamKey, code: u64) -> bool {
        let mut net = self.net.lock();
        match net.find_stream(key) {
            Some(stream) => {
                net.end_stream_pair(stream, |owner| TransportEvent::StreamError {
                    owner,
                    error: TransportError::application(code),
                });
                true
            }
            None => false,
        }
    }

    /// The peer resets its sending side.
    pub fn reset_stream(&self, key: StreamKey, code: u64) -> bool {
        let mut net = self.net.lock();
        let Some(stream) = net.find_stream(key) else {
            return false;
        };
        let rec = &mut net.streams[stream];
        rec.state.reset = true;
        rec.state.read_ended = true;
        if rec.subscriptions.reset {
            let owner = rec.owner.clone();
            net.emit(TransportEvent::StreamReset {
                owner,
                error: TransportError::application(code),
            });
        }
        true
    }

    /// The stream runs out of flow-control credit.
    pub fn block_stream(&self, key: StreamKey) -> bool {
        let mut net = self.net.lock();
        let Some(stream) = net.find_stream(key) else {
            return false;
        };
        let session = net.streams[stream].session;
        net.sessions[session].stats.block_count += 1;
        let rec = &net.streams[stream];
        if rec.subscriptions.blocked {
            let owner = rec.owner.clone();
            net.emit(TransportEvent::StreamBlocked(owner));
        }
        true
    }

    pub fn deliver_headers(&self, key: StreamKey, headers: Headers, kind: HeadersKind) -> bool {
        let net = self.net.lock();
        let Some(stream) = net.find_stream(key) else {
            return false;
        };
        let rec = &net.streams[stream];
        if rec.subscriptions.headers {
            let owner = rec.owner.clone();
            net.emit(TransportEvent::StreamHeaders {
                owner,
                headers,
                kind,
            });
        }
        true
    }

    pub fn deliver_trailers(&self, key: StreamKey, headers: Headers) -> bool {
        let net = self.net.lock();
        let Some(stream) = net.find_stream(key) else {
            return false;
        };
        let rec = &net.streams[stream];
        if rec.subscriptions.trailers {
            let owner = rec.owner.clone();
            net.emit(TransportEvent::StreamTrailers { owner, headers });
        }
        true
    }

    pub fn validate_path(&self, key: SessionKey, result: PathValidationResult, preferred: bool) -> bool {
        let net = self.net.lock();
        let Some(session) = net.find_session(key) else {
            return false;
        };
        let rec = &net.sessions[session];
        if rec.subscriptions.path_validation {
            let owner = rec.owner.clone();
            net.emit(TransportEvent::SessionPathValidation {
                owner,
                info: PathValidation {
                    result,
                    local: rec.local,
                    remote: rec.remote,
                    preferred,
                },
            });
        }
        true
    }

    pub fn issue_ticket(&self, key: SessionKey, ticket: Bytes) -> bool {
        let net = self.net.lock();
        let Some(session) = net.find_session(key) else {
            return false;
        };
        let rec = &net.sessions[session];
        if rec.subscriptions.session_ticket {
            let owner = rec.owner.clone();
            net.emit(TransportEvent::SessionTicket {
                owner,
                ticket: SessionTicket {
                    ticket,
                    transport_params: Bytes::new(),
                },
            });
        }
        true
    }

    /// The peer answers with a version negotiation packet. The session is
    /// closed right after the negotiation event.
    pub fn negotiate_version(&self, key: SessionKey, supported: Vec<u32>) -> bool {
        let mut net = self.net.lock();
        let Some(session) = net.find_session(key) else {
            return false;
        };
        let rec = &net.sessions[session];
        if rec.subscriptions.version_negotiation {
            net.emit(TransportEvent::SessionVersionNegotiation {
                owner: rec.owner.clone(),
                info: VersionNegotiation {
                    current: rec.options.max_version,
                    requested: rec.options.min_version,
                    supported,
                },
            });
        }
        let error = TransportError::from_wire(ErrorType::VersionNegotiation, 0, None);
        net.close_session(session, Report::Error(error));
        net.close_peer(session);
        true
    }

    /// The session fails locally with `error`; the peer sees a close.
    pub fn fail_session(&self, key: SessionKey, error: TransportError) -> bool {
        let mut net = self.net.lock();
        let Some(session) = net.find_session(key) else {
            return false;
        };
        net.close_session(session, Report::Error(error));
        net.close_peer(session);
        true
    }

    /// The socket behind `address` fails. Its sessions end with an internal
    /// error and the endpoint reports `context`.
    pub fn fail_endpoint(&self, address: AddressValue, context: CloseContext, code: i32) -> bool {
        let mut net = self.net.lock();
        let Some(endpoint) = net.bound.remove(&address.socket_addr()) else {
            return false;
        };
        let now = net.tick();
        let ep = &mut net.endpoints[endpoint];
        ep.closed = true;
        ep.stats.destroyed_at = now;
        let owner = ep.owner.clone();
        let sessions = ep.sessions.clone();
        for session in sessions {
            net.close_session(session, Report::Error(TransportError::transport(INTERNAL_ERROR)));
            net.close_peer(session);
        }
        net.emit(TransportEvent::EndpointError {
            owner,
            context,
            code,
        });
        true
    }
}

impl Transport for LoopbackNetwork {
    fn bind(
        &self,
        options: &EndpointOptions,
        owner: EndpointOwner,
    ) -> Result<Box<dyn NativeEndpoint>, QuicError> {
        let mut net = self.net.lock();
        let now = net.tick();
        let address = match options.address {
            Some(address) if address.port() != 0 => Some(address),
            Some(address) => net.allocate(address.host()),
            None => net.allocate(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        };
        let address = address.ok_or(QuicError::EndpointClosed {
            context: CloseContext::BindFailure,
            code: EADDRNOTAVAIL,
        })?;
        let in_use = net.bound.contains_key(&address.socket_addr());
        let index = net.endpoints.len();
        net.endpoints.push(EndpointRecord {
            owner: owner.clone(),
            address,
            options: options.clone(),
            listen: None,
            busy: false,
            closing: false,
            closed: in_use,
            referenced: true,
            sessions: Vec::new(),
            loss: 0.0,
            stats: EndpointStats {
                created_at: now,
                ..Default::default()
            },
        });
        if in_use {
            debug!(%address, "loopback address in use");
            net.emit(TransportEvent::EndpointError {
                owner,
                context: CloseContext::BindFailure,
                code: EADDRINUSE,
            });
        } else {
            net.bound.insert(address.socket_addr(), index);
        }
        Ok(Box::new(LoopbackEndpoint {
            net: self.net.clone(),
            index,
        }))
    }
}

struct LoopbackEndpoint {
    net: Arc<Mutex<Net>>,
    index: usize,
}

impl NativeEndpoint for LoopbackEndpoint {
    fn local_address(&self) -> Option<AddressValue> {
        let net = self.net.lock();
        let ep = &net.endpoints[self.index];
        (!ep.closed).then_some(ep.address)
    }

    fn listen(&mut self, options: &SessionOptions) -> Result<(), QuicError> {
        let mut net = self.net.lock();
        let ep = &mut net.endpoints[self.index];
        if ep.closed {
            return Err(QuicError::EndpointClosed {
                context: CloseContext::ListenFailure,
                code: -1,
            });
        }
        ep.listen = Some(options.clone());
        Ok(())
    }

    fn connect(
        &mut self,
        remote: AddressValue,
        options: &SessionOptions,
        owner: SessionOwner,
    ) -> Option<Box<dyn NativeSession>> {
        let mut net = self.net.lock();
        let (client, server) = net.open_session(self.index, remote, options, owner)?;
        if let Some(server) = server {
            let endpoint = net.sessions[server].endpoint;
            let handle = LoopbackSession::new(&self.net, &net, server);
            let owner = net.endpoints[endpoint].owner.clone();
            net.emit(TransportEvent::SessionNew {
                owner,
                session: Box::new(handle),
            });
            net.complete_handshake(client);
            net.complete_handshake(server);
        }
        Some(Box::new(LoopbackSession::new(&self.net, &net, client)))
    }

    fn mark_busy(&mut self, busy: bool) {
        self.net.lock().endpoints[self.index].busy = busy;
    }

    fn close_gracefully(&mut self) {
        let mut net = self.net.lock();
        net.endpoints[self.index].closing = true;
        net.maybe_finish_endpoint(self.index);
    }

    fn set_ref(&mut self, referenced: bool) {
        self.net.lock().endpoints[self.index].referenced = referenced;
    }

    fn stats(&self) -> EndpointStats {
        self.net.lock().endpoints[self.index].stats
    }

    fn state(&self) -> EndpointState {
        let net = self.net.lock();
        let ep = &net.endpoints[self.index];
        EndpointState {
            bound: !ep.closed,
            listening: ep.listen.is_some() && !ep.closing && !ep.closed,
            closing: ep.closing,
            busy: ep.busy,
            referenced: ep.referenced,
            pending_callbacks: 0,
        }
    }
}

struct LoopbackSession {
    net: Arc<Mutex<Net>>,
    index: usize,
    owner: SessionOwner,
}

impl LoopbackSession {
    fn new(handle: &Arc<Mutex<Net>>, net: &Net, index: usize) -> Self {
        Self {
            net: handle.clone(),
            index,
            owner: net.sessions[index].owner.clone(),
        }
    }
}

impl NativeSession for LoopbackSession {
    fn owner(&self) -> &SessionOwner {
        &self.owner
    }

    fn local_address(&self) -> Option<AddressValue> {
        Some(self.net.lock().sessions[self.index].local)
    }

    fn remote_address(&self) -> Option<AddressValue> {
        Some(self.net.lock().sessions[self.index].remote)
    }

    fn subscribe(&mut self, subscriptions: SessionSubscriptions) {
        self.net.lock().sessions[self.index].subscriptions = subscriptions;
    }

    fn open_stream(
        &mut self,
        direction: Direction,
        subscriptions: StreamSubscriptions,
        owner: StreamOwner,
    ) -> Option<Box<dyn NativeStream>> {
        let mut net = self.net.lock();
        let (local, remote) = net.open_stream(self.index, direction, subscriptions, owner)?;
        let peer_session = net.streams[remote].session;
        let handle = LoopbackStream::new(&self.net, &net, remote);
        let owner = net.sessions[peer_session].owner.clone();
        net.emit(TransportEvent::StreamCreated {
            owner,
            stream: Box::new(handle),
        });
        Some(Box::new(LoopbackStream::new(&self.net, &net, local)))
    }

    fn send_datagram(&mut self, payload: Bytes) -> DatagramId {
        self.net.lock().send_datagram(self.index, payload)
    }

    fn update_key(&mut self) -> Result<(), QuicError> {
        let mut net = self.net.lock();
        let rec = &mut net.sessions[self.index];
        if rec.closed {
            return Err(QuicError::invalid_state("the session is closed"));
        }
        if !rec.handshake_completed {
            return Err(QuicError::invalid_state("the handshake has not completed"));
        }
        rec.stats.key_update_count += 1;
        Ok(())
    }

    fn graceful_close(&mut self) {
        let mut net = self.net.lock();
        let now = net.tick();
        let rec = &mut net.sessions[self.index];
        if rec.closed || rec.graceful {
            return;
        }
        rec.graceful = true;
        rec.stats.graceful_closing_at = now;
        net.try_finish_graceful(self.index);
    }

    fn destroy(&mut self) {
        let mut net = self.net.lock();
        if net.sessions[self.index].closed {
            return;
        }
        net.close_session(self.index, Report::Silent);
        net.close_peer(self.index);
    }

    fn stats(&self) -> SessionStats {
        self.net.lock().sessions[self.index].stats
    }

    fn state(&self) -> SessionState {
        let net = self.net.lock();
        let rec = &net.sessions[self.index];
        SessionState {
            handshake_completed: rec.handshake_completed,
            handshake_confirmed: rec.handshake_completed,
            stream_open_allowed: rec.handshake_completed && !rec.graceful && !rec.closed,
            priority_supported: true,
            graceful_closing: rec.graceful,
            closing: rec.closed,
            destroyed: rec.closed,
            using_preferred_address: false,
            silent_close: false,
            subscriptions: rec.subscriptions,
        }
    }
}

struct LoopbackStream {
    net: Arc<Mutex<Net>>,
    index: usize,
    owner: StreamOwner,
    id: u64,
    direction: Direction,
}

impl LoopbackStream {
    fn new(handle: &Arc<Mutex<Net>>, net: &Net, index: usize) -> Self {
        let rec = &net.streams[index];
        Self {
            net: handle.clone(),
            index,
            owner: rec.owner.clone(),
            id: rec.id,
            direction: rec.direction,
        }
    }
}

impl NativeStream for LoopbackStream {
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
        let mut net = self.net.lock();
        let rec = &mut net.streams[self.index];
        rec.subscriptions = subscriptions;
        rec.state.subscriptions = subscriptions;
    }

    fn reset(&mut self, code: u64) {
        let mut net = self.net.lock();
        let rec = &mut net.streams[self.index];
        if rec.closed {
            return;
        }
        rec.state.reset = true;
        rec.state.write_ended = true;
        let peer = rec.peer;
        let peer_rec = &net.streams[peer];
        if !peer_rec.closed && peer_rec.subscriptions.reset {
            let owner = peer_rec.owner.clone();
            net.emit(TransportEvent::StreamReset {
                owner,
                error: TransportError::application(code),
            });
        }
    }

    fn stop_sending(&mut self, _code: u64) {
        let mut net = self.net.lock();
        let rec = &mut net.streams[self.index];
        if !rec.closed {
            rec.state.read_ended = true;
        }
    }

    fn set_priority(&mut self, priority: StreamPriority, _flags: PriorityFlags) {
        self.net.lock().streams[self.index].priority = priority;
    }

    fn priority(&self) -> StreamPriority {
        self.net.lock().streams[self.index].priority
    }

    fn destroy(&mut self) {
        let mut net = self.net.lock();
        if net.streams[self.index].closed {
            return;
        }
        let peer = net.streams[self.index].peer;
        let session = net.streams[self.index].session;
        net.close_stream(self.index);
        if !net.streams[peer].closed {
            let peer_session = net.streams[peer].session;
            net.close_stream(peer);
            let owner = net.streams[peer].owner.clone();
            net.emit(TransportEvent::StreamClose(owner));
            net.try_finish_graceful(peer_session);
        }
        net.try_finish_graceful(session);
    }

    fn stats(&self) -> StreamStats {
        self.net.lock().streams[self.index].stats
    }

    fn state(&self) -> StreamState {
        self.net.lock().streams[self.index].state
    }
}
