use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::address::{AddressValue, Path};
use crate::callbacks::{
    Datagram, DatagramId, DatagramStatus, HandshakeInfo, PathValidation, SessionCallbacks,
    SessionTicket, StreamCallbacks, VersionNegotiation,
};
use crate::close::{CloseSignal, ClosedFuture};
use crate::endpoint::{self, Endpoint};
use crate::errors::QuicError;
use crate::native::{NativeSession, NativeStream, SessionOwner, StreamOwner};
use crate::stats::{SessionState, SessionStats};
use crate::stream::{Direction, Stream};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    Connecting,
    Established,
    GracefulClosing,
    Closed,
}

/// Payload accepted by [`Session::send_datagram`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramPayload {
    Text(String),
    Binary(Bytes),
}

impl DatagramPayload {
    fn into_bytes(self) -> Bytes {
        match self {
            DatagramPayload::Text(text) => Bytes::from(text.into_bytes()),
            DatagramPayload::Binary(bytes) => bytes,
        }
    }
}

impl From<&str> for DatagramPayload {
    fn from(text: &str) -> Self {
        DatagramPayload::Text(text.to_owned())
    }
}

impl From<String> for DatagramPayload {
    fn from(text: String) -> Self {
        DatagramPayload::Text(text)
    }
}

impl From<Bytes> for DatagramPayload {
    fn from(bytes: Bytes) -> Self {
        DatagramPayload::Binary(bytes)
    }
}

impl From<Vec<u8>> for DatagramPayload {
    fn from(bytes: Vec<u8>) -> Self {
        DatagramPayload::Binary(Bytes::from(bytes))
    }
}

impl From<&[u8]> for DatagramPayload {
    fn from(bytes: &[u8]) -> Self {
        DatagramPayload::Binary(Bytes::copy_from_slice(bytes))
    }
}

/// One QUIC connection.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    owner: SessionOwner,
    inner: Mutex<Inner>,
}

struct Inner {
    endpoint: Weak<endpoint::Shared>,
    native: Option<Box<dyn NativeSession>>,
    callbacks: Option<Arc<SessionCallbacks>>,
    stream_callbacks: Option<Arc<StreamCallbacks>>,
    streams: Vec<Stream>,
    remote: Option<AddressValue>,
    phase: SessionPhase,
    destroyed: bool,
    close: Option<CloseSignal>,
    handshake: CloseSignal,
    stats: SessionStats,
    state: SessionState,
}

impl Session {
    /// An outbound session whose owner slot is bound before `connect` runs.
    pub(crate) fn outbound(
        endpoint: Weak<endpoint::Shared>,
        callbacks: Option<Arc<SessionCallbacks>>,
        stream_callbacks: Option<Arc<StreamCallbacks>>,
        owner: SessionOwner,
    ) -> Self {
        let session = Self::with_parts(endpoint, callbacks, stream_callbacks, owner);
        session.shared.owner.bind(&session.shared);
        session
    }

    pub(crate) fn inbound(
        endpoint: Weak<endpoint::Shared>,
        native: Box<dyn NativeSession>,
        callbacks: Option<Arc<SessionCallbacks>>,
        stream_callbacks: Option<Arc<StreamCallbacks>>,
    ) -> Self {
        let owner = native.owner().clone();
        let session = Self::with_parts(endpoint, callbacks, stream_callbacks, owner);
        session.shared.owner.bind(&session.shared);
        session.attach(native);
        session
    }

    fn with_parts(
        endpoint: Weak<endpoint::Shared>,
        callbacks: Option<Arc<SessionCallbacks>>,
        stream_callbacks: Option<Arc<StreamCallbacks>>,
        owner: SessionOwner,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                owner,
                inner: Mutex::new(Inner {
                    endpoint,
                    native: None,
                    callbacks,
                    stream_callbacks,
                    streams: Vec::new(),
                    remote: None,
                    phase: SessionPhase::Connecting,
                    destroyed: false,
                    close: None,
                    handshake: CloseSignal::new(),
                    stats: SessionStats::default(),
                    state: SessionState::default(),
                }),
            }),
        }
    }

    pub(crate) fn attach(&self, mut native: Box<dyn NativeSession>) {
        let mut inner = self.shared.inner.lock();
        if let Some(callbacks) = &inner.callbacks {
            native.subscribe(callbacks.subscriptions());
        }
        inner.remote = native.remote_address();
        inner.native = Some(native);
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn open_bidirectional_stream(&self) -> Result<Stream, QuicError> {
        self.open_stream(Direction::Bidi, None)
    }

    pub fn open_unidirectional_stream(&self) -> Result<Stream, QuicError> {
        self.open_stream(Direction::Uni, None)
    }

    /// Opens a stream, optionally with callbacks that replace the
    /// endpoint-level stream callbacks for this stream only.
    pub fn open_stream(
        &self,
        direction: Direction,
        callbacks: Option<StreamCallbacks>,
    ) -> Result<Stream, QuicError> {
        let callbacks = match callbacks {
            Some(callbacks) => {
                callbacks.validate()?;
                Some(Arc::new(callbacks))
            }
            None => None,
        };

        let mut inner = self.shared.inner.lock();
        if inner.destroyed {
            return Err(QuicError::invalid_state("the session is closed"));
        }
        if inner.phase == SessionPhase::GracefulClosing {
            return Err(QuicError::invalid_state("the session is closing"));
        }
        let callbacks = callbacks.or_else(|| inner.stream_callbacks.clone());
        let subscriptions = callbacks
            .as_ref()
            .map(|callbacks| callbacks.subscriptions())
            .unwrap_or_default();

        let owner = StreamOwner::new();
        let stream = Stream::outbound(
            Arc::downgrade(&self.shared),
            direction,
            callbacks,
            owner.clone(),
        );
        let native = inner
            .native
            .as_mut()
            .and_then(|native| native.open_stream(direction, subscriptions, owner))
            .ok_or_else(|| {
                QuicError::OpenStreamFailed(format!("{direction:?} stream open was denied"))
            })?;
        stream.attach(native);
        inner.streams.push(stream.clone());
        debug!(id = stream.id(), ?direction, "stream opened");
        Ok(stream)
    }

    /// Initiates a key update.
    pub fn update_key(&self) -> Result<(), QuicError> {
        let mut inner = self.shared.inner.lock();
        if inner.destroyed {
            return Err(QuicError::invalid_state("the session is closed"));
        }
        if inner.phase == SessionPhase::GracefulClosing {
            return Err(QuicError::invalid_state("the session is closing"));
        }
        match inner.native.as_mut() {
            Some(native) => native.update_key(),
            None => Err(QuicError::invalid_state("the session is not connected")),
        }
    }

    /// Queues an unreliable datagram. The payload is consumed. The returned
    /// id is reported once through `on_datagram_status`.
    pub fn send_datagram(&self, payload: impl Into<DatagramPayload>) -> Result<DatagramId, QuicError> {
        let payload = payload.into().into_bytes();
        let mut inner = self.shared.inner.lock();
        if inner.destroyed {
            return Err(QuicError::invalid_state("the session is closed"));
        }
        match inner.native.as_mut() {
            Some(native) => Ok(native.send_datagram(payload)),
            None => Err(QuicError::invalid_state("the session is not connected")),
        }
    }

    /// Closes after all open streams finish. Every call returns the same future.
    pub fn close(&self) -> ClosedFuture {
        let mut inner = self.shared.inner.lock();
        if let Some(signal) = &inner.close {
            return signal.future();
        }
        if inner.destroyed {
            let signal = CloseSignal::settled(Err(QuicError::invalid_state("the session is closed")));
            let future = signal.future();
            inner.close = Some(signal);
            return future;
        }
        let signal = CloseSignal::new();
        let future = signal.future();
        inner.close = Some(signal);
        inner.phase = SessionPhase::GracefulClosing;
        if let Some(native) = inner.native.as_mut() {
            native.graceful_close();
        }
        debug!(remote = ?inner.remote, "session closing gracefully");
        future
    }

    /// Tears the session down immediately. Open streams are closed with the
    /// same error; the close future settles before this returns.
    pub fn destroy(&self, error: Option<QuicError>) {
        self.finish_close(error);
    }

    /// The local and remote addresses. `None` once closing or closed.
    pub fn path(&self) -> Option<Path> {
        let inner = self.shared.inner.lock();
        if inner.destroyed || inner.phase == SessionPhase::GracefulClosing {
            return None;
        }
        let local = inner.native.as_ref().and_then(|native| native.local_address())?;
        let remote = inner.remote?;
        Some(Path { local, remote })
    }

    pub fn remote_address(&self) -> Option<AddressValue> {
        self.shared.inner.lock().remote
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().destroyed
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.inner.lock().phase
    }

    /// Resolves when the handshake completes; rejects if the session closes first.
    pub fn handshake_completed(&self) -> ClosedFuture {
        self.shared.inner.lock().handshake.future()
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        let endpoint = self.shared.inner.lock().endpoint.clone();
        endpoint.upgrade().map(Endpoint::from_shared)
    }

    /// Every stream opened or accepted since the session started, closed ones
    /// included. Cleared when the session finishes closing.
    pub fn streams(&self) -> Vec<Stream> {
        self.shared.inner.lock().streams.clone()
    }

    /// Streams that have not closed yet.
    pub fn stream_count(&self) -> usize {
        let inner = self.shared.inner.lock();
        inner.streams.iter().filter(|stream| !stream.is_destroyed()).count()
    }

    pub fn stats(&self) -> SessionStats {
        let inner = self.shared.inner.lock();
        match &inner.native {
            Some(native) => native.stats(),
            None => inner.stats,
        }
    }

    pub fn state(&self) -> SessionState {
        let inner = self.shared.inner.lock();
        match &inner.native {
            Some(native) => native.state(),
            None => inner.state,
        }
    }

    pub(crate) fn finish_close(&self, error: Option<QuicError>) {
        let (callbacks, streams) = {
            let mut inner = self.shared.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.phase = SessionPhase::Closed;
            if let Some(mut native) = inner.native.take() {
                inner.stats = native.stats().detach();
                inner.state = native.state();
                native.destroy();
            }
            inner.state.destroyed = true;

            let outcome = match &error {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            };
            inner.handshake.settle(Err(error.clone().unwrap_or(QuicError::HandshakeCanceled)));
            inner
                .close
                .get_or_insert_with(CloseSignal::new)
                .settle(outcome);
            (inner.callbacks.clone(), mem::take(&mut inner.streams))
        };
        self.shared.owner.clear();
        debug!(error = ?error, streams = streams.len(), "session closed");

        for stream in streams {
            stream.finish_close(error.clone());
        }
        if let Some(callbacks) = callbacks {
            if let Some(on_close) = &callbacks.on_close {
                on_close(self);
            }
            if let (Some(error), Some(on_error)) = (&error, &callbacks.on_error) {
                on_error(self, error);
            }
        }
    }

    fn live_callbacks(&self, event: &str) -> Option<Arc<SessionCallbacks>> {
        let inner = self.shared.inner.lock();
        if inner.destroyed {
            trace!(event, "session destroyed, dropping event");
            return None;
        }
        inner.callbacks.clone()
    }

    pub(crate) fn accept_stream(&self, mut native: Box<dyn NativeStream>) {
        let (stream, callbacks) = {
            let mut inner = self.shared.inner.lock();
            if inner.destroyed {
                drop(inner);
                debug!(id = native.id(), "session closed, rejecting inbound stream");
                native.destroy();
                return;
            }
            let stream = Stream::inbound(
                Arc::downgrade(&self.shared),
                native,
                inner.stream_callbacks.clone(),
            );
            inner.streams.push(stream.clone());
            (stream, inner.callbacks.clone())
        };
        debug!(id = stream.id(), direction = ?stream.direction(), "inbound stream");
        if let Some(on_stream) = callbacks.and_then(|c| c.on_stream.clone()) {
            on_stream(self, stream);
        }
    }

    pub(crate) fn on_handshake(&self, info: HandshakeInfo) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.destroyed {
                return;
            }
            if inner.phase == SessionPhase::Connecting {
                inner.phase = SessionPhase::Established;
            }
            inner.handshake.settle(Ok(()));
        }
        debug!(protocol = %info.protocol, servername = %info.servername, "handshake completed");
        if let Some(on_handshake) = self.live_callbacks("handshake").and_then(|c| c.on_handshake.clone()) {
            on_handshake(self, &info);
        }
    }

    pub(crate) fn on_datagram(&self, payload: Bytes, early: bool) {
        if let Some(on_datagram) = self.live_callbacks("datagram").and_then(|c| c.on_datagram.clone()) {
            on_datagram(self, &Datagram { payload, early });
        }
    }

    pub(crate) fn on_datagram_status(&self, id: DatagramId, status: DatagramStatus) {
        if let Some(on_status) = self
            .live_callbacks("datagram-status")
            .and_then(|c| c.on_datagram_status.clone())
        {
            on_status(self, id, status);
        }
    }

    pub(crate) fn on_path_validation(&self, info: PathValidation) {
        if let Some(on_path) = self
            .live_callbacks("path-validation")
            .and_then(|c| c.on_path_validation.clone())
        {
            on_path(self, &info);
        }
    }

    pub(crate) fn on_session_ticket(&self, ticket: SessionTicket) {
        if let Some(on_ticket) = self
            .live_callbacks("session-ticket")
            .and_then(|c| c.on_session_ticket.clone())
        {
            on_ticket(self, &ticket);
        }
    }

    // The engine closes the session itself after version negotiation.
    pub(crate) fn on_version_negotiation(&self, info: VersionNegotiation) {
        debug!(current = info.current, requested = info.requested, "version negotiation");
        if let Some(on_vn) = self
            .live_callbacks("version-negotiation")
            .and_then(|c| c.on_version_negotiation.clone())
        {
            on_vn(self, &info);
        }
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Session")
            .field("remote", &inner.remote)
            .field("phase", &inner.phase)
            .field("streams", &inner.streams.len())
            .finish()
    }
}
