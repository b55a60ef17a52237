#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use quicmgr::engine::loopback::LoopbackNetwork;
use quicmgr::{
    AddressValue, Endpoint, EndpointCallbacks, EndpointOptions, QuicError, Session,
    SessionCallbacks, SessionOptions, StreamCallbacks,
};

/// Collects values handed to callbacks.
#[derive(Clone)]
pub struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, value: T) {
        self.0.lock().push(value);
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

pub fn session_callbacks() -> SessionCallbacks {
    SessionCallbacks::new().on_handshake(|_, _| {})
}

pub fn stream_callbacks() -> StreamCallbacks {
    StreamCallbacks::new().on_error(|_, _| {})
}

/// An endpoint that records inbound sessions.
pub fn recording_endpoint(
    network: &LoopbackNetwork,
    session: SessionCallbacks,
    stream: StreamCallbacks,
) -> (Endpoint, Recorder<Session>) {
    let accepted = Recorder::new();
    let sink = accepted.clone();
    let callbacks = EndpointCallbacks::new()
        .on_session(move |session| sink.push(session))
        .session(session)
        .stream(stream);
    let endpoint = Endpoint::new(network, callbacks, EndpointOptions::new())
        .expect("loopback endpoint binds");
    (endpoint, accepted)
}

pub fn endpoint(network: &LoopbackNetwork) -> Endpoint {
    recording_endpoint(network, session_callbacks(), stream_callbacks()).0
}

/// A listening server and a client connected to it, with the handshake
/// already delivered on both sides.
pub struct Pair {
    pub network: LoopbackNetwork,
    pub server: Endpoint,
    pub client: Endpoint,
    pub accepted: Recorder<Session>,
    pub session: Session,
}

impl Pair {
    pub fn new() -> Self {
        Self::with_callbacks(session_callbacks(), stream_callbacks())
    }

    pub fn with_callbacks(session: SessionCallbacks, stream: StreamCallbacks) -> Self {
        let network = LoopbackNetwork::new();
        let (server, accepted) = recording_endpoint(&network, session.clone(), stream.clone());
        server
            .listen(SessionOptions::new())
            .expect("server listens");
        let (client, _) = recording_endpoint(&network, session, stream);
        let session = client
            .connect(address_of(&server), SessionOptions::new())
            .expect("client connects");
        network.run_until_idle();
        Self {
            network,
            server,
            client,
            accepted,
            session,
        }
    }

    pub fn server_session(&self) -> Session {
        self.accepted
            .snapshot()
            .into_iter()
            .next()
            .expect("server accepted a session")
    }
}

pub fn address_of(endpoint: &Endpoint) -> AddressValue {
    endpoint.address().expect("endpoint is bound")
}

pub fn is_invalid_state<T>(result: &Result<T, QuicError>) -> bool {
    matches!(result, Err(QuicError::InvalidState(_)))
}
