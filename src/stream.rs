use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::callbacks::{Headers, HeadersKind, StreamCallbacks};
use crate::config::Side;
use crate::errors::QuicError;
use crate::native::{NativeStream, StreamOwner};
use crate::session::{self, Session};
use crate::stats::{StreamState, StreamStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bidi,
    Uni,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPriority {
    #[default]
    Default,
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PriorityFlags {
    #[default]
    None,
    NonIncremental,
}

/// One bidirectional or unidirectional channel within a session.
#[derive(Clone)]
pub struct Stream {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    owner: StreamOwner,
    direction: Direction,
    inner: Mutex<Inner>,
}

struct Inner {
    session: Weak<session::Shared>,
    native: Option<Box<dyn NativeStream>>,
    callbacks: Option<Arc<StreamCallbacks>>,
    id: u64,
    destroyed: bool,
    blocked: bool,
    headers: Option<(Headers, HeadersKind)>,
    trailers: Option<Headers>,
    stats: StreamStats,
    state: StreamState,
}

impl Stream {
    /// A stream whose owner slot is bound before the native handle exists.
    pub(crate) fn outbound(
        session: Weak<session::Shared>,
        direction: Direction,
        callbacks: Option<Arc<StreamCallbacks>>,
        owner: StreamOwner,
    ) -> Self {
        let stream = Self::with_parts(session, direction, callbacks, owner);
        stream.shared.owner.bind(&stream.shared);
        stream
    }

    pub(crate) fn inbound(
        session: Weak<session::Shared>,
        mut native: Box<dyn NativeStream>,
        callbacks: Option<Arc<StreamCallbacks>>,
    ) -> Self {
        if let Some(callbacks) = &callbacks {
            native.subscribe(callbacks.subscriptions());
        }
        let owner = native.owner().clone();
        let stream = Self::with_parts(session, native.direction(), callbacks, owner);
        stream.shared.owner.bind(&stream.shared);
        stream.attach(native);
        stream
    }

    fn with_parts(
        session: Weak<session::Shared>,
        direction: Direction,
        callbacks: Option<Arc<StreamCallbacks>>,
        owner: StreamOwner,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                owner,
                direction,
                inner: Mutex::new(Inner {
                    session,
                    native: None,
                    callbacks,
                    id: 0,
                    destroyed: false,
                    blocked: false,
                    headers: None,
                    trailers: None,
                    stats: StreamStats::default(),
                    state: StreamState::default(),
                }),
            }),
        }
    }

    pub(crate) fn attach(&self, native: Box<dyn NativeStream>) {
        let mut inner = self.shared.inner.lock();
        inner.id = native.id();
        inner.native = Some(native);
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> u64 {
        self.shared.inner.lock().id
    }

    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    /// The side that opened the stream, from the low bit of the id.
    pub fn origin(&self) -> Side {
        if self.id() & 0x1 == 0 {
            Side::Client
        } else {
            Side::Server
        }
    }

    pub fn session(&self) -> Option<Session> {
        let session = self.shared.inner.lock().session.clone();
        session.upgrade().map(Session::from_shared)
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().destroyed
    }

    pub fn is_blocked(&self) -> bool {
        self.shared.inner.lock().blocked
    }

    /// The most recent header block and its kind.
    pub fn headers(&self) -> Option<(Headers, HeadersKind)> {
        self.shared.inner.lock().headers.clone()
    }

    pub fn trailers(&self) -> Option<Headers> {
        self.shared.inner.lock().trailers.clone()
    }

    pub fn stats(&self) -> StreamStats {
        let inner = self.shared.inner.lock();
        match &inner.native {
            Some(native) => native.stats(),
            None => inner.stats,
        }
    }

    pub fn state(&self) -> StreamState {
        let inner = self.shared.inner.lock();
        match &inner.native {
            Some(native) => native.state(),
            None => inner.state,
        }
    }

    fn with_native<R>(
        &self,
        op: &str,
        f: impl FnOnce(&mut dyn NativeStream) -> R,
    ) -> Result<R, QuicError> {
        let mut inner = self.shared.inner.lock();
        if inner.destroyed {
            return Err(QuicError::invalid_state(format!(
                "cannot {op}: the stream is closed"
            )));
        }
        match inner.native.as_mut() {
            Some(native) => Ok(f(native.as_mut())),
            None => Err(QuicError::invalid_state(format!(
                "cannot {op}: the stream is not open"
            ))),
        }
    }

    /// Abruptly ends the sending side with an application error code.
    pub fn reset(&self, code: u64) -> Result<(), QuicError> {
        self.with_native("reset", |native| native.reset(code))
    }

    /// Asks the peer to stop sending with an application error code.
    pub fn stop_sending(&self, code: u64) -> Result<(), QuicError> {
        self.with_native("stop sending", |native| native.stop_sending(code))
    }

    /// Sets the stream priority. A no-op when the session does not support
    /// prioritization.
    pub fn set_priority(&self, priority: StreamPriority, flags: PriorityFlags) -> Result<(), QuicError> {
        let supported = self
            .session()
            .map(|session| session.state().priority_supported)
            .unwrap_or(false);
        self.with_native("set priority", |native| {
            if supported {
                native.set_priority(priority, flags);
            }
        })
    }

    pub fn priority(&self) -> Option<StreamPriority> {
        let inner = self.shared.inner.lock();
        if inner.destroyed {
            return None;
        }
        inner.native.as_ref().map(|native| native.priority())
    }

    pub(crate) fn finish_close(&self, error: Option<QuicError>) {
        let callbacks = {
            let mut inner = self.shared.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            if let Some(mut native) = inner.native.take() {
                inner.stats = native.stats().detach();
                inner.state = native.state();
                native.destroy();
            }
            inner.state.destroyed = true;
            inner.callbacks.clone()
        };
        self.shared.owner.clear();
        debug!(id = self.id(), error = ?error, "stream closed");

        if let (Some(error), Some(callbacks)) = (&error, &callbacks) {
            if let Some(on_error) = &callbacks.on_error {
                on_error(self, error);
            }
        }
    }

    fn callbacks(&self) -> Option<Arc<StreamCallbacks>> {
        let inner = self.shared.inner.lock();
        if inner.destroyed {
            trace!(id = inner.id, "stream destroyed, dropping event");
            return None;
        }
        inner.callbacks.clone()
    }

    pub(crate) fn on_reset(&self, error: QuicError) {
        if let Some(on_reset) = self.callbacks().and_then(|c| c.on_reset.clone()) {
            on_reset(self, &error);
        }
    }

    pub(crate) fn on_blocked(&self) {
        let Some(callbacks) = self.callbacks() else {
            return;
        };
        self.shared.inner.lock().blocked = true;
        if let Some(on_blocked) = &callbacks.on_blocked {
            on_blocked(self);
        }
    }

    pub(crate) fn on_headers(&self, headers: Headers, kind: HeadersKind) {
        let Some(callbacks) = self.callbacks() else {
            return;
        };
        self.shared.inner.lock().headers = Some((headers.clone(), kind));
        if let Some(on_headers) = &callbacks.on_headers {
            on_headers(self, &headers, kind);
        }
    }

    pub(crate) fn on_trailers(&self, headers: Headers) {
        let Some(callbacks) = self.callbacks() else {
            return;
        };
        self.shared.inner.lock().trailers = Some(headers.clone());
        if let Some(on_trailers) = &callbacks.on_trailers {
            on_trailers(self, &headers);
        }
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Stream {}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Stream")
            .field("id", &inner.id)
            .field("direction", &self.shared.direction)
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::StreamSubscriptions;
    use parking_lot::Mutex as PlMutex;

    struct FakeStream {
        owner: StreamOwner,
        id: u64,
        direction: Direction,
        resets: Arc<PlMutex<Vec<u64>>>,
        destroyed: Arc<PlMutex<bool>>,
    }

    impl NativeStream for FakeStream {
        fn owner(&self) -> &StreamOwner {
            &self.owner
        }
        fn id(&self) -> u64 {
            self.id
        }
        fn direction(&self) -> Direction {
            self.direction
        }
        fn subscribe(&mut self, _subscriptions: StreamSubscriptions) {}
        fn reset(&mut self, code: u64) {
            self.resets.lock().push(code);
        }
        fn stop_sending(&mut self, _code: u64) {}
        fn set_priority(&mut self, _priority: StreamPriority, _flags: PriorityFlags) {}
        fn priority(&self) -> StreamPriority {
            StreamPriority::Default
        }
        fn destroy(&mut self) {
            *self.destroyed.lock() = true;
        }
        fn stats(&self) -> StreamStats {
            StreamStats {
                bytes_sent: 10,
                ..Default::default()
            }
        }
        fn state(&self) -> StreamState {
            StreamState::default()
        }
    }

    fn fake(id: u64, direction: Direction) -> (Stream, Arc<PlMutex<Vec<u64>>>, Arc<PlMutex<bool>>) {
        let resets = Arc::new(PlMutex::new(Vec::new()));
        let destroyed = Arc::new(PlMutex::new(false));
        let native = FakeStream {
            owner: StreamOwner::new(),
            id,
            direction,
            resets: resets.clone(),
            destroyed: destroyed.clone(),
        };
        let callbacks = Arc::new(StreamCallbacks::new().on_error(|_, _| {}));
        let stream = Stream::inbound(Weak::new(), Box::new(native), Some(callbacks));
        (stream, resets, destroyed)
    }

    #[test]
    fn identity_comes_from_the_native_handle() {
        let (stream, _, _) = fake(3, Direction::Uni);
        assert_eq!(stream.id(), 3);
        assert_eq!(stream.direction(), Direction::Uni);
        assert_eq!(stream.origin(), Side::Server);
        assert!(stream.session().is_none());
    }

    #[test]
    fn operations_fail_after_close() {
        let (stream, resets, destroyed) = fake(0, Direction::Bidi);
        stream.reset(5).unwrap();
        assert_eq!(*resets.lock(), vec![5]);

        stream.finish_close(None);
        assert!(*destroyed.lock());
        assert!(stream.is_destroyed());
        assert!(stream.reset(6).unwrap_err().is_invalid_state());
        assert!(stream.stop_sending(6).unwrap_err().is_invalid_state());
        assert_eq!(stream.priority(), None);
        assert_eq!(*resets.lock(), vec![5]);
    }

    #[test]
    fn stats_are_frozen_at_close() {
        let (stream, _, _) = fake(0, Direction::Bidi);
        assert!(!stream.stats().detached);
        stream.finish_close(None);
        let stats = stream.stats();
        assert!(stats.detached);
        assert_eq!(stats.bytes_sent, 10);
        assert!(stream.state().destroyed);
    }
}
