//! The seam between the manager and a transport engine.
//!
//! An engine implements [`Transport`] and the three `Native*` handle traits.
//! It reports activity by handing [`TransportEvent`]s to
//! [`TransportCallbacks::dispatch`](crate::dispatch::TransportCallbacks::dispatch),
//! either directly from its own event loop or through an
//! [`EventSink`](crate::dispatch::EventSink). Engines must never dispatch from
//! inside a `Native*` method: the manager calls those while holding entity
//! locks.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::address::AddressValue;
use crate::callbacks::{
    DatagramId, DatagramStatus, HandshakeInfo, Headers, HeadersKind, PathValidation,
    SessionSubscriptions, SessionTicket, StreamSubscriptions, VersionNegotiation,
};
use crate::config::{EndpointOptions, SessionOptions};
use crate::errors::{CloseContext, QuicError, TransportError};
use crate::stats::{EndpointState, EndpointStats, SessionState, SessionStats, StreamState, StreamStats};
use crate::stream::{Direction, PriorityFlags, StreamPriority};
use crate::{endpoint, session, stream};

struct Slot<T> {
    target: Arc<Mutex<Option<Weak<T>>>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            target: Arc::new(Mutex::new(None)),
        }
    }

    fn bind(&self, target: &Arc<T>) {
        *self.target.lock() = Some(Arc::downgrade(target));
    }

    fn get(&self) -> Option<Arc<T>> {
        self.target.lock().as_ref().and_then(Weak::upgrade)
    }

    fn clear(&self) {
        self.target.lock().take();
    }

    fn is_bound(&self) -> bool {
        self.get().is_some()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

macro_rules! owner_slot {
    ($(#[$meta:meta])* $name:ident => $target:ty) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(Slot<$target>);

        impl $name {
            pub fn new() -> Self {
                Self(Slot::new())
            }

            /// True while a live manager entity is attached.
            pub fn is_bound(&self) -> bool {
                self.0.is_bound()
            }

            pub(crate) fn bind(&self, target: &Arc<$target>) {
                self.0.bind(target)
            }

            pub(crate) fn get(&self) -> Option<Arc<$target>> {
                self.0.get()
            }

            pub(crate) fn clear(&self) {
                self.0.clear()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bound", &self.is_bound())
                    .finish()
            }
        }
    };
}

owner_slot!(
    /// Back-reference from a native endpoint to its `Endpoint`.
    EndpointOwner => endpoint::Shared
);
owner_slot!(
    /// Back-reference from a native session to its `Session`.
    SessionOwner => session::Shared
);
owner_slot!(
    /// Back-reference from a native stream to its `Stream`.
    StreamOwner => stream::Shared
);

/// Creates native endpoints. Bind failures may be returned directly or
/// reported later as an `EndpointError` event with `CloseContext::BindFailure`.
pub trait Transport: Send + Sync {
    fn bind(
        &self,
        options: &EndpointOptions,
        owner: EndpointOwner,
    ) -> Result<Box<dyn NativeEndpoint>, QuicError>;
}

pub trait NativeEndpoint: Send {
    fn local_address(&self) -> Option<AddressValue>;

    fn listen(&mut self, options: &SessionOptions) -> Result<(), QuicError>;

    /// Returns `None` when no session handle can be produced.
    fn connect(
        &mut self,
        remote: AddressValue,
        options: &SessionOptions,
        owner: SessionOwner,
    ) -> Option<Box<dyn NativeSession>>;

    fn mark_busy(&mut self, busy: bool);

    /// Stop accepting and emit `EndpointDone` once every session has ended.
    fn close_gracefully(&mut self);

    fn set_ref(&mut self, referenced: bool);

    fn stats(&self) -> EndpointStats;

    fn state(&self) -> EndpointState;
}

pub trait NativeSession: Send {
    fn owner(&self) -> &SessionOwner;

    fn local_address(&self) -> Option<AddressValue>;

    fn remote_address(&self) -> Option<AddressValue>;

    fn subscribe(&mut self, subscriptions: SessionSubscriptions);

    /// Returns `None` when the open is denied; no stream state is left behind.
    fn open_stream(
        &mut self,
        direction: Direction,
        subscriptions: StreamSubscriptions,
        owner: StreamOwner,
    ) -> Option<Box<dyn NativeStream>>;

    fn send_datagram(&mut self, payload: Bytes) -> DatagramId;

    fn update_key(&mut self) -> Result<(), QuicError>;

    /// Close once every open stream has finished, then emit `SessionClose`.
    fn graceful_close(&mut self);

    /// Tear down immediately. Emits nothing for this session.
    fn destroy(&mut self);

    fn stats(&self) -> SessionStats;

    fn state(&self) -> SessionState;
}

pub trait NativeStream: Send {
    fn owner(&self) -> &StreamOwner;

    fn id(&self) -> u64;

    fn direction(&self) -> Direction;

    fn subscribe(&mut self, subscriptions: StreamSubscriptions);

    fn reset(&mut self, code: u64);

    fn stop_sending(&mut self, code: u64);

    fn set_priority(&mut self, priority: StreamPriority, flags: PriorityFlags);

    fn priority(&self) -> StreamPriority;

    fn destroy(&mut self);

    fn stats(&self) -> StreamStats;

    fn state(&self) -> StreamState;
}

/// Everything an engine can report. Each event carries the owner slot of the
/// handle it concerns.
pub enum TransportEvent {
    EndpointDone(EndpointOwner),
    EndpointError {
        owner: EndpointOwner,
        context: CloseContext,
        code: i32,
    },
    SessionNew {
        owner: EndpointOwner,
        session: Box<dyn NativeSession>,
    },
    SessionClose(SessionOwner),
    SessionError {
        owner: SessionOwner,
        error: TransportError,
    },
    SessionDatagram {
        owner: SessionOwner,
        payload: Bytes,
        early: bool,
    },
    SessionDatagramStatus {
        owner: SessionOwner,
        id: DatagramId,
        status: DatagramStatus,
    },
    SessionHandshake {
        owner: SessionOwner,
        info: HandshakeInfo,
    },
    SessionTicket {
        owner: SessionOwner,
        ticket: SessionTicket,
    },
    SessionVersionNegotiation {
        owner: SessionOwner,
        info: VersionNegotiation,
    },
    SessionPathValidation {
        owner: SessionOwner,
        info: PathValidation,
    },
    StreamCreated {
        owner: SessionOwner,
        stream: Box<dyn NativeStream>,
    },
    StreamClose(StreamOwner),
    StreamError {
        owner: StreamOwner,
        error: TransportError,
    },
    StreamReset {
        owner: StreamOwner,
        error: TransportError,
    },
    StreamBlocked(StreamOwner),
    StreamHeaders {
        owner: StreamOwner,
        headers: Headers,
        kind: HeadersKind,
    },
    StreamTrailers {
        owner: StreamOwner,
        headers: Headers,
    },
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::EndpointDone(_) => "endpoint-done",
            TransportEvent::EndpointError { .. } => "endpoint-error",
            TransportEvent::SessionNew { .. } => "session-new",
            TransportEvent::SessionClose(_) => "session-close",
            TransportEvent::SessionError { .. } => "session-error",
            TransportEvent::SessionDatagram { .. } => "session-datagram",
            TransportEvent::SessionDatagramStatus { .. } => "session-datagram-status",
            TransportEvent::SessionHandshake { .. } => "session-handshake",
            TransportEvent::SessionTicket { .. } => "session-ticket",
            TransportEvent::SessionVersionNegotiation { .. } => "session-version-negotiation",
            TransportEvent::SessionPathValidation { .. } => "session-path-validation",
            TransportEvent::StreamCreated { .. } => "stream-created",
            TransportEvent::StreamClose(_) => "stream-close",
            TransportEvent::StreamError { .. } => "stream-error",
            TransportEvent::StreamReset { .. } => "stream-reset",
            TransportEvent::StreamBlocked(_) => "stream-blocked",
            TransportEvent::StreamHeaders { .. } => "stream-headers",
            TransportEvent::StreamTrailers { .. } => "stream-trailers",
        }
    }
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
