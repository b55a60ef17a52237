use std::fmt;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::address::AddressValue;
use crate::callbacks::EndpointCallbacks;
use crate::close::{CloseSignal, ClosedFuture};
use crate::config::{EndpointOptions, SessionOptions, Side};
use crate::errors::QuicError;
use crate::native::{EndpointOwner, NativeEndpoint, NativeSession, SessionOwner, Transport};
use crate::session::Session;
use crate::stats::{EndpointState, EndpointStats};

/// A bound local transport that accepts and originates sessions.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    owner: EndpointOwner,
    inner: Mutex<Inner>,
}

struct Inner {
    native: Option<Box<dyn NativeEndpoint>>,
    callbacks: EndpointCallbacks,
    address: Option<AddressValue>,
    listening: bool,
    busy: bool,
    closed: bool,
    close: Option<CloseSignal>,
    sessions: Vec<Session>,
    stats: EndpointStats,
    state: EndpointState,
}

impl Endpoint {
    pub fn new<T>(
        transport: &T,
        callbacks: EndpointCallbacks,
        options: EndpointOptions,
    ) -> Result<Self, QuicError>
    where
        T: Transport + ?Sized,
    {
        callbacks.validate()?;
        options.validate()?;

        let owner = EndpointOwner::new();
        let shared = Arc::new(Shared {
            owner: owner.clone(),
            inner: Mutex::new(Inner {
                native: None,
                callbacks,
                address: None,
                listening: false,
                busy: false,
                closed: false,
                close: None,
                sessions: Vec::new(),
                stats: EndpointStats::default(),
                state: EndpointState::default(),
            }),
        });
        owner.bind(&shared);

        let native = transport.bind(&options, owner)?;
        shared.inner.lock().native = Some(native);
        debug!(address = ?options.address, "endpoint bound");
        Ok(Self { shared })
    }

    /// Like [`Endpoint::new`], but fails with `Aborted` if `cancel` has
    /// already fired.
    pub fn with_cancellation<T>(
        transport: &T,
        callbacks: EndpointCallbacks,
        options: EndpointOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, QuicError>
    where
        T: Transport + ?Sized,
    {
        if cancel.is_cancelled() {
            return Err(QuicError::Aborted("endpoint construction was cancelled".into()));
        }
        Self::new(transport, callbacks, options)
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Starts accepting inbound sessions. May only be called once.
    pub fn listen(&self, options: SessionOptions) -> Result<(), QuicError> {
        let mut inner = self.shared.inner.lock();
        if inner.closed {
            return Err(QuicError::invalid_state("the endpoint is closed"));
        }
        if inner.close.is_some() {
            return Err(QuicError::invalid_state("the endpoint is closing"));
        }
        if inner.listening {
            return Err(QuicError::invalid_state("the endpoint is already listening"));
        }
        options.validate(Side::Server)?;
        if let Some(native) = inner.native.as_mut() {
            native.listen(&options)?;
        }
        inner.listening = true;
        debug!(alpn = %options.tls.alpn, "endpoint listening");
        Ok(())
    }

    /// Opens an outbound session to `address`.
    pub fn connect(&self, address: AddressValue, options: SessionOptions) -> Result<Session, QuicError> {
        let mut inner = self.shared.inner.lock();
        if inner.closed {
            return Err(QuicError::invalid_state("the endpoint is closed"));
        }
        if inner.close.is_some() {
            return Err(QuicError::invalid_state("the endpoint is closing"));
        }
        if inner.busy {
            return Err(QuicError::invalid_state("the endpoint is busy"));
        }
        options.validate(Side::Client)?;

        let owner = SessionOwner::new();
        let session = Session::outbound(
            Arc::downgrade(&self.shared),
            inner.callbacks.session.clone(),
            inner.callbacks.stream.clone(),
            owner.clone(),
        );
        let native = inner
            .native
            .as_mut()
            .and_then(|native| native.connect(address, &options, owner))
            .ok_or_else(|| {
                QuicError::ConnectionFailed(format!("no session handle for {address}"))
            })?;
        session.attach(native);
        inner.sessions.push(session.clone());
        debug!(%address, "session connecting");
        Ok(session)
    }

    /// Like [`Endpoint::connect`], but fails with `Aborted` if `cancel` has
    /// already fired.
    pub fn connect_with_cancellation(
        &self,
        address: AddressValue,
        options: SessionOptions,
        cancel: &CancellationToken,
    ) -> Result<Session, QuicError> {
        if cancel.is_cancelled() {
            return Err(QuicError::Aborted("connect was cancelled".into()));
        }
        self.connect(address, options)
    }

    /// While busy, inbound sessions are refused and `connect` fails.
    pub fn set_busy(&self, busy: bool) -> Result<(), QuicError> {
        let mut inner = self.shared.inner.lock();
        if inner.closed {
            return Err(QuicError::invalid_state("the endpoint is closed"));
        }
        if inner.busy != busy {
            if let Some(native) = inner.native.as_mut() {
                native.mark_busy(busy);
            }
            inner.busy = busy;
            debug!(busy, "endpoint busy state changed");
        }
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.shared.inner.lock().busy
    }

    pub fn is_listening(&self) -> bool {
        self.shared.inner.lock().listening
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    /// Whether the endpoint keeps its runtime alive. No protocol effect.
    pub fn set_ref(&self, referenced: bool) {
        if let Some(native) = self.shared.inner.lock().native.as_mut() {
            native.set_ref(referenced);
        }
    }

    /// The bound local address, resolved once. `None` once closed.
    pub fn address(&self) -> Option<AddressValue> {
        let mut inner = self.shared.inner.lock();
        if inner.closed {
            return None;
        }
        if inner.address.is_none() {
            inner.address = inner.native.as_ref().and_then(|native| native.local_address());
        }
        inner.address
    }

    /// Sessions created since the endpoint was bound, in creation order.
    pub fn sessions(&self) -> Vec<Session> {
        self.shared.inner.lock().sessions.clone()
    }

    pub fn stats(&self) -> EndpointStats {
        let inner = self.shared.inner.lock();
        match &inner.native {
            Some(native) => native.stats(),
            None => inner.stats,
        }
    }

    pub fn state(&self) -> EndpointState {
        let inner = self.shared.inner.lock();
        match &inner.native {
            Some(native) => native.state(),
            None => inner.state,
        }
    }

    /// Stops accepting sessions and resolves once every existing session has
    /// ended. Every call returns the same future.
    pub fn close(&self) -> ClosedFuture {
        let mut inner = self.shared.inner.lock();
        if let Some(signal) = &inner.close {
            return signal.future();
        }
        let signal = CloseSignal::new();
        let future = signal.future();
        inner.close = Some(signal);
        if let Some(native) = inner.native.as_mut() {
            native.close_gracefully();
        }
        debug!(sessions = inner.sessions.len(), "endpoint closing");
        future
    }

    /// Begins a graceful close, destroys every session immediately and
    /// settles the close future with `error`.
    pub fn destroy(&self, error: Option<QuicError>) {
        if self.is_closed() {
            return;
        }
        let _ = self.close();
        let sessions = self.sessions();
        for session in &sessions {
            session.destroy(error.clone());
        }
        self.finish_close(error);
    }

    pub(crate) fn finish_close(&self, error: Option<QuicError>) {
        let (on_error, sessions) = {
            let mut inner = self.shared.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.listening = false;
            inner.address = None;
            if let Some(native) = inner.native.take() {
                inner.stats = native.stats().detach();
                inner.state = native.state();
            }
            let outcome = match &error {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            };
            inner.close.get_or_insert_with(CloseSignal::new).settle(outcome);
            (inner.callbacks.on_error.clone(), mem::take(&mut inner.sessions))
        };
        self.shared.owner.clear();
        match &error {
            Some(error) => warn!(%error, "endpoint closed with error"),
            None => debug!("endpoint closed"),
        }
        // Sessions outlive the endpoint handle; they are only forgotten here.
        drop(sessions);
        if let (Some(error), Some(on_error)) = (&error, on_error) {
            on_error(error);
        }
    }

    pub(crate) fn accept_session(&self, mut native: Box<dyn NativeSession>) {
        let (session, on_session) = {
            let mut inner = self.shared.inner.lock();
            let refusal = if inner.closed {
                Some("closed")
            } else if inner.close.is_some() {
                Some("closing")
            } else if !inner.listening {
                Some("not listening")
            } else if inner.busy {
                Some("busy")
            } else {
                None
            };
            if let Some(reason) = refusal {
                drop(inner);
                debug!(reason, remote = ?native.remote_address(), "refusing inbound session");
                native.destroy();
                return;
            }
            let session = Session::inbound(
                Arc::downgrade(&self.shared),
                native,
                inner.callbacks.session.clone(),
                inner.callbacks.stream.clone(),
            );
            inner.sessions.push(session.clone());
            (session, inner.callbacks.on_session.clone())
        };
        debug!(remote = ?session.remote_address(), "inbound session");
        if let Some(on_session) = on_session {
            on_session(session);
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Endpoint {}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Endpoint")
            .field("address", &inner.address)
            .field("listening", &inner.listening)
            .field("busy", &inner.busy)
            .field("closed", &inner.closed)
            .field("sessions", &inner.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CloseContext;

    struct RefusingTransport;

    impl Transport for RefusingTransport {
        fn bind(
            &self,
            _options: &EndpointOptions,
            _owner: EndpointOwner,
        ) -> Result<Box<dyn NativeEndpoint>, QuicError> {
            Err(QuicError::EndpointClosed {
                context: CloseContext::BindFailure,
                code: -13,
            })
        }
    }

    fn callbacks() -> EndpointCallbacks {
        EndpointCallbacks::new().on_session(|_| {})
    }

    #[test]
    fn validation_runs_before_bind() {
        let err = Endpoint::new(&RefusingTransport, EndpointCallbacks::new(), EndpointOptions::new())
            .unwrap_err();
        assert!(matches!(err, QuicError::InvalidArgument { .. }));

        let options = EndpointOptions::new().with_packet_loss(2.0, 0.0);
        let err = Endpoint::new(&RefusingTransport, callbacks(), options).unwrap_err();
        assert!(matches!(err, QuicError::InvalidValue { .. }));
    }

    #[test]
    fn synchronous_bind_failure_is_returned() {
        let err = Endpoint::new(&RefusingTransport, callbacks(), EndpointOptions::new()).unwrap_err();
        assert_eq!(
            err,
            QuicError::EndpointClosed {
                context: CloseContext::BindFailure,
                code: -13
            }
        );
    }

    #[test]
    fn cancelled_token_aborts_construction() {
        let token = CancellationToken::new();
        token.cancel();
        let err = Endpoint::with_cancellation(&RefusingTransport, callbacks(), EndpointOptions::new(), &token)
            .unwrap_err();
        assert!(matches!(err, QuicError::Aborted(_)));
    }
}
