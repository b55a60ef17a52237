use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde_derive::{Deserialize, Serialize};

use crate::address::AddressValue;
use crate::errors::QuicError;
use crate::session::Session;
use crate::stream::Stream;

/// Identifier returned by `Session::send_datagram`, echoed in status events.
pub type DatagramId = u64;

/// A decoded header block as name/value pairs.
pub type Headers = Vec<(String, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatagramStatus {
    Acknowledged,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathValidationResult {
    Aborted,
    Failure,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeadersKind {
    Informational,
    Initial,
    Trailing,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandshakeInfo {
    pub servername: String,
    pub protocol: String,
    pub cipher: String,
    pub cipher_version: String,
    pub validation_error: Option<String>,
    pub early_data: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Bytes,
    pub early: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathValidation {
    pub result: PathValidationResult,
    pub local: AddressValue,
    pub remote: AddressValue,
    pub preferred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub ticket: Bytes,
    pub transport_params: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionNegotiation {
    pub current: u32,
    pub requested: u32,
    pub supported: Vec<u32>,
}

pub type OnSession = Arc<dyn Fn(Session) + Send + Sync>;
pub type OnEndpointError = Arc<dyn Fn(&QuicError) + Send + Sync>;

pub type OnStream = Arc<dyn Fn(&Session, Stream) + Send + Sync>;
pub type OnHandshake = Arc<dyn Fn(&Session, &HandshakeInfo) + Send + Sync>;
pub type OnDatagram = Arc<dyn Fn(&Session, &Datagram) + Send + Sync>;
pub type OnDatagramStatus = Arc<dyn Fn(&Session, DatagramId, DatagramStatus) + Send + Sync>;
pub type OnPathValidation = Arc<dyn Fn(&Session, &PathValidation) + Send + Sync>;
pub type OnSessionTicket = Arc<dyn Fn(&Session, &SessionTicket) + Send + Sync>;
pub type OnVersionNegotiation = Arc<dyn Fn(&Session, &VersionNegotiation) + Send + Sync>;
pub type OnSessionError = Arc<dyn Fn(&Session, &QuicError) + Send + Sync>;
pub type OnSessionClose = Arc<dyn Fn(&Session) + Send + Sync>;

pub type OnStreamError = Arc<dyn Fn(&Stream, &QuicError) + Send + Sync>;
pub type OnBlocked = Arc<dyn Fn(&Stream) + Send + Sync>;
pub type OnReset = Arc<dyn Fn(&Stream, &QuicError) + Send + Sync>;
pub type OnHeaders = Arc<dyn Fn(&Stream, &Headers, HeadersKind) + Send + Sync>;
pub type OnTrailers = Arc<dyn Fn(&Stream, &Headers) + Send + Sync>;

/// Optional session event classes the engine should emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSubscriptions {
    pub datagram: bool,
    pub path_validation: bool,
    pub session_ticket: bool,
    pub version_negotiation: bool,
}

/// Optional stream event classes the engine should emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamSubscriptions {
    pub blocked: bool,
    pub reset: bool,
    pub headers: bool,
    pub trailers: bool,
}

fn missing(name: &str) -> QuicError {
    QuicError::invalid_argument(name, "a callback is required")
}

#[derive(Clone, Default)]
pub struct StreamCallbacks {
    pub(crate) on_error: Option<OnStreamError>,
    pub(crate) on_blocked: Option<OnBlocked>,
    pub(crate) on_reset: Option<OnReset>,
    pub(crate) on_headers: Option<OnHeaders>,
    pub(crate) on_trailers: Option<OnTrailers>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(mut self, f: impl Fn(&Stream, &QuicError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_blocked(mut self, f: impl Fn(&Stream) + Send + Sync + 'static) -> Self {
        self.on_blocked = Some(Arc::new(f));
        self
    }

    pub fn on_reset(mut self, f: impl Fn(&Stream, &QuicError) + Send + Sync + 'static) -> Self {
        self.on_reset = Some(Arc::new(f));
        self
    }

    pub fn on_headers(
        mut self,
        f: impl Fn(&Stream, &Headers, HeadersKind) + Send + Sync + 'static,
    ) -> Self {
        self.on_headers = Some(Arc::new(f));
        self
    }

    pub fn on_trailers(mut self, f: impl Fn(&Stream, &Headers) + Send + Sync + 'static) -> Self {
        self.on_trailers = Some(Arc::new(f));
        self
    }

    pub fn validate(&self) -> Result<(), QuicError> {
        if self.on_error.is_none() {
            return Err(missing("stream.on_error"));
        }
        Ok(())
    }

    pub fn subscriptions(&self) -> StreamSubscriptions {
        StreamSubscriptions {
            blocked: self.on_blocked.is_some(),
            reset: self.on_reset.is_some(),
            headers: self.on_headers.is_some(),
            trailers: self.on_trailers.is_some(),
        }
    }
}

impl fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_error", &self.on_error.is_some())
            .field("subscriptions", &self.subscriptions())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct SessionCallbacks {
    pub(crate) on_handshake: Option<OnHandshake>,
    pub(crate) on_stream: Option<OnStream>,
    pub(crate) on_datagram: Option<OnDatagram>,
    pub(crate) on_datagram_status: Option<OnDatagramStatus>,
    pub(crate) on_path_validation: Option<OnPathValidation>,
    pub(crate) on_session_ticket: Option<OnSessionTicket>,
    pub(crate) on_version_negotiation: Option<OnVersionNegotiation>,
    pub(crate) on_error: Option<OnSessionError>,
    pub(crate) on_close: Option<OnSessionClose>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_handshake(
        mut self,
        f: impl Fn(&Session, &HandshakeInfo) + Send + Sync + 'static,
    ) -> Self {
        self.on_handshake = Some(Arc::new(f));
        self
    }

    pub fn on_stream(mut self, f: impl Fn(&Session, Stream) + Send + Sync + 'static) -> Self {
        self.on_stream = Some(Arc::new(f));
        self
    }

    pub fn on_datagram(mut self, f: impl Fn(&Session, &Datagram) + Send + Sync + 'static) -> Self {
        self.on_datagram = Some(Arc::new(f));
        self
    }

    pub fn on_datagram_status(
        mut self,
        f: impl Fn(&Session, DatagramId, DatagramStatus) + Send + Sync + 'static,
    ) -> Self {
        self.on_datagram_status = Some(Arc::new(f));
        self
    }

    pub fn on_path_validation(
        mut self,
        f: impl Fn(&Session, &PathValidation) + Send + Sync + 'static,
    ) -> Self {
        self.on_path_validation = Some(Arc::new(f));
        self
    }

    pub fn on_session_ticket(
        mut self,
        f: impl Fn(&Session, &SessionTicket) + Send + Sync + 'static,
    ) -> Self {
        self.on_session_ticket = Some(Arc::new(f));
        self
    }

    pub fn on_version_negotiation(
        mut self,
        f: impl Fn(&Session, &VersionNegotiation) + Send + Sync + 'static,
    ) -> Self {
        self.on_version_negotiation = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&Session, &QuicError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(&Session) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub fn validate(&self) -> Result<(), QuicError> {
        if self.on_handshake.is_none() {
            return Err(missing("session.on_handshake"));
        }
        match (&self.on_datagram, &self.on_datagram_status) {
            (Some(_), None) => Err(missing("session.on_datagram_status")),
            (None, Some(_)) => Err(missing("session.on_datagram")),
            _ => Ok(()),
        }
    }

    pub fn subscriptions(&self) -> SessionSubscriptions {
        SessionSubscriptions {
            datagram: self.on_datagram.is_some(),
            path_validation: self.on_path_validation.is_some(),
            session_ticket: self.on_session_ticket.is_some(),
            version_negotiation: self.on_version_negotiation.is_some(),
        }
    }
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_handshake", &self.on_handshake.is_some())
            .field("on_stream", &self.on_stream.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("subscriptions", &self.subscriptions())
            .finish()
    }
}

/// Callbacks for an endpoint and, optionally, the sessions and streams it creates.
#[derive(Clone, Default)]
pub struct EndpointCallbacks {
    pub(crate) on_session: Option<OnSession>,
    pub(crate) on_error: Option<OnEndpointError>,
    pub(crate) session: Option<Arc<SessionCallbacks>>,
    pub(crate) stream: Option<Arc<StreamCallbacks>>,
}

impl EndpointCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_session(mut self, f: impl Fn(Session) + Send + Sync + 'static) -> Self {
        self.on_session = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&QuicError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn session(mut self, callbacks: SessionCallbacks) -> Self {
        self.session = Some(Arc::new(callbacks));
        self
    }

    pub fn stream(mut self, callbacks: StreamCallbacks) -> Self {
        self.stream = Some(Arc::new(callbacks));
        self
    }

    pub fn validate(&self) -> Result<(), QuicError> {
        if self.on_session.is_none() {
            return Err(missing("on_session"));
        }
        if let Some(session) = &self.session {
            session.validate()?;
        }
        if let Some(stream) = &self.stream {
            stream.validate()?;
        }
        Ok(())
    }
}

impl fmt::Debug for EndpointCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointCallbacks")
            .field("on_session", &self.on_session.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("session", &self.session)
            .field("stream", &self.stream)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_requires_on_session() {
        let err = EndpointCallbacks::new().validate().unwrap_err();
        assert_eq!(err, QuicError::invalid_argument("on_session", "a callback is required"));
        assert!(EndpointCallbacks::new().on_session(|_| {}).validate().is_ok());
    }

    #[test]
    fn nested_session_callbacks_are_validated() {
        let callbacks = EndpointCallbacks::new()
            .on_session(|_| {})
            .session(SessionCallbacks::new());
        match callbacks.validate() {
            Err(QuicError::InvalidArgument { name, .. }) => assert_eq!(name, "session.on_handshake"),
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[test]
    fn datagram_callbacks_are_required_together() {
        let only_receive = SessionCallbacks::new()
            .on_handshake(|_, _| {})
            .on_datagram(|_, _| {});
        assert!(only_receive.validate().is_err());

        let only_status = SessionCallbacks::new()
            .on_handshake(|_, _| {})
            .on_datagram_status(|_, _, _| {});
        assert!(only_status.validate().is_err());

        let both = only_receive.on_datagram_status(|_, _, _| {});
        assert!(both.validate().is_ok());
        assert!(both.subscriptions().datagram);
    }

    #[test]
    fn stream_callbacks_require_on_error() {
        assert!(StreamCallbacks::new().on_blocked(|_| {}).validate().is_err());
        assert!(StreamCallbacks::new().on_error(|_, _| {}).validate().is_ok());
    }

    #[test]
    fn stream_subscriptions_follow_supplied_callbacks() {
        let callbacks = StreamCallbacks::new()
            .on_error(|_, _| {})
            .on_reset(|_, _| {})
            .on_trailers(|_, _| {});
        assert_eq!(
            callbacks.subscriptions(),
            StreamSubscriptions {
                blocked: false,
                reset: true,
                headers: false,
                trailers: true,
            }
        );
    }
}
