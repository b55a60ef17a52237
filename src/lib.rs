//! Lifecycle management for QUIC endpoints, sessions and streams.
//!
//! The manager owns the entity graph and its invariants. Packet processing
//! lives in a transport engine behind the [`native`] traits; engines report
//! back through [`dispatch::EventSink`] and a [`dispatch::Dispatcher`]
//! delivers those reports to user callbacks.

pub mod address;
pub mod callbacks;
pub mod close;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod engine;
pub mod errors;
pub mod native;
pub mod session;
pub mod stats;
pub mod stream;

pub use address::{AddressValue, Family, Path};
pub use callbacks::{
    Datagram, DatagramId, DatagramStatus, EndpointCallbacks, HandshakeInfo, Headers, HeadersKind,
    PathValidation, PathValidationResult, SessionCallbacks, SessionTicket, StreamCallbacks,
    VersionNegotiation,
};
pub use close::{CloseResult, ClosedFuture};
pub use config::{
    ApplicationOptions, CongestionControl, EndpointOptions, OneOrMany, PreferredAddressPolicy,
    PreferredAddresses, SessionOptions, Side, TlsOptions, TransportParams,
};
pub use dispatch::{channel, Dispatcher, EventSink, TransportCallbacks};
pub use endpoint::Endpoint;
pub use errors::{CloseContext, ErrorCode, ErrorType, QuicError, TransportError};
pub use session::{DatagramPayload, Session, SessionPhase};
pub use stats::{
    EndpointState, EndpointStats, SessionState, SessionStats, StreamState, StreamStats, Timestamp,
};
pub use stream::{Direction, PriorityFlags, Stream, StreamPriority};
