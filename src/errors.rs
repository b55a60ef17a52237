use std::fmt;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

// Core error type shared by endpoints, sessions and streams
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuicError {
    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Unable to open stream: {0}")]
    OpenStreamFailed(String),

    #[error("Endpoint closed: {context} (code {code})")]
    EndpointClosed { context: CloseContext, code: i32 },

    #[error("Operation aborted: {0}")]
    Aborted(String),

    #[error("Handshake canceled before completion")]
    HandshakeCanceled,

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Application error {code}: {reason}")]
    Application { code: u64, reason: String },
}

impl QuicError {
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        QuicError::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        QuicError::InvalidValue {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        QuicError::InvalidState(reason.into())
    }

    pub fn application(code: u64, reason: impl Into<String>) -> Self {
        QuicError::Application {
            code,
            reason: reason.into(),
        }
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, QuicError::InvalidState(_))
    }
}

/// Why an endpoint finished closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseContext {
    Close,
    BindFailure,
    ListenFailure,
    ReceiveFailure,
    SendFailure,
    StartFailure,
}

impl CloseContext {
    /// Maps a close context and native status code to the error the endpoint's
    /// close future is rejected with. A normal close carries no error.
    pub fn into_error(self, code: i32) -> Option<QuicError> {
        match self {
            CloseContext::Close => None,
            context => Some(QuicError::EndpointClosed { context, code }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseContext::Close => "closed",
            CloseContext::BindFailure => "bind failed",
            CloseContext::ListenFailure => "listen failed",
            CloseContext::ReceiveFailure => "receive failed",
            CloseContext::SendFailure => "send failed",
            CloseContext::StartFailure => "start failed",
        }
    }
}

impl fmt::Display for CloseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The class of a connection or stream close reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    Transport,
    Application,
    VersionNegotiation,
    IdleClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // RFC 9000 transport errors
    NoError,
    InternalError,
    ConnectionRefused,
    FlowControl,
    StreamLimit,
    StreamState,
    FinalSize,
    FrameEncoding,
    TransportParameter,
    ConnectionIdLimit,
    ProtocolViolation,
    InvalidToken,
    ApplicationError,
    CryptoBufferExceeded,
    KeyUpdate,
    AeadLimitReached,
    NoViablePath,
    Crypto(u8),
    // RFC 9114 / RFC 9204 application errors
    H3GeneralProtocol,
    H3Internal,
    H3StreamCreation,
    H3ClosedCriticalStream,
    H3FrameUnexpected,
    H3Frame,
    H3ExcessiveLoad,
    H3Id,
    H3Settings,
    H3MissingSettings,
    H3RequestRejected,
    H3RequestCancelled,
    H3RequestIncomplete,
    H3Message,
    H3Connect,
    H3VersionFallback,
    QpackDecompressionFailed,
    QpackEncoderStream,
    QpackDecoderStream,
    VersionNegotiation,
    IdleClose,
    Unknown(u64),
}

impl ErrorCode {
    fn transport(code: u64) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::InternalError,
            0x2 => ErrorCode::ConnectionRefused,
            0x3 => ErrorCode::FlowControl,
            0x4 => ErrorCode::StreamLimit,
            0x5 => ErrorCode::StreamState,
            0x6 => ErrorCode::FinalSize,
            0x7 => ErrorCode::FrameEncoding,
            0x8 => ErrorCode::TransportParameter,
            0x9 => ErrorCode::ConnectionIdLimit,
            0xa => ErrorCode::ProtocolViolation,
            0xb => ErrorCode::InvalidToken,
            0xc => ErrorCode::ApplicationError,
            0xd => ErrorCode::CryptoBufferExceeded,
            0xe => ErrorCode::KeyUpdate,
            0xf => ErrorCode::AeadLimitReached,
            0x10 => ErrorCode::NoViablePath,
            0x100..=0x1ff => ErrorCode::Crypto((code & 0xff) as u8),
            other => ErrorCode::Unknown(other),
        }
    }

    fn application(code: u64) -> Self {
        match code {
            0x101 => ErrorCode::H3GeneralProtocol,
            0x102 => ErrorCode::H3Internal,
            0x103 => ErrorCode::H3StreamCreation,
            0x104 => ErrorCode::H3ClosedCriticalStream,
            0x105 => ErrorCode::H3FrameUnexpected,
            0x106 => ErrorCode::H3Frame,
            0x107 => ErrorCode::H3ExcessiveLoad,
            0x108 => ErrorCode::H3Id,
            0x109 => ErrorCode::H3Settings,
            0x10a => ErrorCode::H3MissingSettings,
            0x10b => ErrorCode::H3RequestRejected,
            0x10c => ErrorCode::H3RequestCancelled,
            0x10d => ErrorCode::H3RequestIncomplete,
            0x10e => ErrorCode::H3Message,
            0x10f => ErrorCode::H3Connect,
            0x110 => ErrorCode::H3VersionFallback,
            0x200 => ErrorCode::QpackDecompressionFailed,
            0x201 => ErrorCode::QpackEncoderStream,
            0x202 => ErrorCode::QpackDecoderStream,
            other => ErrorCode::Unknown(other),
        }
    }
}

/// A close condition reported by the transport engine for a session or stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportError {
    pub error_type: ErrorType,
    pub code: u64,
    pub kind: ErrorCode,
    pub reason: Option<String>,
}

impl TransportError {
    pub fn from_wire(error_type: ErrorType, code: u64, reason: Option<String>) -> Self {
        let kind = match error_type {
            ErrorType::Transport => ErrorCode::transport(code),
            ErrorType::Application => ErrorCode::application(code),
            ErrorType::VersionNegotiation => ErrorCode::VersionNegotiation,
            ErrorType::IdleClose => ErrorCode::IdleClose,
        };
        Self {
            error_type,
            code,
            kind,
            reason: reason.filter(|r| !r.is_empty()),
        }
    }

    pub fn transport(code: u64) -> Self {
        Self::from_wire(ErrorType::Transport, code, None)
    }

    pub fn application(code: u64) -> Self {
        Self::from_wire(ErrorType::Application, code, None)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (code {:#x})", self.kind, self.code)?;
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

impl From<TransportError> for QuicError {
    fn from(err: TransportError) -> Self {
        QuicError::Transport(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_close_has_no_error() {
        assert_eq!(CloseContext::Close.into_error(0), None);
    }

    #[test]
    fn failure_contexts_map_to_endpoint_closed() {
        let contexts = [
            CloseContext::BindFailure,
            CloseContext::ListenFailure,
            CloseContext::ReceiveFailure,
            CloseContext::SendFailure,
            CloseContext::StartFailure,
        ];
        for context in contexts {
            match context.into_error(-98) {
                Some(QuicError::EndpointClosed { context: c, code }) => {
                    assert_eq!(c, context);
                    assert_eq!(code, -98);
                }
                other => panic!("unexpected mapping for {context}: {other:?}"),
            }
        }
    }

    #[test]
    fn endpoint_closed_message_names_the_context() {
        let err = CloseContext::ListenFailure.into_error(5).unwrap();
        assert_eq!(err.to_string(), "Endpoint closed: listen failed (code 5)");
    }

    #[test]
    fn transport_codes_are_classified() {
        assert_eq!(TransportError::transport(0x0).kind, ErrorCode::NoError);
        assert_eq!(TransportError::transport(0x2).kind, ErrorCode::ConnectionRefused);
        assert_eq!(TransportError::transport(0x10).kind, ErrorCode::NoViablePath);
        assert_eq!(TransportError::transport(0x12a).kind, ErrorCode::Crypto(0x2a));
        assert_eq!(TransportError::transport(0x9999).kind, ErrorCode::Unknown(0x9999));
    }

    #[test]
    fn application_codes_are_classified() {
        assert_eq!(TransportError::application(0x10c).kind, ErrorCode::H3RequestCancelled);
        assert_eq!(TransportError::application(0x201).kind, ErrorCode::QpackEncoderStream);
        assert_eq!(TransportError::application(7).kind, ErrorCode::Unknown(7));
    }

    #[test]
    fn version_negotiation_and_idle_ignore_the_code() {
        let vn = TransportError::from_wire(ErrorType::VersionNegotiation, 42, None);
        assert_eq!(vn.kind, ErrorCode::VersionNegotiation);
        let idle = TransportError::from_wire(ErrorType::IdleClose, 0, Some(String::new()));
        assert_eq!(idle.kind, ErrorCode::IdleClose);
        assert_eq!(idle.reason, None);
    }

    #[test]
    fn transport_error_display_includes_reason() {
        let err = TransportError::from_wire(ErrorType::Transport, 0x4, Some("too many".into()));
        assert_eq!(err.to_string(), "StreamLimit (code 0x4): too many");
    }
}
