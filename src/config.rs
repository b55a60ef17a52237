use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::address::{AddressValue, Family};
use crate::errors::QuicError;

pub const DEFAULT_RETRY_TOKEN_EXPIRATION: Duration = Duration::from_secs(10);
pub const DEFAULT_TOKEN_EXPIRATION: Duration = Duration::from_secs(3600);
pub const DEFAULT_MAX_CONNECTIONS_PER_HOST: u64 = 100;
pub const DEFAULT_MAX_CONNECTIONS: u64 = 10_000;
pub const DEFAULT_MAX_STATELESS_RESETS: u64 = 10;
pub const DEFAULT_ADDRESS_LRU_SIZE: u64 = 1_000;
pub const DEFAULT_RETRY_LIMIT: u64 = 10;
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 1_200;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CIPHERS: &str = "TLS_AES_128_GCM_SHA256:TLS_AES_256_GCM_SHA384:\
TLS_CHACHA20_POLY1305_SHA256:TLS_AES_128_CCM_SHA256";
pub const DEFAULT_GROUPS: &str = "X25519:P-256:P-384:P-521";
pub const DEFAULT_ALPN: &str = "h3";

pub const QUIC_VERSION_1: u32 = 0x0000_0001;
pub const QUIC_VERSION_2: u32 = 0x6b33_43cf;

const MAX_UDP_PAYLOAD_SIZE: u64 = 65_527;
const SECRET_LENGTH: usize = 16;
const MAX_STREAM_COUNT: u64 = 1 << 60;
const MAX_ACK_DELAY_EXPONENT: u64 = 20;
const MAX_ACK_DELAY: Duration = Duration::from_millis(1 << 14);

/// Which side of a connection a session or stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionControl {
    #[default]
    Cubic,
    Reno,
    Bbr,
    Bbr2,
}

impl CongestionControl {
    pub fn code(&self) -> u32 {
        match self {
            CongestionControl::Cubic => 0,
            CongestionControl::Reno => 1,
            CongestionControl::Bbr => 2,
            CongestionControl::Bbr2 => 3,
        }
    }
}

impl FromStr for CongestionControl {
    type Err = QuicError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "cubic" => Ok(CongestionControl::Cubic),
            "reno" => Ok(CongestionControl::Reno),
            "bbr" => Ok(CongestionControl::Bbr),
            "bbr2" => Ok(CongestionControl::Bbr2),
            _ => Err(QuicError::invalid_argument(
                "cc_algorithm",
                format!("unknown congestion control algorithm {name:?}"),
            )),
        }
    }
}

impl TryFrom<u32> for CongestionControl {
    type Error = QuicError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(CongestionControl::Cubic),
            1 => Ok(CongestionControl::Reno),
            2 => Ok(CongestionControl::Bbr),
            3 => Ok(CongestionControl::Bbr2),
            _ => Err(QuicError::invalid_argument(
                "cc_algorithm",
                format!("unknown congestion control code {code}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredAddressPolicy {
    Use,
    Ignore,
    #[default]
    Default,
}

impl FromStr for PreferredAddressPolicy {
    type Err = QuicError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "use" => Ok(PreferredAddressPolicy::Use),
            "ignore" => Ok(PreferredAddressPolicy::Ignore),
            "default" => Ok(PreferredAddressPolicy::Default),
            _ => Err(QuicError::invalid_argument(
                "preferred_address_policy",
                format!("expected \"use\", \"ignore\" or \"default\", got {name:?}"),
            )),
        }
    }
}

/// Either a single entry or a list of entries, as accepted for TLS key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(item) => std::slice::from_ref(item),
            OneOrMany::Many(items) => items,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(item: T) -> Self {
        OneOrMany::One(item)
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(items: Vec<T>) -> Self {
        OneOrMany::Many(items)
    }
}

fn ensure(condition: bool, name: &str, reason: impl fmt::Display) -> Result<(), QuicError> {
    if condition {
        Ok(())
    } else {
        Err(QuicError::invalid_value(name, reason.to_string()))
    }
}

fn ensure_rate(value: f64, name: &str) -> Result<(), QuicError> {
    ensure(
        (0.0..=1.0).contains(&value),
        name,
        format!("{value} is outside 0.0..=1.0"),
    )
}

fn ensure_secret(secret: &Option<Vec<u8>>, name: &str) -> Result<(), QuicError> {
    match secret {
        Some(bytes) => ensure(
            bytes.len() == SECRET_LENGTH,
            name,
            format!("expected {SECRET_LENGTH} bytes, got {}", bytes.len()),
        ),
        None => Ok(()),
    }
}

fn ensure_entries(entries: &OneOrMany<Vec<u8>>, name: &str) -> Result<(), QuicError> {
    for (index, entry) in entries.as_slice().iter().enumerate() {
        ensure(!entry.is_empty(), &format!("{name}[{index}]"), "entry is empty")?;
    }
    Ok(())
}

// Endpoint-level tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOptions {
    pub address: Option<AddressValue>,
    pub retry_token_expiration: Duration,
    pub token_expiration: Duration,
    pub max_connections_per_host: u64,
    pub max_connections_total: u64,
    pub max_stateless_resets: u64,
    pub address_lru_size: u64,
    pub retry_limit: u64,
    pub max_payload_size: u64,
    pub unacknowledged_packet_threshold: u64,
    pub handshake_timeout: Duration,
    pub max_stream_window: u64,
    pub max_window: u64,
    pub rx_loss: f64,
    pub tx_loss: f64,
    pub udp_receive_buffer_size: u32,
    pub udp_send_buffer_size: u32,
    pub udp_ttl: u8,
    pub validate_address: bool,
    pub disable_stateless_reset: bool,
    pub disable_active_migration: bool,
    pub ipv6_only: bool,
    pub cc_algorithm: CongestionControl,
    pub reset_token_secret: Option<Vec<u8>>,
    pub token_secret: Option<Vec<u8>>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            address: None,
            retry_token_expiration: DEFAULT_RETRY_TOKEN_EXPIRATION,
            token_expiration: DEFAULT_TOKEN_EXPIRATION,
            max_connections_per_host: DEFAULT_MAX_CONNECTIONS_PER_HOST,
            max_connections_total: DEFAULT_MAX_CONNECTIONS,
            max_stateless_resets: DEFAULT_MAX_STATELESS_RESETS,
            address_lru_size: DEFAULT_ADDRESS_LRU_SIZE,
            retry_limit: DEFAULT_RETRY_LIMIT,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            unacknowledged_packet_threshold: 0,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_stream_window: 0,
            max_window: 0,
            rx_loss: 0.0,
            tx_loss: 0.0,
            udp_receive_buffer_size: 0,
            udp_send_buffer_size: 0,
            udp_ttl: 0,
            validate_address: true,
            disable_stateless_reset: false,
            disable_active_migration: false,
            ipv6_only: false,
            cc_algorithm: CongestionControl::Cubic,
            reset_token_secret: None,
            token_secret: None,
        }
    }
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: AddressValue) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_retry_token_expiration(mut self, expiration: Duration) -> Self {
        self.retry_token_expiration = expiration;
        self
    }

    pub fn with_token_expiration(mut self, expiration: Duration) -> Self {
        self.token_expiration = expiration;
        self
    }

    pub fn with_max_connections_per_host(mut self, max: u64) -> Self {
        self.max_connections_per_host = max;
        self
    }

    pub fn with_max_connections_total(mut self, max: u64) -> Self {
        self.max_connections_total = max;
        self
    }

    pub fn with_max_stateless_resets(mut self, max: u64) -> Self {
        self.max_stateless_resets = max;
        self
    }

    pub fn with_address_lru_size(mut self, size: u64) -> Self {
        self.address_lru_size = size;
        self
    }

    pub fn with_retry_limit(mut self, limit: u64) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn with_max_payload_size(mut self, size: u64) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn with_unacknowledged_packet_threshold(mut self, threshold: u64) -> Self {
        self.unacknowledged_packet_threshold = threshold;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_windows(mut self, stream_window: u64, connection_window: u64) -> Self {
        self.max_stream_window = stream_window;
        self.max_window = connection_window;
        self
    }

    /// Diagnostic packet loss injection, as probabilities in `0.0..=1.0`.
    pub fn with_packet_loss(mut self, rx_loss: f64, tx_loss: f64) -> Self {
        self.rx_loss = rx_loss;
        self.tx_loss = tx_loss;
        self
    }

    pub fn with_udp_buffers(mut self, receive: u32, send: u32) -> Self {
        self.udp_receive_buffer_size = receive;
        self.udp_send_buffer_size = send;
        self
    }

    pub fn with_udp_ttl(mut self, ttl: u8) -> Self {
        self.udp_ttl = ttl;
        self
    }

    pub fn with_validate_address(mut self, validate: bool) -> Self {
        self.validate_address = validate;
        self
    }

    pub fn with_disable_stateless_reset(mut self, disable: bool) -> Self {
        self.disable_stateless_reset = disable;
        self
    }

    pub fn with_disable_active_migration(mut self, disable: bool) -> Self {
        self.disable_active_migration = disable;
        self
    }

    pub fn with_ipv6_only(mut self, ipv6_only: bool) -> Self {
        self.ipv6_only = ipv6_only;
        self
    }

    pub fn with_cc_algorithm(mut self, algorithm: CongestionControl) -> Self {
        self.cc_algorithm = algorithm;
        self
    }

    pub fn with_reset_token_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.reset_token_secret = Some(secret.into());
        self
    }

    pub fn with_token_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.token_secret = Some(secret.into());
        self
    }

    pub fn validate(&self) -> Result<(), QuicError> {
        ensure_rate(self.rx_loss, "rx_loss")?;
        ensure_rate(self.tx_loss, "tx_loss")?;
        ensure(
            (DEFAULT_MAX_PAYLOAD_SIZE..=MAX_UDP_PAYLOAD_SIZE).contains(&self.max_payload_size),
            "max_payload_size",
            format!(
                "{} is outside {DEFAULT_MAX_PAYLOAD_SIZE}..={MAX_UDP_PAYLOAD_SIZE}",
                self.max_payload_size
            ),
        )?;
        ensure(
            !self.handshake_timeout.is_zero(),
            "handshake_timeout",
            "must be greater than zero",
        )?;
        ensure_secret(&self.reset_token_secret, "reset_token_secret")?;
        ensure_secret(&self.token_secret, "token_secret")?;
        if self.ipv6_only {
            if let Some(address) = &self.address {
                if address.family() != Family::Ipv6 {
                    return Err(QuicError::invalid_argument(
                        "address",
                        "ipv6_only endpoints must bind an IPv6 address",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// HTTP/3 style application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationOptions {
    pub max_header_pairs: u64,
    pub max_header_length: u64,
    pub max_field_section_size: u64,
    pub qpack_max_table_capacity: u64,
    pub qpack_encoder_max_table_capacity: u64,
    pub qpack_blocked_streams: u64,
    pub enable_connect_protocol: bool,
    pub enable_datagrams: bool,
}

impl Default for ApplicationOptions {
    fn default() -> Self {
        Self {
            max_header_pairs: 128,
            max_header_length: 8 * 1024,
            max_field_section_size: 0,
            qpack_max_table_capacity: 4096,
            qpack_encoder_max_table_capacity: 4096,
            qpack_blocked_streams: 100,
            enable_connect_protocol: false,
            enable_datagrams: true,
        }
    }
}

impl ApplicationOptions {
    fn validate(&self) -> Result<(), QuicError> {
        ensure(
            self.max_header_pairs > 0,
            "application.max_header_pairs",
            "must be greater than zero",
        )?;
        ensure(
            self.max_header_length > 0,
            "application.max_header_length",
            "must be greater than zero",
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferredAddresses {
    pub ipv4: Option<AddressValue>,
    pub ipv6: Option<AddressValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportParams {
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_data: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub max_idle_timeout: Duration,
    pub active_connection_id_limit: u64,
    pub ack_delay_exponent: u64,
    pub max_ack_delay: Duration,
    pub max_datagram_frame_size: u64,
    pub disable_active_migration: bool,
    pub preferred_address: PreferredAddresses,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            initial_max_stream_data_bidi_local: 256 * 1024,
            initial_max_stream_data_bidi_remote: 256 * 1024,
            initial_max_stream_data_uni: 256 * 1024,
            initial_max_data: 1024 * 1024,
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 3,
            max_idle_timeout: Duration::from_secs(10),
            active_connection_id_limit: 2,
            ack_delay_exponent: 3,
            max_ack_delay: Duration::from_millis(25),
            max_datagram_frame_size: 1200,
            disable_active_migration: false,
            preferred_address: PreferredAddresses::default(),
        }
    }
}

impl TransportParams {
    pub fn with_stream_limits(mut self, bidi: u64, uni: u64) -> Self {
        self.initial_max_streams_bidi = bidi;
        self.initial_max_streams_uni = uni;
        self
    }

    pub fn with_max_idle_timeout(mut self, timeout: Duration) -> Self {
        self.max_idle_timeout = timeout;
        self
    }

    pub fn with_max_datagram_frame_size(mut self, size: u64) -> Self {
        self.max_datagram_frame_size = size;
        self
    }

    fn validate(&self) -> Result<(), QuicError> {
        ensure(
            self.initial_max_streams_bidi <= MAX_STREAM_COUNT,
            "transport_params.initial_max_streams_bidi",
            "exceeds 2^60",
        )?;
        ensure(
            self.initial_max_streams_uni <= MAX_STREAM_COUNT,
            "transport_params.initial_max_streams_uni",
            "exceeds 2^60",
        )?;
        ensure(
            self.active_connection_id_limit >= 2,
            "transport_params.active_connection_id_limit",
            "must be at least 2",
        )?;
        ensure(
            self.ack_delay_exponent <= MAX_ACK_DELAY_EXPONENT,
            "transport_params.ack_delay_exponent",
            format!("must be at most {MAX_ACK_DELAY_EXPONENT}"),
        )?;
        ensure(
            self.max_ack_delay < MAX_ACK_DELAY,
            "transport_params.max_ack_delay",
            "must be below 2^14 milliseconds",
        )?;
        if let Some(ipv4) = &self.preferred_address.ipv4 {
            if ipv4.family() != Family::Ipv4 {
                return Err(QuicError::invalid_argument(
                    "transport_params.preferred_address.ipv4",
                    "expected an IPv4 address",
                ));
            }
        }
        if let Some(ipv6) = &self.preferred_address.ipv6 {
            if ipv6.family() != Family::Ipv6 {
                return Err(QuicError::invalid_argument(
                    "transport_params.preferred_address.ipv6",
                    "expected an IPv6 address",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    pub sni: Option<String>,
    pub alpn: String,
    pub ciphers: String,
    pub groups: String,
    pub keylog: bool,
    pub enable_tls_trace: bool,
    pub verify_client: bool,
    pub reject_unauthorized: bool,
    pub verify_hostname_identity: bool,
    pub keys: OneOrMany<Vec<u8>>,
    pub certs: OneOrMany<Vec<u8>>,
    pub ca: OneOrMany<Vec<u8>>,
    pub crl: OneOrMany<Vec<u8>>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            sni: None,
            alpn: DEFAULT_ALPN.to_string(),
            ciphers: DEFAULT_CIPHERS.to_string(),
            groups: DEFAULT_GROUPS.to_string(),
            keylog: false,
            enable_tls_trace: false,
            verify_client: false,
            reject_unauthorized: true,
            verify_hostname_identity: true,
            keys: OneOrMany::default(),
            certs: OneOrMany::default(),
            ca: OneOrMany::default(),
            crl: OneOrMany::default(),
        }
    }
}

impl TlsOptions {
    pub fn with_sni(mut self, sni: impl Into<String>) -> Self {
        self.sni = Some(sni.into());
        self
    }

    pub fn with_alpn(mut self, alpn: impl Into<String>) -> Self {
        self.alpn = alpn.into();
        self
    }

    pub fn with_keys(mut self, keys: impl Into<OneOrMany<Vec<u8>>>) -> Self {
        self.keys = keys.into();
        self
    }

    pub fn with_certs(mut self, certs: impl Into<OneOrMany<Vec<u8>>>) -> Self {
        self.certs = certs.into();
        self
    }

    pub fn with_ca(mut self, ca: impl Into<OneOrMany<Vec<u8>>>) -> Self {
        self.ca = ca.into();
        self
    }

    pub fn with_crl(mut self, crl: impl Into<OneOrMany<Vec<u8>>>) -> Self {
        self.crl = crl.into();
        self
    }

    pub fn with_reject_unauthorized(mut self, reject: bool) -> Self {
        self.reject_unauthorized = reject;
        self
    }

    fn validate(&self) -> Result<(), QuicError> {
        if let Some(sni) = &self.sni {
            ensure(!sni.is_empty(), "tls.sni", "must not be empty")?;
            ensure(!sni.contains('\0'), "tls.sni", "must not contain NUL")?;
        }
        ensure(!self.alpn.is_empty(), "tls.alpn", "must not be empty")?;
        ensure(
            self.alpn.len() <= 255,
            "tls.alpn",
            format!("{} bytes exceeds 255", self.alpn.len()),
        )?;
        ensure(!self.ciphers.is_empty(), "tls.ciphers", "must not be empty")?;
        ensure(!self.groups.is_empty(), "tls.groups", "must not be empty")?;
        ensure_entries(&self.keys, "tls.keys")?;
        ensure_entries(&self.certs, "tls.certs")?;
        ensure_entries(&self.ca, "tls.ca")?;
        ensure_entries(&self.crl, "tls.crl")
    }
}

/// Options shared by `Endpoint::listen` and `Endpoint::connect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub min_version: u32,
    pub max_version: u32,
    pub preferred_address_policy: PreferredAddressPolicy,
    pub qlog: bool,
    pub application: ApplicationOptions,
    pub transport_params: TransportParams,
    pub tls: TlsOptions,
    pub session_ticket: Option<Vec<u8>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            min_version: QUIC_VERSION_1,
            max_version: QUIC_VERSION_1,
            preferred_address_policy: PreferredAddressPolicy::Default,
            qlog: false,
            application: ApplicationOptions::default(),
            transport_params: TransportParams::default(),
            tls: TlsOptions::default(),
            session_ticket: None,
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_versions(mut self, min: u32, max: u32) -> Self {
        self.min_version = min;
        self.max_version = max;
        self
    }

    pub fn with_preferred_address_policy(mut self, policy: PreferredAddressPolicy) -> Self {
        self.preferred_address_policy = policy;
        self
    }

    pub fn with_application(mut self, application: ApplicationOptions) -> Self {
        self.application = application;
        self
    }

    pub fn with_transport_params(mut self, params: TransportParams) -> Self {
        self.transport_params = params;
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_session_ticket(mut self, ticket: impl Into<Vec<u8>>) -> Self {
        self.session_ticket = Some(ticket.into());
        self
    }

    pub fn with_qlog(mut self, qlog: bool) -> Self {
        self.qlog = qlog;
        self
    }

    pub fn validate(&self, side: Side) -> Result<(), QuicError> {
        ensure(self.min_version != 0, "min_version", "must not be zero")?;
        ensure(
            self.min_version <= self.max_version,
            "max_version",
            format!(
                "{:#x} is lower than min_version {:#x}",
                self.max_version, self.min_version
            ),
        )?;
        if side == Side::Client && self.preferred_address_policy == PreferredAddressPolicy::Use {
            // Clients follow the server's preferred address; they never advertise one.
            ensure(
                self.transport_params.preferred_address == PreferredAddresses::default(),
                "transport_params.preferred_address",
                "only servers may advertise preferred addresses",
            )?;
        }
        if let Some(ticket) = &self.session_ticket {
            ensure(!ticket.is_empty(), "session_ticket", "must not be empty")?;
        }
        self.application.validate()?;
        self.transport_params.validate()?;
        self.tls.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EndpointOptions::default().validate().is_ok());
        assert!(SessionOptions::default().validate(Side::Client).is_ok());
        assert!(SessionOptions::default().validate(Side::Server).is_ok());
    }

    #[test]
    fn loss_rates_must_be_probabilities() {
        let options = EndpointOptions::new().with_packet_loss(0.5, 1.5);
        match options.validate() {
            Err(QuicError::InvalidValue { name, .. }) => assert_eq!(name, "tx_loss"),
            other => panic!("expected InvalidValue, got {other:?}"),
        }
        let nan = EndpointOptions::new().with_packet_loss(f64::NAN, 0.0);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn reset_token_secret_must_be_sixteen_bytes() {
        let short = EndpointOptions::new().with_reset_token_secret(vec![1u8; 8]);
        assert!(matches!(short.validate(), Err(QuicError::InvalidValue { .. })));
        let exact = EndpointOptions::new().with_reset_token_secret(vec![1u8; 16]);
        assert!(exact.validate().is_ok());
    }

    #[test]
    fn max_payload_size_is_bounded() {
        assert!(EndpointOptions::new().with_max_payload_size(1000).validate().is_err());
        assert!(EndpointOptions::new().with_max_payload_size(1500).validate().is_ok());
    }

    #[test]
    fn ipv6_only_requires_ipv6_address() {
        let options = EndpointOptions::new()
            .with_ipv6_only(true)
            .with_address(AddressValue::ipv4("127.0.0.1", 0).unwrap());
        assert!(matches!(options.validate(), Err(QuicError::InvalidArgument { .. })));
    }

    #[test]
    fn congestion_control_by_name_or_code() {
        assert_eq!("BBR".parse::<CongestionControl>().unwrap(), CongestionControl::Bbr);
        assert_eq!(CongestionControl::try_from(1).unwrap(), CongestionControl::Reno);
        assert!("vegas".parse::<CongestionControl>().is_err());
        assert!(CongestionControl::try_from(9).is_err());
        assert_eq!(CongestionControl::Bbr2.code(), 3);
    }

    #[test]
    fn preferred_address_policy_parses_known_names() {
        assert_eq!(
            "ignore".parse::<PreferredAddressPolicy>().unwrap(),
            PreferredAddressPolicy::Ignore
        );
        assert!("sometimes".parse::<PreferredAddressPolicy>().is_err());
    }

    #[test]
    fn version_bounds_are_ordered() {
        let options = SessionOptions::new().with_versions(QUIC_VERSION_2, QUIC_VERSION_1);
        assert!(options.validate(Side::Client).is_err());
    }

    #[test]
    fn tls_entries_are_checked_individually() {
        let tls = TlsOptions::default().with_certs(vec![vec![1u8, 2, 3], Vec::new()]);
        let options = SessionOptions::new().with_tls(tls);
        match options.validate(Side::Server) {
            Err(QuicError::InvalidValue { name, .. }) => assert_eq!(name, "tls.certs[1]"),
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn alpn_length_is_limited() {
        let tls = TlsOptions::default().with_alpn("x".repeat(256));
        assert!(SessionOptions::new().with_tls(tls).validate(Side::Client).is_err());
    }

    #[test]
    fn transport_param_limits() {
        let mut params = TransportParams::default();
        params.ack_delay_exponent = 21;
        assert!(SessionOptions::new()
            .with_transport_params(params)
            .validate(Side::Client)
            .is_err());

        let mut params = TransportParams::default();
        params.active_connection_id_limit = 1;
        assert!(SessionOptions::new()
            .with_transport_params(params)
            .validate(Side::Server)
            .is_err());
    }

    #[test]
    fn preferred_addresses_must_match_family() {
        let mut params = TransportParams::default();
        params.preferred_address.ipv6 = Some(AddressValue::ipv4("10.0.0.1", 443).unwrap());
        assert!(matches!(
            SessionOptions::new().with_transport_params(params).validate(Side::Server),
            Err(QuicError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn empty_session_ticket_is_rejected() {
        let options = SessionOptions::new().with_session_ticket(Vec::new());
        assert!(options.validate(Side::Client).is_err());
    }

    #[test]
    fn one_or_many_accepts_single_entry() {
        let one: OneOrMany<Vec<u8>> = vec![9u8].into();
        assert_eq!(one.len(), 1);
        assert!(OneOrMany::<Vec<u8>>::default().is_empty());
    }
}
