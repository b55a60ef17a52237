use std::fmt;
use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6};

use serde_derive::{Deserialize, Serialize};

use crate::errors::QuicError;

const MAX_FLOW_LABEL: u32 = (1 << 20) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    Ipv4,
    Ipv6,
}

/// An immutable socket address: family, host, port and (IPv6 only) flow label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressValue {
    addr: SocketAddr,
}

impl AddressValue {
    pub fn new(family: Family, host: &str, port: u16, flow_label: u32) -> Result<Self, QuicError> {
        let ip: IpAddr = host.parse().map_err(|_| {
            QuicError::invalid_argument("address.host", format!("{host:?} is not an IP address"))
        })?;

        let addr = match (family, ip) {
            (Family::Ipv4, IpAddr::V4(ip)) => {
                if flow_label != 0 {
                    return Err(QuicError::invalid_argument(
                        "address.flow_label",
                        "flow labels are only valid for IPv6",
                    ));
                }
                SocketAddr::V4(SocketAddrV4::new(ip, port))
            }
            (Family::Ipv6, IpAddr::V6(ip)) => {
                if flow_label > MAX_FLOW_LABEL {
                    return Err(QuicError::invalid_argument(
                        "address.flow_label",
                        format!("{flow_label} does not fit in 20 bits"),
                    ));
                }
                SocketAddr::V6(SocketAddrV6::new(ip, port, flow_label, 0))
            }
            (family, _) => {
                return Err(QuicError::invalid_argument(
                    "address.host",
                    format!("{host:?} does not belong to family {family:?}"),
                ))
            }
        };

        Ok(Self { addr })
    }

    pub fn ipv4(host: &str, port: u16) -> Result<Self, QuicError> {
        Self::new(Family::Ipv4, host, port, 0)
    }

    pub fn ipv6(host: &str, port: u16) -> Result<Self, QuicError> {
        Self::new(Family::Ipv6, host, port, 0)
    }

    pub fn family(&self) -> Family {
        match self.addr {
            SocketAddr::V4(_) => Family::Ipv4,
            SocketAddr::V6(_) => Family::Ipv6,
        }
    }

    pub fn host(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn flow_label(&self) -> u32 {
        match self.addr {
            SocketAddr::V4(_) => 0,
            SocketAddr::V6(v6) => v6.flowinfo(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl From<SocketAddr> for AddressValue {
    fn from(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl From<AddressValue> for SocketAddr {
    fn from(value: AddressValue) -> Self {
        value.addr
    }
}

impl fmt::Display for AddressValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}

/// The local and remote addresses a session is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Path {
    pub local: AddressValue,
    pub remote: AddressValue,
}
