//! Read-only statistics and state snapshots.
//!
//! Snapshots are copied out of the native handle on every read while the
//! owning entity is alive. When the entity closes, the last snapshot is kept
//! with `detached` set and never changes again.

use serde_derive::{Deserialize, Serialize};

use crate::callbacks::{SessionSubscriptions, StreamSubscriptions};

/// Timestamps are nanoseconds on the engine's monotonic clock.
pub type Timestamp = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointStats {
    pub created_at: Timestamp,
    pub destroyed_at: Timestamp,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub server_sessions: u64,
    pub client_sessions: u64,
    pub server_busy_count: u64,
    pub detached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointState {
    pub bound: bool,
    pub listening: bool,
    pub closing: bool,
    pub busy: bool,
    pub referenced: bool,
    pub pending_callbacks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub created_at: Timestamp,
    pub handshake_completed_at: Timestamp,
    pub handshake_confirmed_at: Timestamp,
    pub graceful_closing_at: Timestamp,
    pub closing_at: Timestamp,
    pub destroyed_at: Timestamp,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub bidi_stream_count: u64,
    pub uni_stream_count: u64,
    pub inbound_streams_count: u64,
    pub outbound_streams_count: u64,
    pub key_update_count: u64,
    pub retransmit_count: u64,
    pub max_bytes_in_flight: u64,
    pub bytes_in_flight: u64,
    pub block_count: u64,
    pub cwnd: u64,
    pub latest_rtt: u64,
    pub min_rtt: u64,
    pub rtt_var: u64,
    pub smoothed_rtt: u64,
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub datagrams_acknowledged: u64,
    pub datagrams_lost: u64,
    pub detached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub handshake_completed: bool,
    pub handshake_confirmed: bool,
    pub stream_open_allowed: bool,
    pub priority_supported: bool,
    pub graceful_closing: bool,
    pub closing: bool,
    pub destroyed: bool,
    pub using_preferred_address: bool,
    pub silent_close: bool,
    pub subscriptions: SessionSubscriptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub created_at: Timestamp,
    pub received_at: Timestamp,
    pub acked_at: Timestamp,
    pub closing_at: Timestamp,
    pub destroyed_at: Timestamp,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub max_offset: u64,
    pub max_offset_acknowledged: u64,
    pub max_offset_received: u64,
    pub final_size: u64,
    pub detached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamState {
    pub fin_sent: bool,
    pub fin_received: bool,
    pub read_ended: bool,
    pub write_ended: bool,
    pub reset: bool,
    pub paused: bool,
    pub destroyed: bool,
    pub subscriptions: StreamSubscriptions,
}

macro_rules! detachable {
    ($($ty:ty),*) => {
        $(
            impl $ty {
                pub(crate) fn detach(mut self) -> Self {
                    self.detached = true;
                    self
                }
            }
        )*
    };
}

detachable!(EndpointStats, SessionStats, StreamStats);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_freezes_a_copy() {
        let live = SessionStats {
            bytes_sent: 42,
            ..Default::default()
        };
        let frozen = live.detach();
        assert!(frozen.detached);
        assert_eq!(frozen.bytes_sent, 42);
        assert!(!live.detached);
    }
}
