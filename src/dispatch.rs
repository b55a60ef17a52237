use tokio::sync::mpsc;
use tracing::trace;

use crate::endpoint::Endpoint;
use crate::native::TransportEvent;
use crate::session::Session;
use crate::stream::Stream;

/// Routes transport events to the entity that owns the native handle.
///
/// Events whose owner slot is empty or whose entity has already gone away
/// are stale and dropped.
pub struct TransportCallbacks;

impl TransportCallbacks {
    pub fn dispatch(event: TransportEvent) {
        let name = event.name();
        match event {
            TransportEvent::EndpointDone(owner) => match owner.get() {
                Some(shared) => Endpoint::from_shared(shared).finish_close(None),
                None => trace!(event = name, "dropping stale endpoint event"),
            },
            TransportEvent::EndpointError {
                owner,
                context,
                code,
            } => match owner.get() {
                Some(shared) => Endpoint::from_shared(shared).finish_close(context.into_error(code)),
                None => trace!(event = name, ?context, code, "dropping stale endpoint event"),
            },
            TransportEvent::SessionNew { owner, mut session } => match owner.get() {
                Some(shared) => Endpoint::from_shared(shared).accept_session(session),
                None => {
                    trace!(event = name, "endpoint gone, destroying inbound session");
                    session.destroy();
                }
            },
            TransportEvent::SessionClose(owner) => match owner.get() {
                Some(shared) => Session::from_shared(shared).finish_close(None),
                None => trace!(event = name, "dropping stale session event"),
            },
            TransportEvent::SessionError { owner, error } => match owner.get() {
                Some(shared) => Session::from_shared(shared).finish_close(Some(error.into())),
                None => trace!(event = name, %error, "dropping stale session event"),
            },
            TransportEvent::SessionDatagram {
                owner,
                payload,
                early,
            } => match owner.get() {
                Some(shared) => Session::from_shared(shared).on_datagram(payload, early),
                None => trace!(event = name, "dropping stale session event"),
            },
            TransportEvent::SessionDatagramStatus { owner, id, status } => match owner.get() {
                Some(shared) => Session::from_shared(shared).on_datagram_status(id, status),
                None => trace!(event = name, id, "dropping stale session event"),
            },
            TransportEvent::SessionHandshake { owner, info } => match owner.get() {
                Some(shared) => Session::from_shared(shared).on_handshake(info),
                None => trace!(event = name, "dropping stale session event"),
            },
            TransportEvent::SessionTicket { owner, ticket } => match owner.get() {
                Some(shared) => Session::from_shared(shared).on_session_ticket(ticket),
                None => trace!(event = name, "dropping stale session event"),
            },
            TransportEvent::SessionVersionNegotiation { owner, info } => match owner.get() {
                Some(shared) => Session::from_shared(shared).on_version_negotiation(info),
                None => trace!(event = name, "dropping stale session event"),
            },
            TransportEvent::SessionPathValidation { owner, info } => match owner.get() {
                Some(shared) => Session::from_shared(shared).on_path_validation(info),
                None => trace!(event = name, "dropping stale session event"),
            },
            TransportEvent::StreamCreated { owner, mut stream } => match owner.get() {
                Some(shared) => Session::from_shared(shared).accept_stream(stream),
                None => {
                    trace!(event = name, "session gone, destroying inbound stream");
                    stream.destroy();
                }
            },
            TransportEvent::StreamClose(owner) => match owner.get() {
                Some(shared) => Stream::from_shared(shared).finish_close(None),
                None => trace!(event = name, "dropping stale stream event"),
            },
            TransportEvent::StreamError { owner, error } => match owner.get() {
                Some(shared) => Stream::from_shared(shared).finish_close(Some(error.into())),
                None => trace!(event = name, %error, "dropping stale stream event"),
            },
            TransportEvent::StreamReset { owner, error } => match owner.get() {
                Some(shared) => Stream::from_shared(shared).on_reset(error.into()),
                None => trace!(event = name, %error, "dropping stale stream event"),
            },
            TransportEvent::StreamBlocked(owner) => match owner.get() {
                Some(shared) => Stream::from_shared(shared).on_blocked(),
                None => trace!(event = name, "dropping stale stream event"),
            },
            TransportEvent::StreamHeaders {
                owner,
                headers,
                kind,
            } => match owner.get() {
                Some(shared) => Stream::from_shared(shared).on_headers(headers, kind),
                None => trace!(event = name, "dropping stale stream event"),
            },
            TransportEvent::StreamTrailers { owner, headers } => match owner.get() {
                Some(shared) => Stream::from_shared(shared).on_trailers(headers),
                None => trace!(event = name, "dropping stale stream event"),
            },
        }
    }
}

/// Sending half of the serialized event channel. Engines that run their own
/// threads or tasks push events here instead of dispatching directly.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    /// Returns false once the dispatcher has been dropped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                trace!(event = event.name(), "dispatcher gone, event discarded");
                false
            }
        }
    }
}

/// Receiving half: delivers events to [`TransportCallbacks`] one at a time.
#[derive(Debug)]
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

pub fn channel() -> (EventSink, Dispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, Dispatcher { rx })
}

impl Dispatcher {
    /// Dispatch until every sink is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            TransportCallbacks::dispatch(event);
        }
    }

    /// Dispatch everything queued so far, including events queued by the
    /// handlers themselves. Returns the number of events delivered.
    pub fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.rx.try_recv() {
            TransportCallbacks::dispatch(event);
            delivered += 1;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{EndpointOwner, SessionOwner, StreamOwner};

    #[test]
    fn unbound_owners_are_stale() {
        let (sink, mut dispatcher) = channel();
        assert!(sink.emit(TransportEvent::EndpointDone(EndpointOwner::new())));
        assert!(sink.emit(TransportEvent::SessionClose(SessionOwner::new())));
        assert!(sink.emit(TransportEvent::StreamBlocked(StreamOwner::new())));
        assert_eq!(dispatcher.drain(), 3);
        assert_eq!(dispatcher.drain(), 0);
    }

    #[test]
    fn emit_fails_without_dispatcher() {
        let (sink, dispatcher) = channel();
        drop(dispatcher);
        assert!(!sink.emit(TransportEvent::EndpointDone(EndpointOwner::new())));
    }

    #[tokio::test]
    async fn run_stops_when_sinks_are_dropped() {
        let (sink, dispatcher) = channel();
        sink.emit(TransportEvent::StreamClose(StreamOwner::new()));
        drop(sink);
        dispatcher.run().await;
    }
}
