mod common;

use common::{is_invalid_state, session_callbacks, stream_callbacks, Pair, Recorder};
use quicmgr::engine::loopback::StreamKey;
use quicmgr::{
    Direction, ErrorType, Headers, HeadersKind, PriorityFlags, QuicError, Side, Stream,
    StreamCallbacks, StreamPriority,
};

#[cfg(test)]
mod stream_events {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    fn application_code(error: &QuicError) -> Option<u64> {
        match error {
            QuicError::Transport(error) if error.error_type == ErrorType::Application => {
                Some(error.code)
            }
            _ => None,
        }
    }

    /// A pair whose server records inbound streams.
    fn pair_with_inbound(stream: StreamCallbacks) -> (Pair, Recorder<Stream>) {
        let inbound = Recorder::new();
        let sink = inbound.clone();
        let pair = Pair::with_callbacks(
            session_callbacks().on_stream(move |_, stream| sink.push(stream)),
            stream,
        );
        (pair, inbound)
    }

    // ==========================
    // Identity
    // ==========================
    #[tokio::test]
    async fn test_unidirectional_stream_keeps_its_direction() {
        let (pair, inbound) = pair_with_inbound(stream_callbacks());
        let stream = pair.session.open_unidirectional_stream().unwrap();
        assert_eq!(stream.direction(), Direction::Uni);
        assert_eq!(stream.id(), 2);
        assert_eq!(stream.origin(), Side::Client);

        pair.network.run_until_idle();
        let remote = inbound.take();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].direction(), Direction::Uni);
        assert_eq!(remote[0].id(), stream.id());
        assert_eq!(remote[0].origin(), Side::Client);

        pair.network
            .finish_stream(StreamKey::of(&stream).unwrap());
        pair.network.run_until_idle();
        assert!(stream.is_destroyed());
        assert_eq!(stream.direction(), Direction::Uni);
        assert!(remote[0].is_destroyed());
        assert_eq!(remote[0].direction(), Direction::Uni);
    }

    #[tokio::test]
    async fn test_stream_ids_advance_per_direction() {
        let pair = Pair::new();
        let ids: Vec<u64> = [Direction::Bidi, Direction::Bidi, Direction::Uni, Direction::Bidi]
            .into_iter()
            .map(|direction| pair.session.open_stream(direction, None).unwrap().id())
            .collect();
        assert_eq!(ids, vec![0, 4, 2, 8]);
        assert_eq!(pair.session.stream_count(), 4);
    }

    #[tokio::test]
    async fn test_server_opened_streams_carry_the_server_bit() {
        let (pair, _) = pair_with_inbound(stream_callbacks());
        let stream = pair.server_session().open_bidirectional_stream().unwrap();
        assert_eq!(stream.id(), 1);
        assert_eq!(stream.origin(), Side::Server);
    }

    // ==========================
    // Peer events
    // ==========================
    #[tokio::test]
    async fn test_reset_is_delivered_to_the_peer() {
        let resets = Recorder::new();
        let sink = resets.clone();
        let callbacks = stream_callbacks().on_reset(move |stream, error| {
            sink.push((stream.id(), application_code(error)));
        });
        let (pair, inbound) = pair_with_inbound(callbacks);
        let stream = pair.session.open_bidirectional_stream().unwrap();
        pair.network.run_until_idle();

        stream.reset(5).unwrap();
        assert!(stream.state().reset);
        pair.network.run_until_idle();

        assert_eq!(resets.take(), vec![(stream.id(), Some(5))]);
        let remote = &inbound.snapshot()[0];
        assert!(!remote.is_destroyed());
    }

    #[tokio::test]
    async fn test_blocked_headers_and_trailers_reach_the_stream() {
        let blocked = Recorder::new();
        let seen = Recorder::new();
        let trailers = Recorder::new();
        let (blocked_sink, seen_sink, trailer_sink) = (blocked.clone(), seen.clone(), trailers.clone());
        let callbacks = stream_callbacks()
            .on_blocked(move |stream| blocked_sink.push(stream.id()))
            .on_headers(move |_, headers, kind| seen_sink.push((headers.clone(), kind)))
            .on_trailers(move |_, headers| trailer_sink.push(headers.clone()));
        let pair = Pair::with_callbacks(session_callbacks(), callbacks);

        let stream = pair.session.open_bidirectional_stream().unwrap();
        let key = StreamKey::of(&stream).unwrap();
        let response = headers(&[(":status", "200")]);
        let trailer = headers(&[("grpc-status", "0")]);

        assert!(pair.network.block_stream(key));
        assert!(pair
            .network
            .deliver_headers(key, response.clone(), HeadersKind::Initial));
        assert!(pair.network.deliver_trailers(key, trailer.clone()));
        assert!(!stream.is_blocked());
        pair.network.run_until_idle();

        assert_eq!(blocked.take(), vec![stream.id()]);
        assert!(stream.is_blocked());
        assert_eq!(seen.take(), vec![(response.clone(), HeadersKind::Initial)]);
        assert_eq!(stream.headers(), Some((response, HeadersKind::Initial)));
        assert_eq!(trailers.take(), vec![trailer.clone()]);
        assert_eq!(stream.trailers(), Some(trailer));
        assert_eq!(pair.session.stats().block_count, 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_events_are_not_emitted() {
        let pair = Pair::new();
        let stream = pair.session.open_bidirectional_stream().unwrap();
        pair.network.run_until_idle();

        let key = StreamKey::of(&stream).unwrap();
        assert!(pair.network.block_stream(key));
        assert!(pair
            .network
            .deliver_headers(key, headers(&[(":path", "/")]), HeadersKind::Initial));
        assert_eq!(pair.network.run_until_idle(), 0);
        assert!(!stream.is_blocked());
        assert_eq!(stream.headers(), None);
    }

    #[tokio::test]
    async fn test_stream_failure_reports_the_error_on_both_sides() {
        let errors = Recorder::new();
        let sink = errors.clone();
        let callbacks = StreamCallbacks::new().on_error(move |stream, error| {
            sink.push((stream.origin(), application_code(error)));
        });
        let (pair, inbound) = pair_with_inbound(callbacks);
        let stream = pair.session.open_bidirectional_stream().unwrap();
        pair.network.run_until_idle();

        assert!(pair
            .network
            .fail_stream(StreamKey::of(&stream).unwrap(), 0x10c));
        pair.network.run_until_idle();

        let errors = errors.take();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|(_, code)| *code == Some(0x10c)));
        assert!(stream.is_destroyed());
        assert!(inbound.snapshot()[0].is_destroyed());
        assert_eq!(pair.session.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_streams_stay_listed_until_the_session_closes() {
        let pair = Pair::new();
        let first = pair.session.open_bidirectional_stream().unwrap();
        let second = pair.session.open_bidirectional_stream().unwrap();
        pair.network.run_until_idle();
        assert_eq!(pair.session.streams().len(), 2);

        assert!(pair.network.finish_stream(StreamKey::of(&first).unwrap()));
        pair.network.run_until_idle();
        assert!(first.is_destroyed());
        assert!(!pair.session.is_destroyed());
        assert_eq!(pair.session.streams(), vec![first.clone(), second.clone()]);
        assert_eq!(pair.session.stream_count(), 1);

        pair.session.destroy(None);
        assert!(second.is_destroyed());
        assert!(pair.session.streams().is_empty());
        assert_eq!(pair.session.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_clean_finish_does_not_fire_on_error() {
        let errors = Recorder::new();
        let sink = errors.clone();
        let pair = Pair::with_callbacks(
            session_callbacks(),
            StreamCallbacks::new().on_error(move |_, error| sink.push(error.clone())),
        );
        let stream = pair.session.open_bidirectional_stream().unwrap();
        pair.network.run_until_idle();

        assert!(pair.network.finish_stream(StreamKey::of(&stream).unwrap()));
        pair.network.run_until_idle();
        assert!(stream.is_destroyed());
        assert!(stream.stats().detached);
        assert!(errors.take().is_empty());
    }

    #[tokio::test]
    async fn test_per_stream_callbacks_replace_the_endpoint_defaults() {
        let defaults = Recorder::new();
        let overrides = Recorder::new();
        let (default_sink, override_sink) = (defaults.clone(), overrides.clone());
        let pair = Pair::with_callbacks(
            session_callbacks(),
            stream_callbacks().on_blocked(move |_| default_sink.push("default")),
        );

        let custom = StreamCallbacks::new()
            .on_error(|_, _| {})
            .on_blocked(move |_| override_sink.push("override"));
        let stream = pair
            .session
            .open_stream(Direction::Bidi, Some(custom))
            .unwrap();
        assert!(pair.network.block_stream(StreamKey::of(&stream).unwrap()));
        pair.network.run_until_idle();

        assert_eq!(overrides.take(), vec!["override"]);
        assert!(defaults.take().is_empty());
    }

    #[tokio::test]
    async fn test_per_stream_callbacks_are_validated() {
        let pair = Pair::new();
        let missing_error = StreamCallbacks::new().on_blocked(|_| {});
        let result = pair.session.open_stream(Direction::Bidi, Some(missing_error));
        assert!(matches!(result, Err(QuicError::InvalidArgument { .. })));
        assert_eq!(pair.session.stream_count(), 0);
    }

    // ==========================
    // Local operations
    // ==========================
    #[tokio::test]
    async fn test_priority_and_stop_sending_on_a_live_stream() {
        let pair = Pair::new();
        let stream = pair.session.open_bidirectional_stream().unwrap();
        assert_eq!(stream.priority(), Some(StreamPriority::Default));

        stream
            .set_priority(StreamPriority::High, PriorityFlags::NonIncremental)
            .unwrap();
        assert_eq!(stream.priority(), Some(StreamPriority::High));

        stream.stop_sending(3).unwrap();
        assert!(stream.state().read_ended);
    }

    #[tokio::test]
    async fn test_operations_after_session_destroy_fail() {
        let errors = Recorder::new();
        let sink = errors.clone();
        let pair = Pair::with_callbacks(
            session_callbacks(),
            StreamCallbacks::new()
                .on_error(move |_, error| sink.push(error.clone()))
                .on_headers(|_, _, _| panic!("no headers after destroy")),
        );
        let stream = pair.session.open_bidirectional_stream().unwrap();
        let key = StreamKey::of(&stream).unwrap();
        pair.network.run_until_idle();

        let error = QuicError::application(9, "gone");
        pair.session.destroy(Some(error.clone()));
        assert_eq!(errors.take(), vec![error]);
        assert!(stream.is_destroyed());

        assert!(is_invalid_state(&stream.reset(1)));
        assert!(is_invalid_state(&stream.stop_sending(1)));
        assert!(is_invalid_state(
            &stream.set_priority(StreamPriority::Low, PriorityFlags::None)
        ));
        assert_eq!(stream.priority(), None);

        assert!(!pair
            .network
            .deliver_headers(key, headers(&[(":status", "204")]), HeadersKind::Informational));
        pair.network.run_until_idle();
        assert!(errors.take().is_empty());
        assert!(stream.state().destroyed);
    }
}
