mod common;

use common::{address_of, endpoint, Pair, Recorder};
use quicmgr::engine::loopback::LoopbackNetwork;
use quicmgr::{
    CloseContext, Endpoint, EndpointCallbacks, EndpointOptions, ErrorCode, QuicError,
    SessionOptions,
};
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod endpoint_lifecycle {
    use super::*;

    // ==========================
    // Graceful close
    // ==========================
    #[tokio::test]
    async fn test_close_returns_the_same_future_every_time() {
        let network = LoopbackNetwork::new();
        let endpoint = endpoint(&network);

        let first = endpoint.close();
        let second = endpoint.close();
        assert!(first.is_same(&second));

        network.run_until_idle();
        assert_eq!(first.await, Ok(()));
        assert!(second.is_same(&endpoint.close()));
        assert_eq!(second.await, Ok(()));
    }

    #[tokio::test]
    async fn test_close_without_sessions_finishes_after_dispatch() {
        let network = LoopbackNetwork::new();
        let endpoint = endpoint(&network);
        assert!(endpoint.address().is_some());

        let closed = endpoint.close();
        assert!(closed.peek().is_none());
        assert!(!endpoint.is_closed());

        assert_eq!(network.run_until_idle(), 1);
        assert_eq!(closed.peek(), Some(Ok(())));
        assert!(endpoint.is_closed());
        assert_eq!(endpoint.address(), None);
        assert!(endpoint.stats().detached);
    }

    #[tokio::test]
    async fn test_close_waits_for_open_sessions() {
        let pair = Pair::new();
        let closed = pair.server.close();
        pair.network.run_until_idle();
        assert!(closed.peek().is_none());
        assert!(pair.server.state().closing);

        pair.session.destroy(None);
        pair.network.run_until_idle();
        assert_eq!(closed.await, Ok(()));
        assert!(pair.server_session().is_destroyed());
    }

    #[tokio::test]
    async fn test_closing_endpoint_rejects_new_work() {
        let network = LoopbackNetwork::new();
        let server = endpoint(&network);
        let _closing = server.close();

        assert!(common::is_invalid_state(&server.listen(SessionOptions::new())));
        let peer = endpoint(&network);
        let result = server.connect(address_of(&peer), SessionOptions::new());
        assert!(common::is_invalid_state(&result));
    }

    #[tokio::test]
    async fn test_listen_may_only_be_called_once() {
        let network = LoopbackNetwork::new();
        let server = endpoint(&network);
        server.listen(SessionOptions::new()).unwrap();
        assert!(server.is_listening());
        assert!(common::is_invalid_state(&server.listen(SessionOptions::new())));
    }

    // ==========================
    // Busy state
    // ==========================
    #[tokio::test]
    async fn test_connect_while_busy_fails_until_cleared() {
        let network = LoopbackNetwork::new();
        let server = endpoint(&network);
        server.listen(SessionOptions::new()).unwrap();
        let client = endpoint(&network);

        client.set_busy(true).unwrap();
        assert!(client.is_busy());
        let refused = client.connect(address_of(&server), SessionOptions::new());
        assert!(common::is_invalid_state(&refused));
        assert!(client.sessions().is_empty());

        client.set_busy(false).unwrap();
        let session = client
            .connect(address_of(&server), SessionOptions::new())
            .unwrap();
        network.run_until_idle();
        assert!(session.handshake_completed().peek().is_some());
        assert_eq!(client.sessions(), vec![session]);
    }

    #[tokio::test]
    async fn test_busy_server_refuses_inbound_sessions() {
        let network = LoopbackNetwork::new();
        let (server, accepted) = common::recording_endpoint(
            &network,
            common::session_callbacks(),
            common::stream_callbacks(),
        );
        server.listen(SessionOptions::new()).unwrap();
        server.set_busy(true).unwrap();

        let client = endpoint(&network);
        let session = client
            .connect(address_of(&server), SessionOptions::new())
            .unwrap();
        network.run_until_idle();

        assert_eq!(accepted.len(), 0);
        assert!(session.is_destroyed());
        match session.close().await {
            Err(QuicError::Transport(error)) => assert_eq!(error.kind, ErrorCode::ConnectionRefused),
            other => panic!("expected a refusal, got {other:?}"),
        }
        assert_eq!(server.stats().server_busy_count, 1);
    }

    #[tokio::test]
    async fn test_set_busy_after_close_is_invalid() {
        let network = LoopbackNetwork::new();
        let endpoint = endpoint(&network);
        let _ = endpoint.close();
        network.run_until_idle();
        assert!(common::is_invalid_state(&endpoint.set_busy(true)));
    }

    // ==========================
    // Cancellation
    // ==========================
    #[tokio::test]
    async fn test_cancelled_connect_creates_no_session() {
        let network = LoopbackNetwork::new();
        let server = endpoint(&network);
        server.listen(SessionOptions::new()).unwrap();
        let client = endpoint(&network);

        let token = CancellationToken::new();
        token.cancel();
        let result = client.connect_with_cancellation(address_of(&server), SessionOptions::new(), &token);
        assert!(matches!(result, Err(QuicError::Aborted(_))));
        assert!(client.sessions().is_empty());
        assert_eq!(network.run_until_idle(), 0);
        assert_eq!(client.stats().client_sessions, 0);

        let live = CancellationToken::new();
        let session = client
            .connect_with_cancellation(address_of(&server), SessionOptions::new(), &live)
            .unwrap();
        network.run_until_idle();
        assert_eq!(session.handshake_completed().await, Ok(()));
    }

    // ==========================
    // Failures and destroy
    // ==========================
    #[tokio::test]
    async fn test_bind_failure_is_reported_through_on_error() {
        let network = LoopbackNetwork::new();
        let first = endpoint(&network);
        let errors = Recorder::new();
        let sink = errors.clone();
        let callbacks = EndpointCallbacks::new()
            .on_session(|_| {})
            .on_error(move |error| sink.push(error.clone()));
        let options = EndpointOptions::new().with_address(address_of(&first));
        let second = Endpoint::new(&network, callbacks, options).unwrap();

        network.run_until_idle();
        let expected = QuicError::EndpointClosed {
            context: CloseContext::BindFailure,
            code: -98,
        };
        assert_eq!(errors.take(), vec![expected.clone()]);
        assert!(second.is_closed());
        assert_eq!(second.close().await, Err(expected));
        assert!(!first.is_closed());
    }

    #[tokio::test]
    async fn test_socket_failure_ends_sessions_and_the_endpoint() {
        let pair = Pair::new();
        let closed = pair.server.close();
        let address = address_of(&pair.server);
        assert!(pair
            .network
            .fail_endpoint(address, CloseContext::ReceiveFailure, -104));
        pair.network.run_until_idle();

        assert_eq!(
            closed.await,
            Err(QuicError::EndpointClosed {
                context: CloseContext::ReceiveFailure,
                code: -104
            })
        );
        assert!(pair.server_session().is_destroyed());
        assert!(pair.session.is_destroyed());
        assert_eq!(pair.session.close().await, Ok(()));
    }

    #[tokio::test]
    async fn test_destroy_closes_sessions_with_the_same_error() {
        let pair = Pair::new();
        let error = QuicError::application(42, "shutting down");
        pair.server.destroy(Some(error.clone()));

        assert!(pair.server.is_closed());
        assert_eq!(pair.server.close().await, Err(error.clone()));
        let server_session = pair.server_session();
        assert!(server_session.is_destroyed());
        assert_eq!(server_session.close().await, Err(error));

        pair.network.run_until_idle();
        assert!(pair.session.is_destroyed());
        assert_eq!(pair.session.close().await, Ok(()));
    }

    #[tokio::test]
    async fn test_destroy_twice_is_a_no_op() {
        let network = LoopbackNetwork::new();
        let endpoint = endpoint(&network);
        endpoint.destroy(None);
        endpoint.destroy(Some(QuicError::application(1, "late")));
        assert_eq!(endpoint.close().await, Ok(()));
        assert_eq!(network.run_until_idle(), 1);
    }
}
