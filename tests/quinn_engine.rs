#![cfg(feature = "quinn")]

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{session_callbacks, stream_callbacks, Recorder};
use quicmgr::engine::quinn::QuinnTransport;
use quicmgr::{
    AddressValue, Endpoint, EndpointCallbacks, EndpointOptions, Session, SessionOptions,
    TlsOptions,
};

#[cfg(test)]
mod quinn_engine {
    use super::*;

    fn transport() -> QuinnTransport {
        let (sink, dispatcher) = quicmgr::channel();
        tokio::spawn(dispatcher.run());
        QuinnTransport::new(sink).unwrap()
    }

    fn localhost() -> EndpointOptions {
        EndpointOptions::new().with_address(AddressValue::from(SocketAddr::from(([127, 0, 0, 1], 0))))
    }

    fn endpoint(transport: &QuinnTransport) -> (Endpoint, Recorder<Session>) {
        let accepted = Recorder::new();
        let sink = accepted.clone();
        let callbacks = EndpointCallbacks::new()
            .on_session(move |session| sink.push(session))
            .session(session_callbacks())
            .stream(stream_callbacks());
        (Endpoint::new(transport, callbacks, localhost()).unwrap(), accepted)
    }

    fn trusting() -> SessionOptions {
        SessionOptions::new().with_tls(TlsOptions::default().with_reject_unauthorized(false))
    }

    async fn eventually(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        done()
    }

    #[tokio::test]
    async fn test_inbound_session_path_uses_the_listener_port() {
        let transport = transport();
        let (server, accepted) = endpoint(&transport);
        server.listen(SessionOptions::new()).unwrap();
        let (client, _) = endpoint(&transport);
        let server_address = server.address().unwrap();

        let session = client.connect(server_address, trusting()).unwrap();
        assert_eq!(session.handshake_completed().await, Ok(()));
        assert!(eventually(|| accepted.len() == 1).await);

        let path = accepted.snapshot()[0].path().unwrap();
        assert_eq!(path.local.port(), server_address.port());
        assert_eq!(path.remote, client.address().unwrap());
    }

    #[tokio::test]
    async fn test_destroy_during_handshake_closes_the_connection() {
        let transport = transport();
        let (server, accepted) = endpoint(&transport);
        server.listen(SessionOptions::new()).unwrap();
        let (client, _) = endpoint(&transport);

        let session = client.connect(server.address().unwrap(), trusting()).unwrap();
        session.destroy(None);
        assert!(session.is_destroyed());

        // give the server time to finish its side of the handshake
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let closed = eventually(|| accepted.snapshot().iter().all(Session::is_destroyed)).await;
        assert!(closed, "the server still holds a live session");
    }
}
