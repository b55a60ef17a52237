use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use crate::errors::QuicError;

pub type CloseResult = Result<(), QuicError>;

/// A one-shot completion shared by every caller that asks for it.
///
/// `Endpoint::close`, `Session::close` and `Session::handshake_completed` hand
/// out clones of the same instance; each clone resolves to the same result.
#[derive(Clone)]
pub struct ClosedFuture {
    inner: Shared<BoxFuture<'static, CloseResult>>,
    identity: Arc<()>,
}

impl ClosedFuture {
    /// True when both values are clones of the same completion.
    pub fn is_same(&self, other: &ClosedFuture) -> bool {
        Arc::ptr_eq(&self.identity, &other.identity)
    }

    /// Non-blocking check; `None` while pending.
    pub fn peek(&self) -> Option<CloseResult> {
        self.inner.peek().cloned()
    }
}

impl Future for ClosedFuture {
    type Output = CloseResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl fmt::Debug for ClosedFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosedFuture")
            .field("settled", &self.peek())
            .finish()
    }
}

/// The settling side of a `ClosedFuture`. The first settle wins.
pub(crate) struct CloseSignal {
    tx: Option<oneshot::Sender<CloseResult>>,
    future: ClosedFuture,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        let inner = rx
            .map(|received| match received {
                Ok(result) => result,
                Err(_) => Err(QuicError::invalid_state("closed without completing")),
            })
            .boxed()
            .shared();
        Self {
            tx: Some(tx),
            future: ClosedFuture {
                inner,
                identity: Arc::new(()),
            },
        }
    }

    pub(crate) fn settled(result: CloseResult) -> Self {
        let mut signal = Self::new();
        signal.settle(result);
        signal
    }

    pub(crate) fn future(&self) -> ClosedFuture {
        self.future.clone()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.tx.is_none()
    }

    pub(crate) fn settle(&mut self, result: CloseResult) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // Nobody may be waiting; that is fine.
                let _ = tx.send(result);
                // Drive the shared future so `peek` sees the result.
                let _ = self.future.clone().now_or_never();
                true
            }
            None => false,
        }
    }
}
