//! Single-fire completion handles
//!
//! Every `send` produces a [`Completion`] held by the coordinator and a
//! [`Delivery`] returned to the caller. `Completion::resolve` consumes the
//! handle, so a request can only ever be resolved once. If the coordinator
//! drops a completion without resolving it, the delivery yields
//! [`DispatchError::Shutdown`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::RequestId;
use crate::error::DispatchError;
use crate::message::CompiledMessage;

/// Outcome of one `send`
pub type DeliveryResult = Result<CompiledMessage, DispatchError>;

/// Coordinator side of a request's completion
#[derive(Debug)]
pub struct Completion {
    id: RequestId,
    tx: oneshot::Sender<DeliveryResult>,
}

impl Completion {
    /// Create a linked completion/delivery pair
    #[must_use]
    pub fn pair() -> (Self, Delivery) {
        let id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        (
            Self { id, tx },
            Delivery {
                id,
                state: State::Pending(rx),
            },
        )
    }

    /// The request this completion belongs to
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Resolve the request
    ///
    /// Returns `false` if the caller already dropped its [`Delivery`].
    pub fn resolve(self, result: DeliveryResult) -> bool {
        self.tx.send(result).is_ok()
    }
}

#[derive(Debug)]
enum State {
    Pending(oneshot::Receiver<DeliveryResult>),
    Ready(Option<DeliveryResult>),
}

/// Caller side of a request's completion
///
/// Resolves with the compiled message once the relay queued it, or with the
/// reason the request failed.
#[derive(Debug)]
#[must_use = "a delivery does nothing unless awaited"]
pub struct Delivery {
    id: RequestId,
    state: State,
}

impl Delivery {
    /// A delivery that is already resolved with `error`
    pub(crate) fn rejected(error: DispatchError) -> Self {
        Self {
            id: RequestId::new(),
            state: State::Ready(Some(Err(error))),
        }
    }

    /// The request id, as logged by the dispatcher
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for Delivery {
    type Output = DeliveryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            State::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(DispatchError::Shutdown))),
            State::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(DispatchError::Shutdown)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;

    #[tokio::test]
    async fn test_resolve_reaches_delivery() {
        let (completion, delivery) = Completion::pair();
        assert_eq!(completion.id(), delivery.id());

        assert!(completion.resolve(Err(DispatchError::NotQueued)));
        assert!(matches!(delivery.await, Err(DispatchError::NotQueued)));
    }

    #[tokio::test]
    async fn test_dropped_completion_is_shutdown() {
        let (completion, delivery) = Completion::pair();
        drop(completion);

        assert!(matches!(delivery.await, Err(DispatchError::Shutdown)));
    }

    #[tokio::test]
    async fn test_rejected_delivery_is_immediate() {
        let delivery = Delivery::rejected(DispatchError::NotReady);
        assert!(matches!(delivery.await, Err(DispatchError::NotReady)));
    }

    #[test]
    fn test_resolve_after_caller_left() {
        let (completion, delivery) = Completion::pair();
        drop(delivery);

        assert!(!completion.resolve(Err(DispatchError::BuildFailed(BuildError::NoSender))));
    }
}
