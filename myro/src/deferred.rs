//! Single assignment results, filled in by the connection worker.
use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll, Waker},
};

use crate::{Error, Result, error::ConnectionClosed};

struct Shared<T> {
    value: Option<Result<T>>,
    wakers: Vec<Waker>,
}

/// Create a linked completion handle and result future.
pub fn deferred<T>() -> (Complete<T>, Deferred<T>) {
    let shared = Arc::new(Mutex::new(Shared { value: None, wakers: Vec::new() }));
    (
        Complete { shared: Arc::clone(&shared), settled: false },
        Deferred { shared },
    )
}

/// Write half of a [`Deferred`].
///
/// Dropping an unsettled `Complete` rejects the result with
/// [`ConnectionClosed`], so a crashing worker never strands a waiter.
pub struct Complete<T> {
    shared: Arc<Mutex<Shared<T>>>,
    settled: bool,
}

impl<T> Complete<T> {
    pub fn resolve(mut self, value: T) {
        self.settle(Ok(value));
    }

    pub fn reject(mut self, error: Error) {
        self.settle(Err(error));
    }

    fn settle(&mut self, result: Result<T>) {
        self.settled = true;
        let wakers = {
            let mut shared = self.shared.lock().unwrap();
            // first settle wins
            if shared.value.is_none() {
                shared.value = Some(result);
            }
            std::mem::take(&mut shared.wakers)
        };
        // wake in registration order
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T> Drop for Complete<T> {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(Err(ConnectionClosed.into()));
        }
    }
}

impl<T> std::fmt::Debug for Complete<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Complete")
    }
}

pin_project_lite::pin_project! {
    /// Future of a result that arrives through a [`Complete`].
    pub struct Deferred<T> {
        shared: Arc<Mutex<Shared<T>>>,
    }
}

impl<T> Future for Deferred<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let mut shared = this.shared.lock().unwrap();
        match shared.value.take() {
            Some(result) => Poll::Ready(result),
            None => {
                if !shared.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    shared.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Deferred")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn resolve_before_await() {
        let (tx, rx) = deferred();
        tx.resolve(7);
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn resolve_wakes_waiter() {
        let (tx, rx) = deferred();
        let waiter = tokio::spawn(rx);
        tokio::task::yield_now().await;
        tx.resolve("done");
        assert_eq!(waiter.await.unwrap().unwrap(), "done");
    }

    #[tokio::test]
    async fn reject_passes_error() {
        let (tx, rx) = deferred::<()>();
        tx.reject(ConnectionClosed.into());
        assert!(matches!(rx.await.unwrap_err().kind(), ErrorKind::Closed(_)));
    }

    #[tokio::test]
    async fn dropped_complete_rejects() {
        let (tx, rx) = deferred::<()>();
        drop(tx);
        assert!(matches!(rx.await.unwrap_err().kind(), ErrorKind::Closed(_)));
    }
}
