//! Single-writer append-then-seal channel.
//!
//! A [`StreamHandle`] supports `update` while open and `done` exactly
//! once, after which every further call is a rejected no-op. The paired
//! [`StreamReader`] is a finite, non-restartable stream that observes
//! events in emission order and terminates after the seal. Dropping the
//! reader makes `update` return `false`, which producers treat as a
//! cancellation signal.

use futures::Stream;
use futures::channel::mpsc;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent<T> {
    /// Incremental value pushed while the handle is open.
    Update(T),
    /// Final value; the handle is sealed, nothing follows.
    Done(T),
}

/// Writer half. Not cloneable: exactly one producer per handle.
pub struct StreamHandle<T> {
    tx: mpsc::UnboundedSender<StreamEvent<T>>,
    sealed: Arc<AtomicBool>,
}

/// Reader half: a lazy, finite sequence of [`StreamEvent`]s.
pub struct StreamReader<T> {
    rx: mpsc::UnboundedReceiver<StreamEvent<T>>,
    finished: bool,
}

/// Create a connected handle/reader pair.
pub fn channel<T>() -> (StreamHandle<T>, StreamReader<T>) {
    let (tx, rx) = mpsc::unbounded();
    (
        StreamHandle {
            tx,
            sealed: Arc::new(AtomicBool::new(false)),
        },
        StreamReader {
            rx,
            finished: false,
        },
    )
}

impl<T> StreamHandle<T> {
    /// Push an incremental value. Returns `false` once the handle is
    /// sealed or the reader is gone; producers should stop on `false`.
    pub fn update(&self, value: T) -> bool {
        if self.sealed.load(Ordering::Acquire) {
            return false;
        }
        self.tx.unbounded_send(StreamEvent::Update(value)).is_ok()
    }

    /// Seal the handle with its final value. Fires at most once;
    /// returns `false` if the handle was already sealed.
    pub fn done(&self, value: T) -> bool {
        if self
            .sealed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        // Reader may already be gone; the seal still holds.
        let _ = self.tx.unbounded_send(StreamEvent::Done(value));
        true
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}

impl<T> Stream for StreamReader<T> {
    type Item = StreamEvent<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.rx).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                if matches!(event, StreamEvent::Done(_)) {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            // Writer dropped without sealing: the sequence ends without
            // a Done event, which consumers read as an aborted stream.
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> StreamReader<T> {
    /// Drain the stream, returning the sealed final value, or `None`
    /// if the writer went away without sealing.
    pub async fn final_value(mut self) -> Option<T> {
        use futures::StreamExt;
        while let Some(event) = self.next().await {
            if let StreamEvent::Done(value) = event {
                return Some(value);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let (handle, reader) = channel::<String>();
        assert!(handle.update("a".into()));
        assert!(handle.update("b".into()));
        assert!(handle.done("ab".into()));

        let events: Vec<_> = reader.collect().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Update("a".into()),
                StreamEvent::Update("b".into()),
                StreamEvent::Done("ab".into()),
            ]
        );
    }

    #[tokio::test]
    async fn done_fires_at_most_once() {
        let (handle, reader) = channel::<u32>();
        assert!(handle.done(1));
        assert!(!handle.done(2));
        assert!(handle.is_sealed());

        let events: Vec<_> = reader.collect().await;
        assert_eq!(events, vec![StreamEvent::Done(1)]);
    }

    #[tokio::test]
    async fn update_after_done_is_rejected() {
        let (handle, reader) = channel::<u32>();
        assert!(handle.update(1));
        assert!(handle.done(2));
        assert!(!handle.update(3));

        let events: Vec<_> = reader.collect().await;
        assert_eq!(events, vec![StreamEvent::Update(1), StreamEvent::Done(2)]);
    }

    #[tokio::test]
    async fn dropped_reader_rejects_updates() {
        let (handle, reader) = channel::<u32>();
        drop(reader);
        assert!(!handle.update(1));
    }

    #[tokio::test]
    async fn reader_ends_without_done_when_writer_drops() {
        let (handle, reader) = channel::<u32>();
        handle.update(1);
        drop(handle);
        assert_eq!(reader.final_value().await, None);
    }

    #[tokio::test]
    async fn final_value_returns_sealed_value() {
        let (handle, reader) = channel::<String>();
        handle.update("partial".into());
        handle.done("full".into());
        assert_eq!(reader.final_value().await, Some("full".into()));
    }
}
