use core::pin::Pin;
use core::task::{Context, Poll};
use futures::Stream;
use pin_project_lite::pin_project;

/// Upper bound on the items reserved up front for a batch; larger batches grow on demand.
const MAX_PREALLOCATED_ITEMS: usize = 1024;

// Implementation adapted from:
//  https://github.com/tokio-rs/tokio/blob/master/tokio-stream/src/stream_ext/chunks_timeout.rs.
pin_project! {
    /// A stream adapter that groups items into batches of at most `max_size` items.
    ///
    /// Items keep their insertion order. A batch is emitted as soon as it is full, and the
    /// partial last batch is emitted when the inner stream ends. Empty batches are never emitted.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct BatchStream<B, S: Stream<Item = B>> {
        #[pin]
        stream: S,
        items: Vec<S::Item>,
        max_size: usize,
        inner_stream_ended: bool,
    }
}

impl<B, S: Stream<Item = B>> BatchStream<B, S> {
    /// Creates a new [`BatchStream`].
    ///
    /// A `max_size` of zero is treated as one.
    pub fn wrap(stream: S, max_size: usize) -> Self {
        let max_size = max_size.max(1);

        BatchStream {
            stream,
            items: Vec::with_capacity(max_size.min(MAX_PREALLOCATED_ITEMS)),
            max_size,
            inner_stream_ended: false,
        }
    }
}

impl<B, S: Stream<Item = B>> Stream for BatchStream<B, S> {
    type Item = Vec<S::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.inner_stream_ended {
            return Poll::Ready(None);
        }

        loop {
            if this.items.is_empty() {
                this.items
                    .reserve_exact((*this.max_size).min(MAX_PREALLOCATED_ITEMS));
            }

            match this.stream.as_mut().poll_next(cx) {
                // A partially filled batch waits for more items instead of being flushed early.
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(item)) => {
                    this.items.push(item);

                    if this.items.len() >= *this.max_size {
                        return Poll::Ready(Some(std::mem::take(this.items)));
                    }
                }
                Poll::Ready(None) => {
                    let last = if this.items.is_empty() {
                        None
                    } else {
                        Some(std::mem::take(this.items))
                    };

                    *this.inner_stream_ended = true;

                    return Poll::Ready(last);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, stream};

    #[tokio::test]
    async fn test_batches_keep_order_and_flush_partial_tail() {
        let batches: Vec<Vec<i32>> = BatchStream::wrap(stream::iter(1..=5), 2).collect().await;

        assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[tokio::test]
    async fn test_empty_stream_yields_no_batch() {
        let batches: Vec<Vec<i32>> = BatchStream::wrap(stream::iter(Vec::new()), 3).collect().await;

        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_batch() {
        let batches: Vec<Vec<i32>> = BatchStream::wrap(stream::iter(1..=4), 2).collect().await;

        assert_eq!(batches.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_size_is_treated_as_one() {
        let batches: Vec<Vec<i32>> = BatchStream::wrap(stream::iter(1..=2), 0).collect().await;

        assert_eq!(batches, vec![vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn test_huge_size_does_not_preallocate_it() {
        let batches: Vec<Vec<i32>> =
            BatchStream::wrap(stream::iter(1..=3), usize::MAX).collect().await;

        assert_eq!(batches, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_preallocation_is_capped() {
        let batches = BatchStream::wrap(stream::iter(1..=3), usize::MAX);

        assert!(batches.items.capacity() <= MAX_PREALLOCATED_ITEMS);
    }
}
