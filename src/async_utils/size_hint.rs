//! Attaching a known length to a stream, so progress bars can show one.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;

/// A [`Stream`] which reports a size hint we computed ahead of time, counting
/// down as items are yielded.
pub struct SizeHintStream<S> {
    stream: S,
    remaining: (usize, Option<usize>),
}

impl<S> Stream for SizeHintStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.stream).poll_next(cx);
        if let Poll::Ready(Some(_)) = &polled {
            let (lower, upper) = this.remaining;
            this.remaining = (
                lower.saturating_sub(1),
                upper.map(|n| n.saturating_sub(1)),
            );
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.remaining
    }
}

/// Adds [`WithSizeHintExt::with_size_hint`] to every [`Stream`].
pub trait WithSizeHintExt: Stream + Sized {
    fn with_size_hint(self, size_hint: (usize, Option<usize>)) -> SizeHintStream<Self> {
        SizeHintStream {
            stream: self,
            remaining: size_hint,
        }
    }
}

impl<S> WithSizeHintExt for S where S: Stream {}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;

    use super::*;

    #[tokio::test]
    async fn test_counts_down() {
        let mut stream = futures::stream::iter([1, 2]).with_size_hint((2, Some(2)));
        assert_eq!(stream.size_hint(), (2, Some(2)));
        assert_eq!(stream.next().await, Some(1));
        assert_eq!(stream.size_hint(), (1, Some(1)));
        assert_eq!(stream.next().await, Some(2));
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.size_hint(), (0, Some(0)));
    }
}
