use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use futures::{
    Stream, StreamExt,
    stream::Fuse,
};
use tracing::trace;

/// Stream adapter that can rewind to a checkpoint.
///
/// Every item yielded since the last [`checkpoint`](Self::checkpoint) (or
/// since the start) is buffered. [`restore`](Self::restore) replays that
/// buffer before pulling from the source again. The source is never polled
/// after it has ended.
pub struct CheckpointedStream<S: Stream> {
    source: Option<Fuse<S>>,
    buffer: Vec<S::Item>,
    cursor: usize,
    replaying: bool,
}

impl<S> CheckpointedStream<S>
where
    S: Stream + Unpin,
    S::Item: Clone,
{
    pub fn new(source: S) -> Self {
        Self {
            source: Some(source.fuse()),
            buffer: Vec::new(),
            cursor: 0,
            replaying: false,
        }
    }

    /// Forgets everything yielded so far; later restores rewind to here.
    ///
    /// Buffered items not yet replayed are kept.
    pub fn checkpoint(&mut self) {
        if self.replaying {
            self.buffer.drain(..self.cursor);
            self.replaying = !self.buffer.is_empty();
        } else {
            self.buffer.clear();
        }
        self.cursor = 0;
    }

    /// Rewinds to the last checkpoint.
    pub fn restore(&mut self) {
        self.cursor = 0;
        self.replaying = !self.buffer.is_empty();
        trace!(buffered = self.buffer.len(), "restored checkpoint");
    }

    /// Drops the source and the buffer. The stream ends afterwards.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            trace!("closed checkpointed source");
        }
        self.buffer.clear();
        self.cursor = 0;
        self.replaying = false;
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Items a restore would replay.
    pub fn replay_buffer(&self) -> &[S::Item] {
        &self.buffer
    }
}

impl<S> Stream for CheckpointedStream<S>
where
    S: Stream + Unpin,
    S::Item: Clone,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.replaying {
            if let Some(item) = this.buffer.get(this.cursor) {
                this.cursor += 1;
                return Poll::Ready(Some(item.clone()));
            }
            this.replaying = false;
        }

        let Some(source) = this.source.as_mut() else {
            return Poll::Ready(None);
        };

        match ready!(source.poll_next_unpin(cx)) {
            Some(item) => {
                this.buffer.push(item.clone());
                this.cursor = this.buffer.len();
                Poll::Ready(Some(item))
            }
            None => Poll::Ready(None),
        }
    }
}

impl<S: Stream> Unpin for CheckpointedStream<S> where S: Unpin {}
