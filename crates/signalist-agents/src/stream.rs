//! Forwarding of streamed role output to an output sink.
//!
//! Roles push chunks without waiting on the sink. The forwarder holds at most
//! `capacity` pending chunks; when full, the two oldest pending entries are
//! merged into a single [`StreamChunk::Elided`] marker so producers never block.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Text { role: String, text: String },
    /// Stands in for chunks dropped under backpressure.
    Elided { chunks: usize, bytes: usize },
}

impl StreamChunk {
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        StreamChunk::Text {
            role: role.into(),
            text: text.into(),
        }
    }

    fn weight(&self) -> (usize, usize) {
        match self {
            StreamChunk::Text { text, .. } => (1, text.len()),
            StreamChunk::Elided { chunks, bytes } => (*chunks, *bytes),
        }
    }
}

#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn write(&self, chunk: StreamChunk) -> std::io::Result<()>;
}

#[derive(Debug, Default)]
struct Pending {
    chunks: VecDeque<StreamChunk>,
    closed: bool,
}

#[derive(Debug)]
pub struct ChunkForwarder {
    pending: Mutex<Pending>,
    notify: Notify,
    capacity: usize,
}

impl ChunkForwarder {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(Pending::default()),
            notify: Notify::new(),
            capacity: capacity.max(2),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a chunk. Never blocks; chunks pushed after `close` are dropped.
    pub fn push(&self, chunk: StreamChunk) {
        {
            let mut pending = self.lock();
            if pending.closed {
                return;
            }
            if pending.chunks.len() >= self.capacity {
                collapse_oldest(&mut pending.chunks);
            }
            pending.chunks.push_back(chunk);
        }
        self.notify.notify_one();
    }

    /// No more chunks will be accepted; `next` returns `None` once drained.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.lock().chunks.len()
    }

    pub async fn next(&self) -> Option<StreamChunk> {
        loop {
            let notified = self.notify.notified();
            {
                let mut pending = self.lock();
                if let Some(chunk) = pending.chunks.pop_front() {
                    return Some(chunk);
                }
                if pending.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Deliver chunks to `sink` in arrival order until closed and drained.
    pub async fn drain_into(self: Arc<Self>, sink: Arc<dyn OutputSink>) {
        while let Some(chunk) = self.next().await {
            if let Err(e) = sink.write(chunk).await {
                warn!(error = %e, "Output sink write failed");
            }
        }
    }
}

fn collapse_oldest(chunks: &mut VecDeque<StreamChunk>) {
    let (Some(first), Some(second)) = (chunks.pop_front(), chunks.pop_front()) else {
        return;
    };
    let (c1, b1) = first.weight();
    let (c2, b2) = second.weight();
    chunks.push_front(StreamChunk::Elided {
        chunks: c1 + c2,
        bytes: b1 + b2,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;

    #[tokio::test]
    async fn delivers_in_arrival_order() {
        let forwarder = ChunkForwarder::new(8);
        forwarder.push(StreamChunk::text("a", "one"));
        forwarder.push(StreamChunk::text("b", "two"));
        forwarder.close();

        assert_eq!(forwarder.next().await, Some(StreamChunk::text("a", "one")));
        assert_eq!(forwarder.next().await, Some(StreamChunk::text("b", "two")));
        assert_eq!(forwarder.next().await, None);
    }

    #[tokio::test]
    async fn full_buffer_collapses_two_oldest() {
        let forwarder = ChunkForwarder::new(3);
        for text in ["aa", "bbb", "c", "dddd"] {
            forwarder.push(StreamChunk::text("r", text));
        }
        assert_eq!(forwarder.pending(), 3);
        // a fifth push folds the marker and "c" into a bigger marker
        forwarder.push(StreamChunk::text("r", "e"));
        forwarder.close();

        let mut out = Vec::new();
        while let Some(chunk) = forwarder.next().await {
            out.push(chunk);
        }
        assert_eq!(
            out,
            vec![
                StreamChunk::Elided { chunks: 3, bytes: 6 },
                StreamChunk::text("r", "dddd"),
                StreamChunk::text("r", "e"),
            ]
        );
    }

    #[tokio::test]
    async fn pushes_after_close_are_dropped() {
        let forwarder = ChunkForwarder::new(4);
        forwarder.close();
        forwarder.push(StreamChunk::text("r", "late"));
        assert_eq!(forwarder.next().await, None);
    }

    #[tokio::test]
    async fn drain_waits_for_late_chunks() {
        let forwarder = ChunkForwarder::new(4);
        let sink = Arc::new(RecordingSink::default());
        let drain = tokio::spawn(Arc::clone(&forwarder).drain_into(sink.clone()));

        tokio::task::yield_now().await;
        forwarder.push(StreamChunk::text("r", "hello "));
        forwarder.push(StreamChunk::text("r", "world"));
        forwarder.close();
        drain.await.unwrap();

        assert_eq!(sink.text(), "hello world");
    }
}
