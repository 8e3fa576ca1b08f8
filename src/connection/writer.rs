//! Shared Reply Writer
//!
//! A connection's write half is used by two tasks: the connection task
//! answering requests, and the client's pub/sub delivery task pushing
//! messages. Both go through a [`ReplyWriter`], which serializes whole
//! replies under an async mutex so frames never interleave.

use crate::protocol::RespValue;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Cloneable handle to one connection's outbound byte stream.
#[derive(Clone)]
pub struct ReplyWriter {
    inner: Arc<Mutex<BufWriter<BoxedWrite>>>,
}

impl ReplyWriter {
    pub fn new<W>(write: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: BoxedWrite = Box::new(write);
        Self {
            inner: Arc::new(Mutex::new(BufWriter::new(boxed))),
        }
    }

    /// Encodes and flushes one reply. Returns the number of bytes written.
    pub async fn send(&self, value: &RespValue) -> io::Result<usize> {
        let bytes = value.serialize();
        let mut stream = self.inner.lock().await;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok(bytes.len())
    }

    /// Flushes and shuts down the write half.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.inner.lock().await.shutdown().await
    }
}

impl fmt::Debug for ReplyWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyWriter")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}
