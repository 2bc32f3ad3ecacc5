//! Bounded in-process byte pipe between a blocking producer and an async
//! consumer.
//!
//! The writer side implements [`std::io::Write`] and is meant to be driven
//! from a blocking thread: once `capacity` chunks are queued, writes block
//! until the reader catches up. The reader side implements
//! [`tokio::io::AsyncRead`]. A producer failure travels through the pipe as an
//! error item, so the reader can never mistake a broken stream for a short one.
//! Cancellation travels the same way: a cancelled reader fails its next read,
//! and the consumer unwinds through its normal error path.

use bytes::Bytes;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_CAPACITY: usize = 8;

pub fn pipe(capacity: usize, chunk_size: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let finished = Arc::new(AtomicBool::new(false));
    let chunk_size = chunk_size.max(1);

    let writer = PipeWriter {
        tx: Some(tx),
        buf: Vec::with_capacity(chunk_size),
        chunk_size,
        finished: finished.clone(),
    };
    let reader = PipeReader {
        rx,
        current: Bytes::new(),
        finished,
        transferred: Arc::new(AtomicU64::new(0)),
        cancel: None,
        done: false,
    };
    (writer, reader)
}

pub struct PipeWriter {
    tx: Option<mpsc::Sender<io::Result<Bytes>>>,
    buf: Vec<u8>,
    chunk_size: usize,
    finished: Arc<AtomicBool>,
}

impl PipeWriter {
    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe already closed"))?;
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_size));
        tx.blocking_send(Ok(Bytes::from(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader went away"))
    }

    /// Flushes buffered bytes and signals a clean end of stream.
    pub fn finish(mut self) -> io::Result<()> {
        self.send_buffer()?;
        self.finished.store(true, Ordering::Release);
        self.tx.take();
        Ok(())
    }

    /// Closes the pipe with an error; the reader's next read returns it.
    pub fn fail(mut self, error: io::Error) {
        self.buf.clear();
        if let Some(tx) = self.tx.take() {
            let _ = tx.blocking_send(Err(error));
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() >= self.chunk_size {
            self.send_buffer()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}

pub struct PipeReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
    finished: Arc<AtomicBool>,
    transferred: Arc<AtomicU64>,
    cancel: Option<CancellationToken>,
    done: bool,
}

impl PipeReader {
    /// Counts delivered bytes into `counter` instead of a private one.
    pub fn track(mut self, counter: Arc<AtomicU64>) -> Self {
        self.transferred = counter;
        self
    }

    /// Fails every read after `token` fires, even with data still queued.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            this.done = true;
            return Poll::Ready(Err(io::Error::other("stream cancelled")));
        }
        loop {
            if !this.current.is_empty() {
                let n = this.current.len().min(buf.remaining());
                buf.put_slice(&this.current.split_to(n));
                this.transferred.fetch_add(n as u64, Ordering::Relaxed);
                return Poll::Ready(Ok(()));
            }
            if this.done {
                return Poll::Ready(Ok(()));
            }
            match ready!(this.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => this.current = chunk,
                Some(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Err(e));
                }
                None => {
                    this.done = true;
                    if !this.finished.load(Ordering::Acquire) {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "pipe writer dropped before finishing",
                        )));
                    }
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}
