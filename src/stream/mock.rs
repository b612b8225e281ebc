//! In-memory connection for exercising streams and drivers in tests.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Everything that happened to a mock connection.
#[derive(Debug, Default)]
pub struct MockLog {
    pub written: Vec<u8>,
    pub flushes: usize,
    pub shutdowns: usize,
    pub dropped: bool,
    reply: Option<Vec<u8>>,
    read_waker: Option<Waker>,
}

pub type SharedLog = Arc<Mutex<MockLog>>;

/// Reads stay pending until something has been written, then deliver the
/// configured reply (or error) once.
pub struct MockConnection {
    log: SharedLog,
    write_error: Option<io::ErrorKind>,
    read_error: Option<io::ErrorKind>,
    shutdown_error: bool,
}

impl MockConnection {
    pub fn new() -> (MockConnection, SharedLog) {
        Self::build(None, None, false, None)
    }

    pub fn failing_writes(kind: io::ErrorKind) -> (MockConnection, SharedLog) {
        Self::build(Some(kind), None, false, None)
    }

    pub fn failing_reads(kind: io::ErrorKind) -> (MockConnection, SharedLog) {
        Self::build(None, Some(kind), false, None)
    }

    pub fn failing_shutdown() -> (MockConnection, SharedLog) {
        Self::build(None, None, true, None)
    }

    pub fn with_reply(reply: Vec<u8>) -> (MockConnection, SharedLog) {
        Self::build(None, None, false, Some(reply))
    }

    fn build(
        write_error: Option<io::ErrorKind>,
        read_error: Option<io::ErrorKind>,
        shutdown_error: bool,
        reply: Option<Vec<u8>>,
    ) -> (MockConnection, SharedLog) {
        let log = Arc::new(Mutex::new(MockLog {
            reply,
            ..MockLog::default()
        }));
        let conn = MockConnection {
            log: log.clone(),
            write_error,
            read_error,
            shutdown_error,
        };
        (conn, log)
    }
}

impl AsyncRead for MockConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let read_error = self.read_error;
        let mut log = self.log.lock().unwrap();
        if log.written.is_empty() {
            log.read_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        if let Some(kind) = read_error {
            return Poll::Ready(Err(io::Error::from(kind)));
        }
        match log.reply.take() {
            Some(reply) => {
                buf.put_slice(&reply);
                Poll::Ready(Ok(()))
            }
            None => {
                log.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl AsyncWrite for MockConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(kind) = self.write_error {
            return Poll::Ready(Err(io::Error::from(kind)));
        }
        let mut log = self.log.lock().unwrap();
        log.written.extend_from_slice(data);
        if let Some(waker) = log.read_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.log.lock().unwrap().flushes += 1;
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.log.lock().unwrap().shutdowns += 1;
        if self.shutdown_error {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::Other)));
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.dropped = true;
        }
    }
}
