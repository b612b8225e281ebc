//! Command streams wrap one open serial or network connection.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(test)]
pub(crate) mod mock;

/// How long a closing network stream waits for the peer to hang up.
const CLOSE_LINGER: Duration = Duration::from_millis(500);

const READ_BUFFER_SIZE: usize = 256;
const EVENT_CAPACITY: usize = 64;

/// Anything a command stream can sit on top of.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Connection for T {}

/// The kind of link under a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Serial,
    Network,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Serial => f.write_str("serial"),
            StreamKind::Network => f.write_str("network"),
        }
    }
}

/// Text encoding used by [`CommandStream::write_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// Low eight bits of each character, as `Latin1`.
    Ascii,
    /// Low eight bits of each character.
    Latin1,
}

impl Default for TextEncoding {
    fn default() -> Self {
        TextEncoding::Utf8
    }
}

impl TextEncoding {
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Ascii | TextEncoding::Latin1 => {
                text.chars().map(|c| (c as u32 & 0xFF) as u8).collect()
            }
        }
    }
}

/// Inbound activity on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(Vec<u8>),
    Error(String),
    /// The remote end hung up.
    Closed,
}

/// A byte stream to a single device.
///
/// Writes resolve once the bytes are flushed. Inbound bytes are picked up by a
/// background task and published to every [`subscribe`](Self::subscribe)d
/// receiver. Closing consumes the stream, so a closed stream cannot be written to.
pub struct CommandStream {
    kind: StreamKind,
    label: String,
    writer: WriteHalf<Box<dyn Connection>>,
    reader: ReaderTask,
    events: broadcast::Sender<StreamEvent>,
    encoding: TextEncoding,
}

impl CommandStream {
    /// Wrap an open connection. Must be called from within a tokio runtime.
    pub fn new(kind: StreamKind, label: impl Into<String>, conn: Box<dyn Connection>) -> Self {
        let label = label.into();
        let (read_half, writer) = tokio::io::split(conn);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let reader = ReaderTask(tokio::spawn(read_loop(
            label.clone(),
            read_half,
            events.clone(),
        )));

        CommandStream {
            kind,
            label,
            writer,
            reader,
            events,
            encoding: TextEncoding::default(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// The location this stream was opened for.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_encoding(&mut self, encoding: TextEncoding) {
        self.encoding = encoding;
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Receive inbound data and errors from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Write and flush raw bytes.
    ///
    /// Errors reported by the connection while writing fail this call and are
    /// returned once; errors seen by the reader only show up as events.
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        debug!(
            stream = %self.label,
            bytes = %hex::encode_upper(data),
            "write {}B",
            data.len()
        );
        let result = async {
            self.writer.write_all(data).await?;
            self.writer.flush().await
        }
        .await;

        if let Err(err) = &result {
            warn!(stream = %self.label, "write failed: {}", err);
        }
        result
    }

    /// Write text using the stream's current encoding.
    pub async fn write_str(&mut self, text: &str) -> io::Result<()> {
        let bytes = self.encoding.encode(text);
        self.write(&bytes).await
    }

    /// Shut down the write side and release the connection.
    ///
    /// The connection is dropped even when the shutdown fails; the shutdown
    /// error is still reported.
    pub async fn close(self) -> io::Result<()> {
        let CommandStream {
            kind,
            label,
            mut writer,
            mut reader,
            ..
        } = self;

        let result = writer.shutdown().await;
        if let Err(err) = &result {
            warn!(stream = %label, "shutdown failed: {}", err);
        }

        let mut finished = false;
        if kind == StreamKind::Network && result.is_ok() {
            // Give the peer a moment to hang up on its own.
            match tokio::time::timeout(CLOSE_LINGER, &mut reader.0).await {
                Ok(_) => finished = true,
                Err(_) => debug!(stream = %label, "peer did not hang up, dropping connection"),
            }
        }

        if !finished {
            reader.0.abort();
            (&mut reader.0).await.ok();
        }
        drop(writer);

        info!(stream = %label, "closed {} stream", kind);
        result
    }
}

/// The background reader. It owns the read half, so the connection is only
/// released once the task is gone; dropping a stream without closing it aborts
/// the task.
struct ReaderTask(JoinHandle<()>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl fmt::Debug for CommandStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandStream")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("encoding", &self.encoding)
            .finish()
    }
}

async fn read_loop(
    label: String,
    mut reader: ReadHalf<Box<dyn Connection>>,
    events: broadcast::Sender<StreamEvent>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(stream = %label, "remote end closed");
                events.send(StreamEvent::Closed).ok();
                return;
            }
            Ok(len) => {
                let data = &buf[..len];
                debug!(stream = %label, bytes = %hex::encode_upper(data), "read {}B", len);
                events.send(StreamEvent::Data(data.to_vec())).ok();
            }
            Err(err) => {
                warn!(stream = %label, "read failed: {}", err);
                events.send(StreamEvent::Error(err.to_string())).ok();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockConnection;
    use super::*;

    #[test]
    fn encodes_text() {
        assert_eq!(TextEncoding::Utf8.encode("1*2%"), b"1*2%".to_vec());
        assert_eq!(TextEncoding::Utf8.encode("é"), vec![0xC3, 0xA9]);
        assert_eq!(TextEncoding::Latin1.encode("é"), vec![0xE9]);
        assert_eq!(TextEncoding::Ascii.encode("é"), vec![0xE9]);
        assert_eq!(TextEncoding::Ascii.encode("1*2$\r\n"), b"1*2$\r\n".to_vec());
    }

    #[tokio::test]
    async fn writes_and_closes() {
        let (conn, log) = MockConnection::new();
        let mut stream = CommandStream::new(StreamKind::Serial, "port:/dev/null", Box::new(conn));

        stream.write(&[0x01, 0x02]).await.unwrap();
        stream.write_str("ok\r\n").await.unwrap();
        stream.close().await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.written, vec![0x01, 0x02, b'o', b'k', b'\r', b'\n']);
        assert_eq!(log.shutdowns, 1);
        assert!(log.dropped);
    }

    #[tokio::test]
    async fn write_error_is_reported_once() {
        let (conn, log) = MockConnection::failing_writes(io::ErrorKind::ConnectionReset);
        let mut stream = CommandStream::new(StreamKind::Network, "ip:10.0.0.1", Box::new(conn));

        let err = stream.write(b"1*1%\r\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);

        // The stream is still closable after a failed write.
        stream.close().await.unwrap();
        let log = log.lock().unwrap();
        assert!(log.written.is_empty());
        assert_eq!(log.shutdowns, 1);
    }

    #[tokio::test]
    async fn shutdown_error_still_releases_connection() {
        let (conn, log) = MockConnection::failing_shutdown();
        let stream = CommandStream::new(StreamKind::Serial, "port:COM1", Box::new(conn));

        assert!(stream.close().await.is_err());
        let log = log.lock().unwrap();
        assert_eq!(log.shutdowns, 1);
        assert!(log.dropped);
    }

    #[tokio::test]
    async fn dropping_without_close_releases_connection() {
        let (conn, log) = MockConnection::new();
        let mut stream = CommandStream::new(StreamKind::Serial, "port:COM1", Box::new(conn));
        stream.write(&[0x02]).await.unwrap();

        // As when a caller's timeout cancels an operation mid-flight.
        drop(stream);

        let released = tokio::time::timeout(Duration::from_secs(1), async {
            while !log.lock().unwrap().dropped {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(released.is_ok());
        assert_eq!(log.lock().unwrap().shutdowns, 0);
    }

    #[tokio::test]
    async fn publishes_inbound_data() {
        let (conn, _log) = MockConnection::with_reply(vec![0x06, 0x15]);
        let mut stream = CommandStream::new(StreamKind::Serial, "port:COM1", Box::new(conn));
        let mut events = stream.subscribe();

        stream.write(&[0x02]).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, StreamEvent::Data(vec![0x06, 0x15]));

        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn read_errors_become_events() {
        let (conn, _log) = MockConnection::failing_reads(io::ErrorKind::BrokenPipe);
        let mut stream = CommandStream::new(StreamKind::Network, "ip:10.0.0.2", Box::new(conn));
        let mut events = stream.subscribe();

        // The read side failure never fails a write.
        stream.write(b"x").await.unwrap();
        stream.close().await.unwrap();

        assert!(matches!(events.try_recv(), Ok(StreamEvent::Error(_))));
    }
}
