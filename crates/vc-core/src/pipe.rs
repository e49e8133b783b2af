//! Unbuffered in-memory byte conduits
//!
//! A console stream wants exactly one reader and one writer, while a bridge
//! drives each direction from its own task. [`pipe`] creates a one-directional
//! conduit whose ends can be cloned and closed independently, and
//! [`PipePair`] bundles the two conduits a bridge needs:
//!
//! ```text
//! local -> inbound_writer | inbound_reader -> console
//! local <- outbound_reader | outbound_writer <- console
//! ```
//!
//! Writes rendezvous with reads: `write` returns only once every byte has been
//! handed to a reader. Closing either end of a conduit wakes every blocked
//! operation on that conduit, which then reports end of stream. This is the
//! only cancellation mechanism the bridges rely on.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::PipeError;

/// Data handed from a writer to the reader, acknowledged once fully read
struct Chunk {
    data: Bytes,
    consumed: oneshot::Sender<()>,
}

struct ReadState {
    chunks: mpsc::Receiver<Chunk>,
    /// Partially read chunk
    pending: Option<Chunk>,
}

struct Conduit {
    chunks: mpsc::Sender<Chunk>,
    reader: Mutex<ReadState>,
    closed: CancellationToken,
}

impl Conduit {
    fn close(&self) {
        self.closed.cancel();
    }
}

/// Create a conduit, returning its write and read ends
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(1);
    let conduit = Arc::new(Conduit {
        chunks: tx,
        reader: Mutex::new(ReadState {
            chunks: rx,
            pending: None,
        }),
        closed: CancellationToken::new(),
    });

    (
        PipeWriter {
            conduit: Arc::clone(&conduit),
        },
        PipeReader { conduit },
    )
}

/// Write end of a conduit
#[derive(Clone)]
pub struct PipeWriter {
    conduit: Arc<Conduit>,
}

impl PipeWriter {
    /// Write `data`, waiting until a reader has consumed all of it.
    ///
    /// Fails with [`PipeError::Closed`] if the conduit is (or becomes) closed
    /// before the data is consumed. Dropping the returned future after the
    /// data was queued leaves it readable.
    pub async fn write(&self, data: &[u8]) -> Result<usize, PipeError> {
        let closed = &self.conduit.closed;
        if closed.is_cancelled() {
            return Err(PipeError::Closed);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let (consumed_tx, consumed_rx) = oneshot::channel();
        let chunk = Chunk {
            data: Bytes::copy_from_slice(data),
            consumed: consumed_tx,
        };

        tokio::select! {
            biased;
            _ = closed.cancelled() => return Err(PipeError::Closed),
            sent = self.conduit.chunks.send(chunk) => sent.map_err(|_| PipeError::Closed)?,
        }

        tokio::select! {
            biased;
            consumed = consumed_rx => consumed.map(|()| data.len()).map_err(|_| PipeError::Closed),
            _ = closed.cancelled() => Err(PipeError::Closed),
        }
    }

    /// Close the conduit. Idempotent.
    pub fn close(&self) {
        self.conduit.close();
    }

    /// Whether the conduit has been closed from either end
    pub fn is_closed(&self) -> bool {
        self.conduit.closed.is_cancelled()
    }
}

/// Read end of a conduit
#[derive(Clone)]
pub struct PipeReader {
    conduit: Arc<Conduit>,
}

impl PipeReader {
    /// Read into `buf`, waiting for data. Returns 0 at end of stream, i.e.
    /// once the conduit has been closed from either end.
    ///
    /// `buf` must not be empty.
    pub async fn read(&self, buf: &mut [u8]) -> usize {
        let closed = &self.conduit.closed;
        let mut state = tokio::select! {
            biased;
            _ = closed.cancelled() => return 0,
            state = self.conduit.reader.lock() => state,
        };

        if state.pending.is_none() {
            let next = tokio::select! {
                biased;
                _ = closed.cancelled() => return 0,
                next = state.chunks.recv() => next,
            };
            match next {
                Some(chunk) => state.pending = Some(chunk),
                None => return 0,
            }
        }

        let Some(chunk) = state.pending.as_mut() else {
            return 0;
        };
        let n = buf.len().min(chunk.data.len());
        buf[..n].copy_from_slice(&chunk.data.split_to(n));

        if chunk.data.is_empty() {
            if let Some(done) = state.pending.take() {
                let _ = done.consumed.send(());
            }
        }
        n
    }

    /// Close the conduit. Idempotent.
    pub fn close(&self) {
        self.conduit.close();
    }

    /// Whether the conduit has been closed from either end
    pub fn is_closed(&self) -> bool {
        self.conduit.closed.is_cancelled()
    }
}

/// The two conduits connecting a bridge to a console stream
#[derive(Clone)]
pub struct PipePair {
    /// Local side writes bytes destined for the console
    pub inbound_writer: PipeWriter,
    /// Console stream reads bytes from the local side
    pub inbound_reader: PipeReader,
    /// Console stream writes bytes arriving from the VM
    pub outbound_writer: PipeWriter,
    /// Local side reads bytes arriving from the VM
    pub outbound_reader: PipeReader,
}

impl PipePair {
    /// Create both conduits
    pub fn new() -> Self {
        let (inbound_writer, inbound_reader) = pipe();
        let (outbound_writer, outbound_reader) = pipe();
        Self {
            inbound_writer,
            inbound_reader,
            outbound_writer,
            outbound_reader,
        }
    }

    /// Close all four ends
    pub fn close(&self) {
        self.inbound_writer.close();
        self.inbound_reader.close();
        self.outbound_writer.close();
        self.outbound_reader.close();
    }
}

impl Default for PipePair {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const BOUND: Duration = Duration::from_secs(2);

    async fn read_to_end(reader: &PipeReader, buf_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; buf_size];
        loop {
            let n = reader.read(&mut buf).await;
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_bytes_arrive_in_order() {
        let (writer, reader) = pipe();
        let big: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let writes: Vec<Vec<u8>> = vec![b"hello".to_vec(), b" ".to_vec(), b"world".to_vec(), big];
        let expected: Vec<u8> = writes.concat();

        let producer = tokio::spawn(async move {
            for chunk in writes {
                assert_eq!(writer.write(&chunk).await, Ok(chunk.len()));
            }
            writer.close();
        });

        let received = timeout(BOUND, read_to_end(&reader, 7)).await.unwrap();
        producer.await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_write_waits_for_reader() {
        let (writer, reader) = pipe();

        let pending = timeout(Duration::from_millis(50), writer.write(b"x")).await;
        assert!(pending.is_err(), "write completed without a reader");

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await, 1);
        assert_eq!(&buf[..1], b"x");
    }

    #[tokio::test]
    async fn test_close_unblocks_reader() {
        let (writer, reader) = pipe();
        let blocked = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            reader.read(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.close();

        let n = timeout(BOUND, blocked).await.unwrap().unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_close_from_reader_unblocks_writer() {
        let (writer, reader) = pipe();
        let blocked = tokio::spawn(async move { writer.write(b"never read").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        reader.close();

        let result = timeout(BOUND, blocked).await.unwrap().unwrap();
        assert_eq!(result, Err(PipeError::Closed));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (writer, reader) = pipe();
        writer.close();
        writer.close();
        reader.close();

        assert!(writer.is_closed());
        assert!(reader.is_closed());
        assert_eq!(writer.write(b"late").await, Err(PipeError::Closed));
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await, 0);
    }

    #[tokio::test]
    async fn test_pair_directions_close_independently() {
        let pair = PipePair::new();
        pair.outbound_writer.close();

        let inbound_writer = pair.inbound_writer.clone();
        let forwarded = tokio::spawn(async move { inbound_writer.write(b"ls\r").await });

        let mut buf = [0u8; 8];
        let n = timeout(BOUND, pair.inbound_reader.read(&mut buf)).await.unwrap();
        assert_eq!(&buf[..n], b"ls\r");
        assert_eq!(forwarded.await.unwrap(), Ok(3));
        assert_eq!(pair.outbound_reader.read(&mut buf).await, 0);

        pair.close();
        assert!(pair.inbound_reader.is_closed());
    }
}
