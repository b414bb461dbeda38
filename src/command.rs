use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use tokio::sync::{Mutex, mpsc, watch};

use crate::assembler::ChunkAssembler;
use crate::error::Error;

/// Chunk size used when none is configured. Matches the largest write the
/// printer's GATT stack accepts in one go.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// How long the inbound channel must stay quiet before an accumulated
/// response is considered complete.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Write primitive injected into [`CommandManager::send`].
/// Implement this for your GATT characteristic or a mock transport.
#[async_trait]
pub trait ChunkWriter: Send + Sync {
    /// Write one chunk; must not return before the transport has accepted it.
    async fn write_chunk(&self, chunk: &[u8]) -> Result<(), Error>;
}

/// Writes a payload as ordered sequential chunks of at most `chunk_size`
/// bytes, each awaited before the next.
///
/// Shared by the exchange path and the fire-and-forget path; no response
/// timer is involved here. `interrupted` is polled before each chunk so an
/// exchange can abort mid-payload on cancellation. Returns the number of
/// chunks written.
pub(crate) async fn write_chunked<W>(
    writer: &W,
    payload: &[u8],
    chunk_size: usize,
    interrupted: impl Fn() -> bool,
) -> Result<usize, Error>
where
    W: ChunkWriter + ?Sized,
{
    let size = chunk_size.max(1);
    let total = payload.len().div_ceil(size);
    for (index, chunk) in payload.chunks(size).enumerate() {
        if interrupted() {
            return Err(Error::Cancelled);
        }
        trace!("writing chunk {}/{total} ({} bytes)", index + 1, chunk.len());
        writer.write_chunk(chunk).await?;
    }
    Ok(total)
}

/// Drives exactly one request/response exchange at a time.
///
/// A payload is split into chunks of at most `chunk_size` bytes and written
/// strictly sequentially; backpressure from the transport throttles the
/// sender. The response has no framing of its own, so completion is decided
/// by silence: every inbound chunk re-arms an idle timer, and when the timer
/// fires with at least one chunk accumulated the exchange resolves with the
/// concatenation. This heuristic costs one idle window of latency per
/// response, and two printer messages arriving inside one window merge into
/// a single frame. That is a property of the printer protocol, not something
/// this layer tries to fix.
pub struct CommandManager {
    chunk_size: usize,
    idle_timeout: Duration,
    busy: AtomicBool,
    chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
    chunk_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    cancel_tx: watch::Sender<u64>,
}

/// Clears the single-flight flag on every exit path of `send`.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CommandManager {
    pub fn new(chunk_size: usize, idle_timeout: Duration) -> Self {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (cancel_tx, _) = watch::channel(0u64);
        Self {
            chunk_size,
            idle_timeout,
            busy: AtomicBool::new(false),
            chunk_tx,
            chunk_rx: Mutex::new(chunk_rx),
            cancel_tx,
        }
    }

    /// True while an exchange is in flight. The transport uses this to
    /// decide whether an inbound chunk is a command response or unsolicited.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Runs one exchange: chunked transmission, then idle-timeout framed
    /// response collection.
    ///
    /// Fails fast with [`Error::CommandInProgress`] if an exchange is
    /// already active; the in-flight exchange is left untouched. A failed
    /// chunk write aborts the rest of the payload immediately. Cancellation
    /// (see [`cancel`](Self::cancel)) surfaces as [`Error::Cancelled`].
    pub async fn send<W>(&self, writer: &W, payload: &[u8]) -> Result<Vec<u8>, Error>
    where
        W: ChunkWriter + ?Sized,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::CommandInProgress);
        }
        let _busy = BusyGuard(&self.busy);
        let mut cancel_rx = self.cancel_tx.subscribe();
        // Only the active exchange holds this lock; uncontended by construction.
        let mut chunk_rx = self.chunk_rx.lock().await;

        // Anything still queued belongs to an earlier, already-settled
        // exchange and gets discarded before this one starts.
        while chunk_rx.try_recv().is_ok() {}

        let total = write_chunked(writer, payload, self.chunk_size, || {
            cancel_rx.has_changed().unwrap_or(false)
        })
        .await?;
        debug!("{} byte payload written in {total} chunks", payload.len());

        let mut assembler = ChunkAssembler::new();
        loop {
            tokio::select! {
                _ = cancel_rx.changed() => return Err(Error::Cancelled),
                received = tokio::time::timeout(self.idle_timeout, chunk_rx.recv()) => {
                    match received {
                        Ok(Some(chunk)) => assembler.add(&chunk),
                        // The manager holds its own sender, so the channel
                        // only closes when self is dropped mid-exchange.
                        Ok(None) => return Err(Error::Cancelled),
                        Err(_elapsed) if assembler.is_empty() => {
                            return Err(Error::ResponseTimeout(self.idle_timeout));
                        }
                        Err(_elapsed) => return Ok(assembler.assemble()),
                    }
                }
            }
        }
    }

    /// Hands an inbound notification chunk to the active exchange.
    ///
    /// Called for every chunk whether or not an exchange is pending; chunks
    /// queued while idle are dropped when the next exchange begins. Callers
    /// that care about unexpected data must keep a parallel unsolicited path
    /// outside this manager.
    pub fn receive(&self, chunk: &[u8]) {
        let _ = self.chunk_tx.send(chunk.to_vec());
    }

    /// Aborts the in-flight exchange, if any; the pending caller gets
    /// [`Error::Cancelled`]. Safe to call when idle.
    pub fn cancel(&self) {
        self.cancel_tx
            .send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

impl Default for CommandManager {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_IDLE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    const IDLE: Duration = Duration::from_millis(50);

    /// Records written chunks; optionally fails once `limit` chunks went out.
    #[derive(Default)]
    struct RecordingWriter {
        chunks: Mutex<Vec<Vec<u8>>>,
        fail_after: Option<usize>,
    }

    impl RecordingWriter {
        fn failing_after(limit: usize) -> Self {
            Self {
                chunks: Mutex::new(Vec::new()),
                fail_after: Some(limit),
            }
        }

        fn written(&self) -> Vec<Vec<u8>> {
            self.chunks.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChunkWriter for RecordingWriter {
        async fn write_chunk(&self, chunk: &[u8]) -> Result<(), Error> {
            let mut chunks = self.chunks.lock().unwrap();
            if let Some(limit) = self.fail_after {
                if chunks.len() >= limit {
                    return Err(Error::WriteFailed(btleplug::Error::RuntimeError(
                        "injected write failure".into(),
                    )));
                }
            }
            chunks.push(chunk.to_vec());
            Ok(())
        }
    }

    fn manager(chunk_size: usize) -> Arc<CommandManager> {
        Arc::new(CommandManager::new(chunk_size, IDLE))
    }

    #[tokio::test(start_paused = true)]
    async fn splits_payload_into_ordered_chunks_and_resolves_reply() {
        let mgr = manager(4);
        let writer = RecordingWriter::default();

        let feeder = Arc::clone(&mgr);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            feeder.receive(b"OK");
            tokio::time::sleep(Duration::from_millis(10)).await;
            feeder.receive(b"\n");
        });

        let reply = mgr.send(&writer, b"STATUS?").await.unwrap();
        assert_eq!(reply, b"OK\n");
        assert_eq!(writer.written(), vec![b"STAT".to_vec(), b"US?".to_vec()]);
        assert!(!mgr.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_count_is_ceil_of_payload_over_chunk_size() {
        let mgr = manager(8);
        let payload: Vec<u8> = (0u8..=20).collect();
        let writer = RecordingWriter::default();

        let err = mgr.send(&writer, &payload).await.unwrap_err();
        assert!(matches!(err, Error::ResponseTimeout(_)));

        let written = writer.written();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|chunk| chunk.len() <= 8));
        assert_eq!(written.concat(), payload);
    }

    #[tokio::test(start_paused = true)]
    async fn second_send_fails_fast_without_touching_the_exchange() {
        let mgr = manager(512);
        let writer = Arc::new(RecordingWriter::default());

        let first_mgr = Arc::clone(&mgr);
        let first_writer = Arc::clone(&writer);
        let first =
            tokio::spawn(async move { first_mgr.send(first_writer.as_ref(), b"PING").await });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(mgr.is_busy());

        let err = mgr.send(writer.as_ref(), b"SECOND").await.unwrap_err();
        assert!(matches!(err, Error::CommandInProgress));

        mgr.receive(b"PONG");
        let reply = first.await.unwrap().unwrap();
        assert_eq!(reply, b"PONG");
        // Only the first payload ever reached the wire.
        assert_eq!(writer.written(), vec![b"PING".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_channel_times_out_after_idle_window() {
        let mgr = manager(512);
        let writer = RecordingWriter::default();

        let start = tokio::time::Instant::now();
        let err = mgr.send(&writer, b"PING").await.unwrap_err();
        assert!(matches!(err, Error::ResponseTimeout(_)));
        assert!(start.elapsed() >= IDLE);
        assert!(start.elapsed() < IDLE * 2);
        assert!(!mgr.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_inside_idle_window_merge_into_one_frame() {
        let mgr = manager(512);
        let writer = RecordingWriter::default();

        let feeder = Arc::clone(&mgr);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            feeder.receive(b"A");
            tokio::time::sleep(IDLE / 2).await;
            feeder.receive(b"B");
        });

        let reply = mgr.send(&writer, b"Q").await.unwrap();
        assert_eq!(reply, b"AB");
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_aborts_remaining_chunks() {
        let mgr = manager(4);
        let writer = RecordingWriter::failing_after(1);

        let err = mgr.send(&writer, b"12345678abcd").await.unwrap_err();
        assert!(matches!(err, Error::WriteFailed(_)));
        assert_eq!(writer.written(), vec![b"1234".to_vec()]);

        // The failed exchange is cleared; the manager accepts a new send.
        let writer = RecordingWriter::default();
        let feeder = Arc::clone(&mgr);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            feeder.receive(b"ok");
        });
        assert_eq!(mgr.send(&writer, b"retry").await.unwrap(), b"ok");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_rejects_pending_caller_and_frees_the_manager() {
        let mgr = manager(512);
        let writer = Arc::new(RecordingWriter::default());

        let pending_mgr = Arc::clone(&mgr);
        let pending_writer = Arc::clone(&writer);
        let pending =
            tokio::spawn(
                async move { pending_mgr.send(pending_writer.as_ref(), b"PING").await },
            );
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        mgr.cancel();
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!mgr.is_busy());

        let feeder = Arc::clone(&mgr);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            feeder.receive(b"fresh");
        });
        assert_eq!(mgr.send(writer.as_ref(), b"NEXT").await.unwrap(), b"fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_idle_chunks_are_not_delivered_to_the_next_exchange() {
        let mgr = manager(512);
        // No exchange pending: these sit in the queue until the next send
        // discards them.
        mgr.receive(b"unsolicited");
        mgr.receive(b"noise");

        let writer = RecordingWriter::default();
        let feeder = Arc::clone(&mgr);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            feeder.receive(b"fresh");
        });

        assert_eq!(mgr.send(&writer, b"Q").await.unwrap(), b"fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn fire_and_forget_writes_all_chunks_without_arming_a_timer() {
        let writer = RecordingWriter::default();
        let payload: Vec<u8> = (0u8..10).collect();

        let start = tokio::time::Instant::now();
        let total = write_chunked(&writer, &payload, 4, || false).await.unwrap();

        assert_eq!(total, 3);
        let written = writer.written();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|chunk| chunk.len() <= 4));
        assert_eq!(written.concat(), payload);
        // Paused clock: an armed timer could only fire by advancing it.
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_payload_writes_nothing_and_still_arms_the_timer() {
        let mgr = manager(512);
        let writer = RecordingWriter::default();

        let err = mgr.send(&writer, b"").await.unwrap_err();
        assert!(matches!(err, Error::ResponseTimeout(_)));
        assert!(writer.written().is_empty());
    }
}
