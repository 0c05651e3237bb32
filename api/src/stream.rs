use async_stream::stream;
use bytes::{BufMut, Bytes, BytesMut};
use frame_relay_common::config::StreamConfig;
use frame_relay_common::signal::StopSignal;
use frame_relay_common::slot::LatestFrame;
use futures_util::Stream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEAD: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TAIL: &[u8] = b"\r\n";

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("error while getting frames: frame {seq} has an empty payload")]
    EmptyFrame { seq: u64 },
}

/// Wrap one encoded image as a multipart part.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PART_HEAD.len() + jpeg.len() + PART_TAIL.len());
    buf.put_slice(PART_HEAD);
    buf.put_slice(jpeg);
    buf.put_slice(PART_TAIL);
    buf.freeze()
}

/// One viewer's view of the latest-frame slot.
pub struct StreamSession {
    slot: Arc<LatestFrame>,
    stop: StopSignal,
    viewers: Arc<AtomicUsize>,
    settle_delay: Duration,
    skip_repeats: bool,
}

impl StreamSession {
    pub fn new(
        slot: Arc<LatestFrame>,
        stop: StopSignal,
        viewers: Arc<AtomicUsize>,
        config: &StreamConfig,
    ) -> Self {
        Self {
            slot,
            stop,
            viewers,
            settle_delay: config.settle_delay(),
            skip_repeats: config.skip_repeats,
        }
    }

    /// Multipart chunks for as long as the consumer keeps polling.
    ///
    /// The stream busy-polls the slot, yielding to the runtime on every
    /// iteration, and only ends when the stop signal is set or a frame cannot
    /// be framed. Dropping it (client gone) releases the session.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + 'static {
        stream! {
            let _viewer = ViewerGuard::new(Arc::clone(&self.viewers));
            tokio::time::sleep(self.settle_delay).await;

            let mut last_seq: Option<u64> = None;
            loop {
                tokio::task::yield_now().await;

                if self.stop.is_set() {
                    debug!("server stopping, ending stream");
                    break;
                }
                let Some(frame) = self.slot.peek() else {
                    continue;
                };
                if self.skip_repeats && last_seq == Some(frame.seq) {
                    continue;
                }
                if frame.is_empty() {
                    yield Err(StreamError::EmptyFrame { seq: frame.seq });
                    break;
                }
                last_seq = Some(frame.seq);
                yield Ok(multipart_chunk(&frame.data));
            }
        }
    }
}

/// Counts a live session and logs connect/disconnect.
struct ViewerGuard {
    viewers: Arc<AtomicUsize>,
}

impl ViewerGuard {
    fn new(viewers: Arc<AtomicUsize>) -> Self {
        let count = viewers.fetch_add(1, Ordering::Relaxed) + 1;
        info!(viewers = count, "viewer connected");
        Self { viewers }
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        let count = self.viewers.fetch_sub(1, Ordering::Relaxed) - 1;
        info!(viewers = count, "viewer disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_relay_common::frame::EncodedFrame;
    use futures_util::StreamExt;
    use tokio::time::{timeout, timeout_at, Instant};

    fn fast_config(skip_repeats: bool) -> StreamConfig {
        StreamConfig {
            settle_delay_ms: 10,
            skip_repeats,
        }
    }

    fn session(slot: &Arc<LatestFrame>, stop: &StopSignal, skip_repeats: bool) -> StreamSession {
        StreamSession::new(
            Arc::clone(slot),
            stop.clone(),
            Arc::new(AtomicUsize::new(0)),
            &fast_config(skip_repeats),
        )
    }

    fn seq_of(chunk: &[u8]) -> u64 {
        let body = &chunk[PART_HEAD.len()..chunk.len() - PART_TAIL.len()];
        u64::from_be_bytes(body.try_into().unwrap())
    }

    #[test]
    fn chunk_framing_is_exact() {
        assert_eq!(
            &multipart_chunk(b"JPEGDATA")[..],
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEGDATA\r\n"
        );
    }

    #[test]
    fn content_type_names_the_boundary() {
        assert!(MULTIPART_CONTENT_TYPE.ends_with("boundary=frame"));
        assert!(PART_HEAD.starts_with(b"--frame\r\n"));
    }

    #[tokio::test]
    async fn emits_published_frame() {
        let slot = Arc::new(LatestFrame::new());
        let stop = StopSignal::new();
        slot.publish(EncodedFrame::new(&b"JPEGDATA"[..], 1, 0));

        let stream = session(&slot, &stop, true).into_stream();
        tokio::pin!(stream);
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEGDATA\r\n");
    }

    #[tokio::test]
    async fn empty_slot_emits_nothing() {
        let slot = Arc::new(LatestFrame::new());
        let stop = StopSignal::new();
        let stream = session(&slot, &stop, true).into_stream();
        tokio::pin!(stream);
        assert!(timeout(Duration::from_millis(200), stream.next()).await.is_err());
    }

    #[tokio::test]
    async fn repeats_frame_unless_skipping() {
        let slot = Arc::new(LatestFrame::new());
        let stop = StopSignal::new();
        slot.publish(EncodedFrame::new(1u64.to_be_bytes().to_vec(), 1, 0));

        let repeating = session(&slot, &stop, false).into_stream();
        tokio::pin!(repeating);
        for _ in 0..3 {
            let chunk = repeating.next().await.unwrap().unwrap();
            assert_eq!(seq_of(&chunk), 1);
        }

        let deduped = session(&slot, &stop, true).into_stream();
        tokio::pin!(deduped);
        assert_eq!(seq_of(&deduped.next().await.unwrap().unwrap()), 1);
        assert!(timeout(Duration::from_millis(100), deduped.next()).await.is_err());

        slot.publish(EncodedFrame::new(2u64.to_be_bytes().to_vec(), 2, 0));
        assert_eq!(seq_of(&deduped.next().await.unwrap().unwrap()), 2);
    }

    #[tokio::test]
    async fn stop_signal_ends_stream() {
        let slot = Arc::new(LatestFrame::new());
        let stop = StopSignal::new();
        let stream = session(&slot, &stop, true).into_stream();
        tokio::pin!(stream);

        stop.set();
        let end = timeout(Duration::from_secs(1), stream.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn empty_payload_is_a_stream_fault() {
        let slot = Arc::new(LatestFrame::new());
        let stop = StopSignal::new();
        slot.publish(EncodedFrame::new(Vec::new(), 9, 0));

        let stream = session(&slot, &stop, true).into_stream();
        tokio::pin!(stream);
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::EmptyFrame { seq: 9 }));
        assert!(err.to_string().contains("error while getting frames"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn viewer_count_tracks_live_sessions() {
        let slot = Arc::new(LatestFrame::new());
        let stop = StopSignal::new();
        let viewers = Arc::new(AtomicUsize::new(0));
        slot.publish(EncodedFrame::new(&b"x"[..], 1, 0));

        let stream = StreamSession::new(
            Arc::clone(&slot),
            stop.clone(),
            Arc::clone(&viewers),
            &fast_config(true),
        )
        .into_stream();
        let mut stream = Box::pin(stream);
        // Nothing runs until the body is polled.
        assert_eq!(viewers.load(Ordering::Relaxed), 0);
        stream.next().await.unwrap().unwrap();
        assert_eq!(viewers.load(Ordering::Relaxed), 1);
        drop(stream);
        assert_eq!(viewers.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fan_out_to_fifty_sessions() {
        let slot = Arc::new(LatestFrame::new());
        let stop = StopSignal::new();

        let producer_stop = StopSignal::new();
        let producer = {
            let slot = Arc::clone(&slot);
            let producer_stop = producer_stop.clone();
            std::thread::spawn(move || {
                let mut seq = 0u64;
                while !producer_stop.is_set() {
                    seq += 1;
                    slot.publish(EncodedFrame::new(seq.to_be_bytes().to_vec(), seq, 0));
                    std::thread::sleep(Duration::from_millis(33));
                }
            })
        };

        let deadline = Instant::now() + Duration::from_secs(1);
        let sessions: Vec<_> = (0..50)
            .map(|_| {
                let stream = session(&slot, &stop, true).into_stream();
                tokio::spawn(async move {
                    let mut stream = Box::pin(stream);
                    let mut seqs = Vec::new();
                    while let Ok(Some(chunk)) = timeout_at(deadline, stream.next()).await {
                        seqs.push(seq_of(&chunk.unwrap()));
                    }
                    seqs
                })
            })
            .collect();

        for handle in sessions {
            let seqs = handle.await.unwrap();
            assert!(!seqs.is_empty(), "session received no frames");
            assert!(seqs.windows(2).all(|w| w[0] <= w[1]), "out of order: {seqs:?}");
        }
        producer_stop.set();
        producer.join().unwrap();
    }
}
