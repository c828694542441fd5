// src/playback.rs
// 回放：把录制文件按实时节奏写回缓冲区
use std::time::Duration;
use ndarray::s;
use crate::drivers::{default_labels, BufferClient};
use crate::error::EngineError;
use crate::events::{CancelToken, EventSender};
use crate::recorder::Recording;
use crate::types::EngineEvent;
pub const DEFAULT_BLOCK_INTERVAL: Duration = Duration::from_secs(1);
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished { blocks: usize },
    Aborted { blocks: usize },
}
/// Streams a [`Recording`] into a buffer, one second of samples per block.
pub struct Playback {
    recording: Recording,
    sink: Box<dyn BufferClient>,
    events: EventSender,
    host: String,
    port: u16,
    block_interval: Duration,
}
impl Playback {
    pub fn new(
        recording: Recording,
        sink: Box<dyn BufferClient>,
        events: EventSender,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            recording,
            sink,
            events,
            host: host.into(),
            port,
            block_interval: DEFAULT_BLOCK_INTERVAL,
        }
    }
    pub fn block_interval(mut self, interval: Duration) -> Self {
        self.block_interval = interval;
        self
    }
    pub fn recording(&self) -> &Recording {
        &self.recording
    }
    /// Samples per pushed block.
    pub fn block_size(&self) -> usize {
        (self.recording.sample_rate.round() as usize).max(1)
    }
    pub fn block_count(&self) -> usize {
        self.recording.sample_count().div_ceil(self.block_size())
    }
    /// Connects the sink and announces the recording's layout.
    pub fn connect(&mut self) -> Result<(), EngineError> {
        let channels = self.recording.channel_count();
        if channels == 0 {
            return Err(EngineError::InvalidArgument(
                "recording has no channels".into(),
            ));
        }
        self.sink.connect(&self.host, self.port)?;
        self.sink
            .put_header(channels, self.recording.sample_rate, &default_labels(channels))?;
        log::info!(
            "playback connected to {}:{} ({} channels at {} Hz)",
            self.host,
            self.port,
            channels,
            self.recording.sample_rate
        );
        Ok(())
    }
    /// Pushes every block, pausing `block_interval` between blocks.
    pub fn stream(&mut self, cancel: &CancelToken) -> Result<PlaybackOutcome, EngineError> {
        let block_size = self.block_size();
        let total = self.recording.sample_count();
        let mut blocks = 0;
        let mut start = 0;
        while start < total {
            if cancel.is_cancelled() {
                return Ok(self.aborted(blocks));
            }
            let end = (start + block_size).min(total);
            self.sink
                .put_data(self.recording.samples.slice(s![start..end, ..]))?;
            blocks += 1;
            start = end;
            log::debug!("playback block {blocks}/{}", self.block_count());
            // 最后一块之后不再等待
            if start < total && !cancel.sleep(self.block_interval) {
                return Ok(self.aborted(blocks));
            }
        }
        log::info!("playback finished after {blocks} blocks");
        self.events.publish(EngineEvent::PlaybackFinished);
        Ok(PlaybackOutcome::Finished { blocks })
    }
    fn aborted(&self, blocks: usize) -> PlaybackOutcome {
        log::info!("playback stopped after {blocks} blocks");
        PlaybackOutcome::Aborted { blocks }
    }
    pub fn disconnect(&mut self) {
        self.sink.disconnect();
    }
    /// `connect`, `stream` and `disconnect` in one call.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<PlaybackOutcome, EngineError> {
        let outcome = self.connect().and_then(|()| self.stream(cancel));
        self.disconnect();
        outcome
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryBuffer;
    use crate::events;
    use ndarray::Array2;
    use std::thread;
    fn recording(rate: f32, samples: usize, channels: usize) -> Recording {
        Recording::new(
            rate,
            Array2::from_shape_fn((samples, channels), |(i, c)| (i * channels + c) as f32),
        )
    }
    fn playback(buffer: &MemoryBuffer, recording: Recording) -> (Playback, events::EventReceiver) {
        let (tx, rx) = events::channel();
        let playback = Playback::new(recording, Box::new(buffer.client()), tx, "localhost", 1972)
            .block_interval(Duration::from_millis(1));
        (playback, rx)
    }
    fn finished_events(rx: &events::EventReceiver) -> usize {
        rx.drain()
            .into_iter()
            .filter(|e| *e == EngineEvent::PlaybackFinished)
            .count()
    }
    #[test]
    fn partial_tail_becomes_last_block() {
        let buffer = MemoryBuffer::new();
        let (mut playback, rx) = playback(&buffer, recording(100.0, 250, 2));
        assert_eq!(playback.block_count(), 3);
        let outcome = playback.run(&CancelToken::new()).unwrap();
        assert_eq!(outcome, PlaybackOutcome::Finished { blocks: 3 });
        assert_eq!(buffer.sample_count(), 250);
        assert_eq!(finished_events(&rx), 1);
        let mut reader = buffer.client();
        reader.connect("localhost", 1972).unwrap();
        let header = reader.get_header().unwrap().unwrap();
        assert_eq!(header.labels, vec!["chan1", "chan2"]);
        assert_eq!(reader.get_data(249, 249).unwrap()[[0, 1]], 499.0);
    }
    #[test]
    fn exact_multiple_has_no_extra_block() {
        let buffer = MemoryBuffer::new();
        let (playback, _rx) = playback(&buffer, recording(64.0, 128, 1));
        assert_eq!(playback.block_count(), 2);
    }
    #[test]
    fn cancel_stops_between_blocks_without_finish_event() {
        let buffer = MemoryBuffer::new();
        let (tx, rx) = events::channel();
        let mut playback = Playback::new(
            recording(10.0, 100, 1),
            Box::new(buffer.client()),
            tx,
            "localhost",
            1972,
        )
        .block_interval(Duration::from_millis(200));
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });
        let outcome = playback.run(&cancel).unwrap();
        canceller.join().unwrap();
        assert_eq!(outcome, PlaybackOutcome::Aborted { blocks: 1 });
        assert_eq!(buffer.sample_count(), 10);
        assert_eq!(finished_events(&rx), 0);
    }
    #[test]
    fn cancel_after_last_block_still_finishes() {
        let buffer = MemoryBuffer::new();
        let (tx, rx) = events::channel();
        let mut playback = Playback::new(
            recording(10.0, 10, 1),
            Box::new(buffer.client()),
            tx,
            "localhost",
            1972,
        )
        .block_interval(Duration::from_millis(300));
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });
        let outcome = playback.run(&cancel).unwrap();
        canceller.join().unwrap();
        assert_eq!(outcome, PlaybackOutcome::Finished { blocks: 1 });
        assert_eq!(buffer.sample_count(), 10);
        assert_eq!(finished_events(&rx), 1);
    }
    #[test]
    fn restarted_runs_each_finish_once() {
        let buffer = MemoryBuffer::new();
        let (mut playback, rx) = playback(&buffer, recording(32.0, 96, 3));
        for _ in 0..3 {
            let cancel = CancelToken::new();
            cancel.cancel();
            assert_eq!(
                playback.run(&cancel).unwrap(),
                PlaybackOutcome::Aborted { blocks: 0 }
            );
            assert_eq!(
                playback.run(&CancelToken::new()).unwrap(),
                PlaybackOutcome::Finished { blocks: 3 }
            );
        }
        assert_eq!(finished_events(&rx), 3);
        // each run announces a fresh header, which resets the buffer
        assert_eq!(buffer.sample_count(), 96);
    }
    #[test]
    fn unreachable_sink_is_an_error() {
        let buffer = MemoryBuffer::new();
        buffer.set_online(false);
        let (mut playback, rx) = playback(&buffer, recording(32.0, 32, 1));
        assert!(matches!(
            playback.run(&CancelToken::new()),
            Err(EngineError::Connection(_))
        ));
        assert_eq!(finished_events(&rx), 0);
    }
}
