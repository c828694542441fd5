use std::time::Duration;
use ndarray::{s, Array2, Axis};
use crate::drivers::BufferError;
use crate::error::EngineError;
use crate::events::CancelToken;
use crate::session::Session;
use crate::types::{ConnectionState, EngineEvent, PowerSample};
/// Result of one pass of the acquisition loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BlockOutcome {
    /// Fewer than one block of unread samples in the buffer.
    Pending,
    /// A block was consumed but no channel is active.
    Skipped,
    Scored(PowerSample),
}
impl Session {
    /// Moves the cursor to the newest sample so that reading starts from "now".
    pub fn sync_cursor(&mut self) -> Result<u64, EngineError> {
        let available = self.fetch_header()?;
        self.cursor = available;
        Ok(available)
    }
    /// Reads and revalidates the header; returns the buffer's sample count.
    pub(crate) fn fetch_header(&mut self) -> Result<u64, EngineError> {
        let reply = self.client.get_header();
        let buffer_header = self
            .transport(reply)?
            .ok_or(BufferError::HeaderMissing)?;
        self.apply_header(buffer_header.header())?;
        Ok(buffer_header.sample_count)
    }
    /// A lost transport takes the session back to `NotConnected`.
    fn transport<T>(&mut self, reply: Result<T, BufferError>) -> Result<T, EngineError> {
        if let Err(err @ (BufferError::Io(_) | BufferError::NotConnected)) = &reply {
            log::warn!("buffer connection lost: {err}");
            self.disconnect();
        }
        Ok(reply?)
    }
    /// Pulls the block starting at the cursor if it is complete.
    ///
    /// The newest `step` rows of the block are appended to the raw buffer and
    /// the cursor advances by `step`.
    pub(crate) fn next_block(&mut self) -> Result<Option<Array2<f32>>, EngineError> {
        let previous = self.header;
        let available = self.fetch_header()?;
        if self.header != previous || available < self.cursor {
            log::debug!("buffer restarted; resyncing cursor to {available}");
            self.cursor = available;
        }
        let block_size = self.params.block_size() as u64;
        if available < self.cursor + block_size {
            return Ok(None);
        }
        let reply = self
            .client
            .get_data(self.cursor, self.cursor + block_size - 1);
        let block = self.transport(reply)?;
        let expected = (block_size as usize, self.channel_count());
        if block.dim() != expected {
            return Err(BufferError::Malformed(format!(
                "data reply of {:?} samples x channels, expected {expected:?}",
                block.dim()
            ))
            .into());
        }
        let step = self.params.step();
        let tail = block.slice(s![block.nrows() - step.., ..]);
        self.raw
            .append(Axis(0), tail)
            .map_err(BufferError::from)?;
        self.cursor += step as u64;
        Ok(Some(block))
    }
    /// One step of live acquisition: read, score, record and publish.
    pub fn acquire_once(&mut self) -> Result<BlockOutcome, EngineError> {
        let Some(block) = self.next_block()? else {
            return Ok(BlockOutcome::Pending);
        };
        let mut trail = std::mem::take(&mut self.trail);
        let scored = self.score(block.view(), &mut trail);
        self.trail = trail;
        match scored {
            Some(sample) => {
                self.history.push(sample);
                self.events.publish(EngineEvent::NewValues(sample));
                Ok(BlockOutcome::Scored(sample))
            }
            None => {
                log::debug!("block before sample {} skipped: no active channels", self.cursor);
                Ok(BlockOutcome::Skipped)
            }
        }
    }
    /// Runs the acquisition loop until `cancel` fires; returns the number of
    /// samples produced.
    pub fn run_acquisition(
        &mut self,
        cancel: &CancelToken,
        poll_interval: Duration,
    ) -> Result<usize, EngineError> {
        if self.state != ConnectionState::Connected {
            return Err(EngineError::NotConnected);
        }
        let start = self.sync_cursor()?;
        log::info!("acquisition started at sample {start}");
        let mut produced = 0;
        while !cancel.is_cancelled() {
            match self.acquire_once()? {
                BlockOutcome::Pending => {
                    if !cancel.sleep(poll_interval) {
                        break;
                    }
                }
                BlockOutcome::Skipped => {}
                BlockOutcome::Scored(_) => produced += 1,
            }
        }
        log::info!("acquisition stopped after {produced} values");
        Ok(produced)
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{default_labels, BufferClient, BufferHeader, DataType};
    use crate::events;
    use crate::session::tests::{connected_session, fast_policy, producer, synthetic};
    use ndarray::ArrayView2;
    use std::thread;
    use std::time::Instant;
    /// Server whose data replies carry the given row counts instead of the
    /// requested range.
    struct TruncatedReplies {
        rows: Vec<usize>,
    }
    impl BufferClient for TruncatedReplies {
        fn connect(&mut self, _host: &str, _port: u16) -> Result<(), BufferError> {
            Ok(())
        }
        fn disconnect(&mut self) {}
        fn is_connected(&self) -> bool {
            true
        }
        fn get_header(&mut self) -> Result<Option<BufferHeader>, BufferError> {
            Ok(Some(BufferHeader {
                channel_count: 1,
                sample_count: 1000,
                event_count: 0,
                sample_rate: 64.0,
                data_type: DataType::Float32,
                labels: default_labels(1),
            }))
        }
        fn get_data(&mut self, _begin: u64, _end: u64) -> Result<Array2<f32>, BufferError> {
            Ok(Array2::zeros((self.rows.remove(0), 1)))
        }
        fn put_header(&mut self, _: usize, _: f32, _: &[String]) -> Result<(), BufferError> {
            Ok(())
        }
        fn put_data(&mut self, _block: ArrayView2<f32>) -> Result<(), BufferError> {
            Ok(())
        }
    }
    #[test]
    fn ten_seconds_yield_ten_values_per_second() {
        let (mut session, buffer, rx) = connected_session(256.0, 4);
        session.set_active_channels(&[0, 1, 2, 3]).unwrap();
        session.sync_cursor().unwrap();
        rx.drain();
        producer(&buffer)
            .put_data(synthetic(256.0, 4, 10, 0).view())
            .unwrap();
        while session.acquire_once().unwrap() != BlockOutcome::Pending {}
        let expected = 10 * session.values_per_second();
        assert_eq!(expected, 10);
        assert_eq!(session.history().len(), expected);
        assert!(session
            .history()
            .iter()
            .all(|s| s.raw_low.is_finite() && s.raw_low >= 0.0 && s.raw_high >= 0.0));
        assert!(session.history().iter().all(|s| s.raw_low > s.raw_high));
        let published = rx
            .drain()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::NewValues(_)))
            .count();
        assert_eq!(published, expected);
        assert_eq!(session.raw().dim(), (2560, 4));
        assert_eq!(session.cursor(), 2560);
    }
    #[test]
    fn glide_overlaps_blocks_and_keeps_step_rows() {
        let (mut session, buffer, _rx) = connected_session(128.0, 1);
        session.set_active_channels(&[0]).unwrap();
        session.set_glide(4).unwrap();
        session.sync_cursor().unwrap();
        producer(&buffer)
            .put_data(synthetic(128.0, 1, 2, 0).view())
            .unwrap();
        while session.acquire_once().unwrap() != BlockOutcome::Pending {}
        // blocks start every 32 samples while a whole block fits
        assert_eq!(session.history().len(), (256 - 128) / 32 + 1);
        assert_eq!(session.raw().nrows(), session.history().len() * 32);
    }
    #[test]
    fn unit_average_window_tracks_raw() {
        let (mut session, buffer, _rx) = connected_session(64.0, 2);
        session.set_active_channels(&[1]).unwrap();
        session.set_average_window(1).unwrap();
        session.sync_cursor().unwrap();
        producer(&buffer)
            .put_data(synthetic(64.0, 2, 5, 0).view())
            .unwrap();
        while session.acquire_once().unwrap() != BlockOutcome::Pending {}
        assert_eq!(session.history().len(), 5);
        for sample in session.history() {
            assert_eq!(sample.avg_low, sample.raw_low);
            assert_eq!(sample.avg_high, sample.raw_high);
        }
    }
    #[test]
    fn inactive_channels_consume_blocks_without_values() {
        let (mut session, buffer, rx) = connected_session(64.0, 2);
        session.sync_cursor().unwrap();
        rx.drain();
        producer(&buffer)
            .put_data(synthetic(64.0, 2, 1, 0).view())
            .unwrap();
        assert_eq!(session.acquire_once().unwrap(), BlockOutcome::Skipped);
        assert_eq!(session.acquire_once().unwrap(), BlockOutcome::Pending);
        assert!(session.history().is_empty());
        assert!(rx.drain().is_empty());
    }
    #[test]
    fn acquisition_requires_connection() {
        let (mut session, _buffer, _rx) = connected_session(64.0, 2);
        session.disconnect();
        assert!(matches!(
            session.run_acquisition(&CancelToken::new(), Duration::from_millis(1)),
            Err(EngineError::NotConnected)
        ));
    }
    #[test]
    fn loop_starts_at_latest_sample_and_stops_on_cancel() {
        let (mut session, buffer, rx) = connected_session(128.0, 2);
        session.set_active_channels(&[0, 1]).unwrap();
        let mut feed = producer(&buffer);
        // stale data before the loop starts is never scored
        feed.put_data(synthetic(128.0, 2, 3, 0).view()).unwrap();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let worker = thread::spawn(move || {
            let produced = session
                .run_acquisition(&worker_cancel, Duration::from_millis(1))
                .unwrap();
            (session, produced)
        });
        thread::sleep(Duration::from_millis(100));
        feed.put_data(synthetic(128.0, 2, 4, 384).view()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut values = 0;
        while values < 4 && Instant::now() < deadline {
            if let Some(EngineEvent::NewValues(_)) = rx.recv_timeout(Duration::from_millis(50)) {
                values += 1;
            }
        }
        cancel.cancel();
        let (session, produced) = worker.join().unwrap();
        assert_eq!(produced, 4);
        assert_eq!(session.history().len(), 4);
        assert_eq!(session.cursor(), 384 + 4 * 128);
    }
    #[test]
    fn short_data_reply_is_an_error() {
        let (tx, _rx) = events::channel();
        let client = TruncatedReplies { rows: vec![10, 0] };
        let mut session = Session::new(Box::new(client), tx);
        session
            .connect("localhost", 1972, &fast_policy(), &CancelToken::new())
            .unwrap();
        session.set_active_channels(&[0]).unwrap();
        for _ in 0..2 {
            assert!(matches!(
                session.acquire_once(),
                Err(EngineError::Connection(BufferError::Malformed(_)))
            ));
            assert_eq!(session.cursor(), 0);
            assert!(session.raw().is_empty());
        }
    }
    #[test]
    fn lost_transport_disconnects_session() {
        let (mut session, buffer, rx) = connected_session(64.0, 2);
        session.set_active_channels(&[0]).unwrap();
        session.sync_cursor().unwrap();
        rx.drain();
        buffer.set_online(false);
        assert!(matches!(
            session.acquire_once(),
            Err(EngineError::Connection(BufferError::Io(_)))
        ));
        assert_eq!(session.state(), ConnectionState::NotConnected);
        assert_eq!(session.header(), None);
        assert_eq!(
            rx.drain().first(),
            Some(&EngineEvent::ConnectionChanged(ConnectionState::NotConnected))
        );
        // the session no longer claims a link
        assert!(matches!(
            session.run_acquisition(&CancelToken::new(), Duration::from_millis(1)),
            Err(EngineError::NotConnected)
        ));
    }
}
