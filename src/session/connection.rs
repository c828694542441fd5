use std::time::Duration;
use ndarray::Array2;
use crate::error::EngineError;
use crate::events::CancelToken;
use crate::session::Session;
use crate::types::{ConnectionState, EngineEvent, Header};
/// How often, and how many times, to retry opening the buffer session.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// `None` retries until cancelled.
    pub max_attempts: Option<u32>,
    pub header_poll: Duration,
}
impl RetryPolicy {
    pub fn unbounded(interval: Duration, header_poll: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            header_poll,
        }
    }
    pub fn bounded(max_attempts: u32, interval: Duration, header_poll: Duration) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts.max(1)),
            header_poll,
        }
    }
}
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConnectOutcome {
    Connected(Header),
    Aborted,
}
impl Session {
    /// Opens the buffer session and waits for its header.
    ///
    /// Failed attempts are retried according to `policy`; with an unbounded
    /// policy the only ways out are a header or `cancel`.
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        policy: &RetryPolicy,
        cancel: &CancelToken,
    ) -> Result<ConnectOutcome, EngineError> {
        self.disconnect();
        let mut attempts: u32 = 0;
        loop {
            // 1. 建立连接
            loop {
                if cancel.is_cancelled() {
                    return Ok(self.abort_connect());
                }
                attempts += 1;
                match self.client.connect(host, port) {
                    Ok(()) => break,
                    Err(err) => {
                        log::debug!("connect attempt {attempts} to {host}:{port} failed: {err}");
                        if policy.max_attempts.is_some_and(|max| attempts >= max) {
                            self.set_state(ConnectionState::NotConnected);
                            return Err(err.into());
                        }
                        if !cancel.sleep(policy.interval) {
                            return Ok(self.abort_connect());
                        }
                    }
                }
            }
            self.set_state(ConnectionState::WaitingForHeader);
            // 2. 等待数据头
            loop {
                if cancel.is_cancelled() {
                    return Ok(self.abort_connect());
                }
                match self.client.get_header() {
                    Ok(Some(buffer_header)) => {
                        let header = buffer_header.header();
                        match self.apply_header(header) {
                            Ok(()) => {
                                self.set_state(ConnectionState::Connected);
                                return Ok(ConnectOutcome::Connected(header));
                            }
                            Err(err) => log::warn!("ignoring header {header:?}: {err}"),
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        log::debug!("buffer lost while waiting for header: {err}");
                        self.client.disconnect();
                        self.set_state(ConnectionState::NotConnected);
                        break;
                    }
                }
                if !cancel.sleep(policy.header_poll) {
                    return Ok(self.abort_connect());
                }
            }
            if !cancel.sleep(policy.interval) {
                return Ok(self.abort_connect());
            }
        }
    }
    fn abort_connect(&mut self) -> ConnectOutcome {
        log::info!("connect aborted");
        self.client.disconnect();
        self.set_state(ConnectionState::NotConnected);
        ConnectOutcome::Aborted
    }
    /// Closes the session and resets everything derived from the stream.
    /// Calibration baselines and bounds are kept.
    pub fn disconnect(&mut self) {
        if self.client.is_connected() {
            self.client.disconnect();
        }
        self.set_state(ConnectionState::NotConnected);
        self.cursor = 0;
        self.raw = Array2::zeros((0, 0));
        self.clear_history();
        if self.header.take().is_some() {
            self.events.publish(EngineEvent::HeaderChanged(None));
        }
        if !self.channels.is_empty() {
            self.channels.retain_below(0);
            self.events.publish(EngineEvent::ChannelsChanged(Vec::new()));
        }
    }
    /// Compares `header` with the last known one and resets derived state on change.
    pub(crate) fn apply_header(&mut self, header: Header) -> Result<(), EngineError> {
        if self.header == Some(header) {
            return Ok(());
        }
        if !(header.sample_rate > 0.0) || header.channel_count == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "header with {} Hz and {} channels",
                header.sample_rate, header.channel_count
            )));
        }
        log::info!(
            "stream header: {} Hz, {} channels",
            header.sample_rate,
            header.channel_count
        );
        let block_size = (header.sample_rate.round() as usize).max(1);
        let previous = self.params;
        self.params = match self.params.with_block_size(block_size) {
            Ok(params) => params,
            Err(_) => {
                log::warn!(
                    "glide {} does not divide block size {block_size}; falling back to 1",
                    self.params.glide()
                );
                self.params.with_glide(1).and_then(|p| p.with_block_size(block_size))?
            }
        };
        self.header = Some(header);
        self.cursor = 0;
        self.raw = Array2::zeros((0, header.channel_count));
        self.clear_history();
        self.calibration.retain_matching(header.channel_count);
        self.events.publish(EngineEvent::HeaderChanged(Some(header)));
        if self.params != previous {
            self.publish_params();
        }
        let narrowed = self.channels.retain_below(header.channel_count);
        self.recalibrate();
        if narrowed {
            self.events
                .publish(EngineEvent::ChannelsChanged(self.channels.to_vec()));
        }
        Ok(())
    }
}
