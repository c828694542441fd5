// src/session/mod.rs
// 会话：一个缓冲区连接及其派生的全部状态
pub mod acquisition;
pub mod calibration;
pub mod channels;
pub mod connection;
pub mod params;
pub mod spectrum;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use ndarray::{Array2, ArrayView2};
use crate::drivers::BufferClient;
use crate::error::EngineError;
use crate::events::EventSender;
use crate::recorder::Recording;
use crate::types::{CalibrationBounds, ConnectionState, EngineEvent, Header, PowerSample};
pub use acquisition::BlockOutcome;
pub use calibration::{Calibration, CalibrationOutcome};
pub use channels::ChannelSet;
pub use connection::{ConnectOutcome, RetryPolicy};
pub use params::BlockParameters;
pub use spectrum::{Band, BandPowerEngine, PowerTrail, HIGH_BAND, LOW_BAND};
/// Everything derived from one buffer connection.
///
/// A session is owned by exactly one worker at a time; it is moved into the
/// worker thread and handed back when the worker is joined.
pub struct Session {
    client: Box<dyn BufferClient>,
    events: EventSender,
    state: ConnectionState,
    /// Mirrors `state == Connected`; readable while a worker owns the session.
    link_up: Arc<AtomicBool>,
    header: Option<Header>,
    params: BlockParameters,
    cursor: u64,
    raw: Array2<f32>,
    channels: ChannelSet,
    history: Vec<PowerSample>,
    trail: PowerTrail,
    calibration: Calibration,
    estimator: BandPowerEngine,
}
impl Session {
    pub fn new(client: Box<dyn BufferClient>, events: EventSender) -> Self {
        Self {
            client,
            events,
            state: ConnectionState::NotConnected,
            link_up: Arc::new(AtomicBool::new(false)),
            header: None,
            params: BlockParameters::default(),
            cursor: 0,
            raw: Array2::zeros((0, 0)),
            channels: ChannelSet::default(),
            history: Vec::new(),
            trail: PowerTrail::default(),
            calibration: Calibration::default(),
            estimator: BandPowerEngine::new(),
        }
    }
    pub fn with_parameters(mut self, params: BlockParameters) -> Self {
        self.params = params;
        self
    }
    pub fn state(&self) -> ConnectionState {
        self.state
    }
    /// Shared flag that is set before `ConnectionChanged(Connected)` is published.
    pub fn link_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.link_up)
    }
    pub fn header(&self) -> Option<Header> {
        self.header
    }
    pub fn channel_count(&self) -> usize {
        self.header.map(|h| h.channel_count).unwrap_or(0)
    }
    pub fn params(&self) -> BlockParameters {
        self.params
    }
    /// Index of the next unread sample in the source.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
    pub fn raw(&self) -> &Array2<f32> {
        &self.raw
    }
    pub fn history(&self) -> &[PowerSample] {
        &self.history
    }
    pub fn bounds(&self) -> CalibrationBounds {
        self.calibration.bounds()
    }
    pub fn values_per_second(&self) -> usize {
        self.header
            .map(|h| self.params.values_per_second(h.sample_rate))
            .unwrap_or(0)
    }
    pub fn set_glide(&mut self, glide: usize) -> Result<(), EngineError> {
        let params = self.params.with_glide(glide)?;
        self.update_params(params);
        Ok(())
    }
    pub fn set_average_window(&mut self, average_window: usize) -> Result<(), EngineError> {
        let params = self.params.with_average_window(average_window)?;
        self.update_params(params);
        Ok(())
    }
    fn update_params(&mut self, params: BlockParameters) {
        if params == self.params {
            return;
        }
        log::info!(
            "block parameters: size {} glide {} average {}",
            params.block_size(),
            params.glide(),
            params.average_window()
        );
        self.params = params;
        self.publish_params();
        self.recalibrate();
    }
    pub(crate) fn publish_params(&self) {
        self.events.publish(EngineEvent::ParametersChanged {
            block_size: self.params.block_size(),
            glide: self.params.glide(),
            average_window: self.params.average_window(),
        });
    }
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.trail.clear();
    }
    /// Snapshot of the raw buffer in recording form.
    pub fn recording(&self) -> Option<Recording> {
        self.header
            .map(|h| Recording::new(h.sample_rate as f32, self.raw.clone()))
    }
    /// Scores `block` with the current parameters against `trail`.
    pub fn score(&mut self, block: ArrayView2<f32>, trail: &mut PowerTrail) -> Option<PowerSample> {
        let sample_rate = self.header?.sample_rate;
        self.estimator
            .score_block(block, &self.channels, sample_rate, &self.params, trail)
    }
    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        log::info!("connection state: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.link_up
            .store(state == ConnectionState::Connected, Ordering::SeqCst);
        self.events.publish(EngineEvent::ConnectionChanged(state));
    }
}
