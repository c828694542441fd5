// src/types.rs
use std::path::PathBuf;
/// Stream description supplied by the sample source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Header {
    pub sample_rate: f64,
    pub channel_count: usize,
}
// 连接状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    WaitingForHeader,
    Connected,
}
/// One scored block: raw and smoothed power of both bands.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowerSample {
    pub raw_low: f64,
    pub raw_high: f64,
    pub avg_low: f64,
    pub avg_high: f64,
}
/// Expected value range of the averaged band powers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationBounds {
    pub low_min: f64,
    pub low_max: f64,
    pub high_min: f64,
    pub high_max: f64,
}
impl Default for CalibrationBounds {
    fn default() -> Self {
        Self {
            low_min: 0.0,
            low_max: 1.0,
            high_min: 0.0,
            high_max: 1.0,
        }
    }
}
impl CalibrationBounds {
    /// Maps an averaged low-band value into `[0, 1]`.
    pub fn normalize_low(&self, value: f64) -> f64 {
        normalize(value, self.low_min, self.low_max)
    }
    /// Maps an averaged high-band value into `[0, 1]`.
    pub fn normalize_high(&self, value: f64) -> f64 {
        normalize(value, self.high_min, self.high_max)
    }
}
fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    // 标定区间退化（例如全零基线）时不做除法
    if !span.is_finite() || span <= f64::EPSILON || !value.is_finite() {
        return 0.0;
    }
    ((value - min) / span).clamp(0.0, 1.0)
}
/// Which band(s) a calibration run should set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalibrationTarget {
    pub low: bool,
    pub high: bool,
}
impl CalibrationTarget {
    pub const LOW: Self = Self { low: true, high: false };
    pub const HIGH: Self = Self { low: false, high: true };
    pub const BOTH: Self = Self { low: true, high: true };
}
/// Long-running activities that own the session while they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerKind {
    Connect,
    Acquisition,
    Calibration,
    Playback,
}
// 外部发给引擎的命令
#[derive(Clone, Debug)]
pub enum EngineCommand {
    Connect { host: String, port: u16 },
    Disconnect,
    SetGlide(usize),
    SetAverageWindow(usize),
    SetChannels(Vec<usize>),
    ActivateChannel(usize),
    DeactivateChannel(usize),
    StartAcquisition,
    StopAcquisition,
    StartCalibration(CalibrationTarget),
    StopCalibration,
    StartPlayback { path: PathBuf, host: String, port: u16 },
    StopPlayback,
    SaveRecording(PathBuf),
    Shutdown,
}
// 引擎发给外部的事件
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    ConnectionChanged(ConnectionState),
    HeaderChanged(Option<Header>),
    ChannelsChanged(Vec<usize>),
    NewValues(PowerSample),
    CalibrationProgress(u8),
    CalibrationFinished(CalibrationBounds),
    BoundsChanged(CalibrationBounds),
    /// Block parameters after a setter or a new header changed them.
    ParametersChanged {
        block_size: usize,
        glide: usize,
        average_window: usize,
    },
    PlaybackFinished,
    WorkerFailed { worker: WorkerKind, reason: String },
    CommandRejected { reason: String },
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn default_bounds_are_unit_range() {
        let bounds = CalibrationBounds::default();
        assert_eq!(bounds.normalize_low(0.25), 0.25);
        assert_eq!(bounds.normalize_high(2.0), 1.0);
        assert_eq!(bounds.normalize_high(-1.0), 0.0);
    }
    #[test]
    fn degenerate_bounds_do_not_divide_by_zero() {
        let bounds = CalibrationBounds {
            low_min: 0.0,
            low_max: 0.0,
            high_min: 3.0,
            high_max: 3.0,
        };
        assert_eq!(bounds.normalize_low(0.0), 0.0);
        assert_eq!(bounds.normalize_high(5.0), 0.0);
    }
}
