use thiserror::Error;
use crate::drivers::BufferError;
use crate::recorder::RecordingError;
use crate::types::WorkerKind;
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("buffer connection failed: {0}")]
    Connection(#[from] BufferError),
    #[error("channels {requested:?} are outside 0..{channel_count}")]
    InvalidChannelRange {
        requested: Vec<usize>,
        channel_count: usize,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("glide {glide} does not split block size {block_size} into whole steps")]
    InvalidBlockStep { block_size: usize, glide: usize },
    #[error("session is not connected")]
    NotConnected,
    #[error("stream header changed during calibration")]
    HeaderChanged,
    #[error("{0:?} worker is still running")]
    Busy(WorkerKind),
    #[error("{0:?} worker panicked; session state was lost")]
    WorkerPanicked(WorkerKind),
    #[error(transparent)]
    Recording(#[from] RecordingError),
}
