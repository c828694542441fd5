use thiserror::Error;
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("buffer client is not connected")]
    NotConnected,
    #[error("buffer rejected {command} request")]
    Rejected { command: &'static str },
    #[error("unexpected reply: expected {expected:#06x}, got {actual:#06x}")]
    UnexpectedReply { expected: u16, actual: u16 },
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unsupported sample data type {0}")]
    UnsupportedDataType(u32),
    #[error("samples {begin}..={end} are not available (buffer holds {first}..{total})")]
    RangeUnavailable {
        begin: u64,
        end: u64,
        first: u64,
        total: u64,
    },
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("no header has been put into the buffer yet")]
    HeaderMissing,
    #[error("buffer at {0} is unavailable")]
    Unavailable(String),
}
impl From<ndarray::ShapeError> for BufferError {
    fn from(value: ndarray::ShapeError) -> Self {
        BufferError::Malformed(value.to_string())
    }
}
