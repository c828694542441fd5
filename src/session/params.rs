use crate::error::EngineError;
/// Block size used until the source announces its sample rate.
pub const DEFAULT_BLOCK_SIZE: usize = 512;
pub const DEFAULT_GLIDE: usize = 1;
pub const DEFAULT_AVERAGE_WINDOW: usize = 20;
/// Block geometry of the power pipeline.
///
/// Consecutive blocks start `step = block_size / glide` samples apart. Only
/// glides that split the block into whole steps are accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockParameters {
    block_size: usize,
    glide: usize,
    average_window: usize,
}
impl Default for BlockParameters {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            glide: DEFAULT_GLIDE,
            average_window: DEFAULT_AVERAGE_WINDOW,
        }
    }
}
impl BlockParameters {
    pub fn new(block_size: usize, glide: usize, average_window: usize) -> Result<Self, EngineError> {
        if glide == 0 || block_size == 0 || block_size % glide != 0 {
            return Err(EngineError::InvalidBlockStep { block_size, glide });
        }
        if average_window == 0 {
            return Err(EngineError::InvalidArgument(
                "average window must be at least 1".into(),
            ));
        }
        Ok(Self {
            block_size,
            glide,
            average_window,
        })
    }
    pub fn block_size(&self) -> usize {
        self.block_size
    }
    pub fn glide(&self) -> usize {
        self.glide
    }
    pub fn average_window(&self) -> usize {
        self.average_window
    }
    pub fn step(&self) -> usize {
        self.block_size / self.glide
    }
    pub fn with_glide(self, glide: usize) -> Result<Self, EngineError> {
        Self::new(self.block_size, glide, self.average_window)
    }
    pub fn with_average_window(self, average_window: usize) -> Result<Self, EngineError> {
        Self::new(self.block_size, self.glide, average_window)
    }
    pub fn with_block_size(self, block_size: usize) -> Result<Self, EngineError> {
        Self::new(block_size, self.glide, self.average_window)
    }
    /// Number of power values produced per second of signal.
    pub fn values_per_second(&self, sample_rate: f64) -> usize {
        (sample_rate / self.step() as f64).floor().max(0.0) as usize
    }
}
