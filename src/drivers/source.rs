use ndarray::{Array2, ArrayView2};
use crate::drivers::BufferError;
use crate::types::Header;
/// Sample encodings understood by the buffer protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}
impl DataType {
    pub fn from_code(code: u32) -> Result<Self, BufferError> {
        Ok(match code {
            1 => DataType::UInt8,
            2 => DataType::UInt16,
            3 => DataType::UInt32,
            4 => DataType::UInt64,
            5 => DataType::Int8,
            6 => DataType::Int16,
            7 => DataType::Int32,
            8 => DataType::Int64,
            9 => DataType::Float32,
            10 => DataType::Float64,
            other => return Err(BufferError::UnsupportedDataType(other)),
        })
    }
    pub fn code(self) -> u32 {
        match self {
            DataType::UInt8 => 1,
            DataType::UInt16 => 2,
            DataType::UInt32 => 3,
            DataType::UInt64 => 4,
            DataType::Int8 => 5,
            DataType::Int16 => 6,
            DataType::Int32 => 7,
            DataType::Int64 => 8,
            DataType::Float32 => 9,
            DataType::Float64 => 10,
        }
    }
    pub fn width(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }
}
/// Header as reported by the remote buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferHeader {
    pub channel_count: usize,
    /// Total number of samples written since the header was put.
    pub sample_count: u64,
    pub event_count: u64,
    pub sample_rate: f32,
    pub data_type: DataType,
    pub labels: Vec<String>,
}
impl BufferHeader {
    pub fn header(&self) -> Header {
        Header {
            sample_rate: f64::from(self.sample_rate),
            channel_count: self.channel_count,
        }
    }
}
/// Session to a ring buffer holding multi-channel samples.
///
/// Sample ranges are inclusive on both ends and counted from the moment the
/// header was put. Matrices are samples x channels.
pub trait BufferClient: Send {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), BufferError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    /// `Ok(None)` while the buffer has no header yet.
    fn get_header(&mut self) -> Result<Option<BufferHeader>, BufferError>;
    fn get_data(&mut self, begin: u64, end: u64) -> Result<Array2<f32>, BufferError>;
    fn put_header(
        &mut self,
        channel_count: usize,
        sample_rate: f32,
        labels: &[String],
    ) -> Result<(), BufferError>;
    fn put_data(&mut self, block: ArrayView2<f32>) -> Result<(), BufferError>;
}
impl<C: BufferClient + ?Sized> BufferClient for Box<C> {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), BufferError> {
        (**self).connect(host, port)
    }
    fn disconnect(&mut self) {
        (**self).disconnect()
    }
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
    fn get_header(&mut self) -> Result<Option<BufferHeader>, BufferError> {
        (**self).get_header()
    }
    fn get_data(&mut self, begin: u64, end: u64) -> Result<Array2<f32>, BufferError> {
        (**self).get_data(begin, end)
    }
    fn put_header(
        &mut self,
        channel_count: usize,
        sample_rate: f32,
        labels: &[String],
    ) -> Result<(), BufferError> {
        (**self).put_header(channel_count, sample_rate, labels)
    }
    fn put_data(&mut self, block: ArrayView2<f32>) -> Result<(), BufferError> {
        (**self).put_data(block)
    }
}
/// Channel labels used when a producer does not name its channels.
pub fn default_labels(channel_count: usize) -> Vec<String> {
    (1..=channel_count).map(|i| format!("chan{i}")).collect()
}
