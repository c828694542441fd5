// src/drivers/mod.rs
// 采样缓冲区的客户端实现（远端 FieldTrip 与进程内内存缓冲）
pub mod error;
pub mod fieldtrip;
pub mod memory;
pub mod protocol;
pub mod source;
pub use error::BufferError;
pub use fieldtrip::FieldTripClient;
pub use memory::{MemoryBuffer, MemoryClient};
pub use source::{default_labels, BufferClient, BufferHeader, DataType};
