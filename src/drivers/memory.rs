use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use ndarray::{Array2, ArrayView2};
use parking_lot::Mutex;
use crate::drivers::source::{BufferClient, BufferHeader, DataType};
use crate::drivers::BufferError;
/// Default ring capacity: ten minutes at 512 Hz.
pub const DEFAULT_CAPACITY: usize = 512 * 600;
struct StoredHeader {
    channel_count: usize,
    sample_rate: f32,
    labels: Vec<String>,
}
struct Inner {
    header: Option<StoredHeader>,
    rows: VecDeque<Vec<f32>>, // sample -> channels
    total: u64,
    capacity: usize,
    online: bool,
    refuse_connects: usize,
}
impl Inner {
    fn first_available(&self) -> u64 {
        self.total - self.rows.len() as u64
    }
}
/// In-process ring buffer with the same semantics as a FieldTrip server.
///
/// Cloning shares the underlying storage, so a playback sink and an
/// acquisition session can talk to the same buffer.
#[derive(Clone)]
pub struct MemoryBuffer {
    inner: Arc<Mutex<Inner>>,
}
impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}
impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                header: None,
                rows: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                total: 0,
                capacity: capacity.max(1),
                online: true,
                refuse_connects: 0,
            })),
        }
    }
    pub fn client(&self) -> MemoryClient {
        MemoryClient {
            buffer: self.clone(),
            connected: false,
        }
    }
    /// While offline every connect attempt fails and connected clients lose
    /// their connection on the next request.
    pub fn set_online(&self, online: bool) {
        self.inner.lock().online = online;
    }
    /// Makes the next `attempts` connects fail, as a server that is still starting.
    pub fn refuse_connects(&self, attempts: usize) {
        self.inner.lock().refuse_connects = attempts;
    }
    pub fn sample_count(&self) -> u64 {
        self.inner.lock().total
    }
    fn check_connect(&self, host: &str, port: u16) -> Result<(), BufferError> {
        let mut inner = self.inner.lock();
        if !inner.online {
            return Err(BufferError::Unavailable(format!("{host}:{port}")));
        }
        if inner.refuse_connects > 0 {
            inner.refuse_connects -= 1;
            return Err(BufferError::Unavailable(format!("{host}:{port}")));
        }
        Ok(())
    }
}
/// Session handle onto a [`MemoryBuffer`].
pub struct MemoryClient {
    buffer: MemoryBuffer,
    connected: bool,
}
impl MemoryClient {
    fn ensure_connected(&mut self) -> Result<(), BufferError> {
        if !self.connected {
            return Err(BufferError::NotConnected);
        }
        if !self.buffer.inner.lock().online {
            self.connected = false;
            return Err(BufferError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "buffer went offline",
            )));
        }
        Ok(())
    }
}
impl BufferClient for MemoryClient {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), BufferError> {
        self.buffer.check_connect(host, port)?;
        self.connected = true;
        Ok(())
    }
    fn disconnect(&mut self) {
        self.connected = false;
    }
    fn is_connected(&self) -> bool {
        self.connected
    }
    fn get_header(&mut self) -> Result<Option<BufferHeader>, BufferError> {
        self.ensure_connected()?;
        let inner = self.buffer.inner.lock();
        Ok(inner.header.as_ref().map(|h| BufferHeader {
            channel_count: h.channel_count,
            sample_count: inner.total,
            event_count: 0,
            sample_rate: h.sample_rate,
            data_type: DataType::Float32,
            labels: h.labels.clone(),
        }))
    }
    fn get_data(&mut self, begin: u64, end: u64) -> Result<Array2<f32>, BufferError> {
        self.ensure_connected()?;
        let inner = self.buffer.inner.lock();
        let channels = inner
            .header
            .as_ref()
            .map(|h| h.channel_count)
            .ok_or(BufferError::HeaderMissing)?;
        let first = inner.first_available();
        if end < begin || begin < first || end >= inner.total {
            return Err(BufferError::RangeUnavailable {
                begin,
                end,
                first,
                total: inner.total,
            });
        }
        let from = (begin - first) as usize;
        let len = (end - begin + 1) as usize;
        let mut values = Vec::with_capacity(len * channels);
        for row in inner.rows.range(from..from + len) {
            values.extend_from_slice(row);
        }
        Ok(Array2::from_shape_vec((len, channels), values)?)
    }
    fn put_header(
        &mut self,
        channel_count: usize,
        sample_rate: f32,
        labels: &[String],
    ) -> Result<(), BufferError> {
        self.ensure_connected()?;
        let mut inner = self.buffer.inner.lock();
        // 与 FieldTrip 一致：写入新头会清空已有数据
        inner.header = Some(StoredHeader {
            channel_count,
            sample_rate,
            labels: labels.to_vec(),
        });
        inner.rows.clear();
        inner.total = 0;
        Ok(())
    }
    fn put_data(&mut self, block: ArrayView2<f32>) -> Result<(), BufferError> {
        self.ensure_connected()?;
        let mut inner = self.buffer.inner.lock();
        let channels = inner
            .header
            .as_ref()
            .map(|h| h.channel_count)
            .ok_or(BufferError::HeaderMissing)?;
        if block.ncols() != channels {
            return Err(BufferError::ChannelMismatch {
                expected: channels,
                actual: block.ncols(),
            });
        }
        for row in block.rows() {
            if inner.rows.len() == inner.capacity {
                inner.rows.pop_front();
            }
            inner.rows.push_back(row.to_vec());
            inner.total += 1;
        }
        Ok(())
    }
}
