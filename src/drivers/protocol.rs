//! Wire format of the FieldTrip realtime buffer (protocol version 1).
//!
//! Every message is `{u16 version, u16 command, u32 bufsize}` followed by
//! `bufsize` payload bytes. All fields are little-endian.
use std::io::{Cursor, Read, Write};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{Array2, ArrayView2};
use crate::drivers::source::{BufferHeader, DataType};
use crate::drivers::BufferError;
pub const VERSION: u16 = 1;
pub const PUT_HDR: u16 = 0x101;
pub const PUT_DAT: u16 = 0x102;
pub const PUT_OK: u16 = 0x104;
pub const PUT_ERR: u16 = 0x105;
pub const GET_HDR: u16 = 0x201;
pub const GET_DAT: u16 = 0x202;
pub const GET_OK: u16 = 0x204;
pub const GET_ERR: u16 = 0x205;
pub const CHUNK_CHANNEL_NAMES: u32 = 1;
const HEADER_DEF_BYTES: usize = 24;
const DATA_DEF_BYTES: usize = 16;
// 拒绝异常大的报文，避免对端发来错误长度时一次性分配
const MAX_PAYLOAD_BYTES: u32 = 512 * 1024 * 1024;
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub command: u16,
    pub payload: Vec<u8>,
}
pub fn write_message<W: Write>(
    writer: &mut W,
    command: u16,
    payload: &[u8],
) -> Result<(), BufferError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| BufferError::Malformed(format!("payload of {} bytes", payload.len())))?;
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.write_u16::<LittleEndian>(VERSION)?;
    frame.write_u16::<LittleEndian>(command)?;
    frame.write_u32::<LittleEndian>(len)?;
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}
pub fn read_message<R: Read>(reader: &mut R) -> Result<Message, BufferError> {
    let version = reader.read_u16::<LittleEndian>()?;
    if version != VERSION {
        return Err(BufferError::Malformed(format!(
            "protocol version {version}, expected {VERSION}"
        )));
    }
    let command = reader.read_u16::<LittleEndian>()?;
    let len = reader.read_u32::<LittleEndian>()?;
    if len > MAX_PAYLOAD_BYTES {
        return Err(BufferError::Malformed(format!("payload of {len} bytes")));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(Message { command, payload })
}
pub fn encode_header(header: &BufferHeader) -> Result<Vec<u8>, BufferError> {
    let mut chunks = Vec::new();
    if !header.labels.is_empty() {
        let mut names = Vec::new();
        for label in &header.labels {
            names.extend_from_slice(label.as_bytes());
            names.push(0);
        }
        chunks.write_u32::<LittleEndian>(CHUNK_CHANNEL_NAMES)?;
        chunks.write_u32::<LittleEndian>(names.len() as u32)?;
        chunks.extend_from_slice(&names);
    }
    let mut out = Vec::with_capacity(HEADER_DEF_BYTES + chunks.len());
    out.write_u32::<LittleEndian>(to_u32(header.channel_count as u64, "channel count")?)?;
    out.write_u32::<LittleEndian>(to_u32(header.sample_count, "sample count")?)?;
    out.write_u32::<LittleEndian>(to_u32(header.event_count, "event count")?)?;
    out.write_f32::<LittleEndian>(header.sample_rate)?;
    out.write_u32::<LittleEndian>(header.data_type.code())?;
    out.write_u32::<LittleEndian>(chunks.len() as u32)?;
    out.extend_from_slice(&chunks);
    Ok(out)
}
pub fn decode_header(payload: &[u8]) -> Result<BufferHeader, BufferError> {
    if payload.len() < HEADER_DEF_BYTES {
        return Err(BufferError::Malformed(format!(
            "header of {} bytes",
            payload.len()
        )));
    }
    let mut cursor = Cursor::new(payload);
    let channel_count = cursor.read_u32::<LittleEndian>()? as usize;
    let sample_count = u64::from(cursor.read_u32::<LittleEndian>()?);
    let event_count = u64::from(cursor.read_u32::<LittleEndian>()?);
    let sample_rate = cursor.read_f32::<LittleEndian>()?;
    let data_type = DataType::from_code(cursor.read_u32::<LittleEndian>()?)?;
    let chunk_bytes = cursor.read_u32::<LittleEndian>()? as usize;
    let chunk_area = &payload[HEADER_DEF_BYTES..];
    if chunk_area.len() < chunk_bytes {
        return Err(BufferError::Malformed(format!(
            "header announces {chunk_bytes} chunk bytes, got {}",
            chunk_area.len()
        )));
    }
    let labels = channel_names(&chunk_area[..chunk_bytes])?;
    Ok(BufferHeader {
        channel_count,
        sample_count,
        event_count,
        sample_rate,
        data_type,
        labels,
    })
}
fn channel_names(mut chunks: &[u8]) -> Result<Vec<String>, BufferError> {
    let mut labels = Vec::new();
    while chunks.len() >= 8 {
        let mut cursor = Cursor::new(chunks);
        let kind = cursor.read_u32::<LittleEndian>()?;
        let size = cursor.read_u32::<LittleEndian>()? as usize;
        let body = chunks
            .get(8..8 + size)
            .ok_or_else(|| BufferError::Malformed(format!("chunk of {size} bytes overruns header")))?;
        if kind == CHUNK_CHANNEL_NAMES {
            labels = body
                .split(|b| *b == 0)
                .filter(|name| !name.is_empty())
                .map(|name| String::from_utf8_lossy(name).into_owned())
                .collect();
        }
        chunks = &chunks[8 + size..];
    }
    Ok(labels)
}
/// Encodes an inclusive sample selection.
pub fn encode_selection(begin: u64, end: u64) -> Result<Vec<u8>, BufferError> {
    let mut out = Vec::with_capacity(8);
    out.write_u32::<LittleEndian>(to_u32(begin, "begin sample")?)?;
    out.write_u32::<LittleEndian>(to_u32(end, "end sample")?)?;
    Ok(out)
}
/// Encodes a samples x channels block as float32.
pub fn encode_data(block: ArrayView2<f32>) -> Result<Vec<u8>, BufferError> {
    let (samples, channels) = block.dim();
    let body_len = samples * channels * DataType::Float32.width();
    let mut out = Vec::with_capacity(DATA_DEF_BYTES + body_len);
    out.write_u32::<LittleEndian>(to_u32(channels as u64, "channel count")?)?;
    out.write_u32::<LittleEndian>(to_u32(samples as u64, "sample count")?)?;
    out.write_u32::<LittleEndian>(DataType::Float32.code())?;
    out.write_u32::<LittleEndian>(to_u32(body_len as u64, "data size")?)?;
    // 按采样点逐行写出，通道变化最快
    for value in block.iter() {
        out.write_f32::<LittleEndian>(*value)?;
    }
    Ok(out)
}
pub fn decode_data(payload: &[u8]) -> Result<Array2<f32>, BufferError> {
    if payload.len() < DATA_DEF_BYTES {
        return Err(BufferError::Malformed(format!(
            "data definition of {} bytes",
            payload.len()
        )));
    }
    let mut cursor = Cursor::new(payload);
    let channels = cursor.read_u32::<LittleEndian>()? as usize;
    let samples = cursor.read_u32::<LittleEndian>()? as usize;
    let data_type = DataType::from_code(cursor.read_u32::<LittleEndian>()?)?;
    let body_len = cursor.read_u32::<LittleEndian>()? as usize;
    let count = samples * channels;
    let expected = count * data_type.width();
    if body_len < expected || payload.len() - DATA_DEF_BYTES < expected {
        return Err(BufferError::Malformed(format!(
            "{samples}x{channels} block needs {expected} bytes, got {}",
            payload.len() - DATA_DEF_BYTES
        )));
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(read_sample(&mut cursor, data_type)?);
    }
    Ok(Array2::from_shape_vec((samples, channels), values)?)
}
fn read_sample(cursor: &mut Cursor<&[u8]>, data_type: DataType) -> Result<f32, BufferError> {
    let value = match data_type {
        DataType::Int8 => f32::from(cursor.read_i8()?),
        DataType::UInt8 => f32::from(cursor.read_u8()?),
        DataType::Int16 => f32::from(cursor.read_i16::<LittleEndian>()?),
        DataType::UInt16 => f32::from(cursor.read_u16::<LittleEndian>()?),
        DataType::Int32 => cursor.read_i32::<LittleEndian>()? as f32,
        DataType::UInt32 => cursor.read_u32::<LittleEndian>()? as f32,
        DataType::Int64 => cursor.read_i64::<LittleEndian>()? as f32,
        DataType::UInt64 => cursor.read_u64::<LittleEndian>()? as f32,
        DataType::Float32 => cursor.read_f32::<LittleEndian>()?,
        DataType::Float64 => cursor.read_f64::<LittleEndian>()? as f32,
    };
    Ok(value)
}
fn to_u32(value: u64, what: &str) -> Result<u32, BufferError> {
    u32::try_from(value).map_err(|_| BufferError::Malformed(format!("{what} {value} exceeds u32")))
}
