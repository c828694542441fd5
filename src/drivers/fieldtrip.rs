use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use ndarray::{Array2, ArrayView2};
use crate::drivers::protocol::{self, Message};
use crate::drivers::source::{BufferClient, BufferHeader, DataType};
use crate::drivers::BufferError;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const IO_TIMEOUT: Duration = Duration::from_secs(10);
struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}
/// TCP client for a FieldTrip realtime buffer server.
#[derive(Default)]
pub struct FieldTripClient {
    conn: Option<Connection>,
}
impl FieldTripClient {
    pub fn new() -> Self {
        Self::default()
    }
    fn request(&mut self, command: u16, payload: &[u8]) -> Result<Message, BufferError> {
        let conn = self.conn.as_mut().ok_or(BufferError::NotConnected)?;
        let result = protocol::write_message(&mut conn.writer, command, payload)
            .and_then(|_| protocol::read_message(&mut conn.reader));
        if let Err(BufferError::Io(err)) = &result {
            // 传输层出错后连接状态不可信，直接丢弃
            log::warn!("FieldTrip connection dropped: {err}");
            self.conn = None;
        }
        result
    }
}
fn expect_reply(reply: &Message, ok: u16, err: u16, command: &'static str) -> Result<(), BufferError> {
    match reply.command {
        c if c == ok => Ok(()),
        c if c == err => Err(BufferError::Rejected { command }),
        other => Err(BufferError::UnexpectedReply {
            expected: ok,
            actual: other,
        }),
    }
}
impl BufferClient for FieldTripClient {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), BufferError> {
        self.disconnect();
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| BufferError::Unavailable(format!("{host}:{port}")))?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        let reader = BufReader::new(stream.try_clone()?);
        self.conn = Some(Connection {
            reader,
            writer: BufWriter::new(stream),
        });
        log::info!("connected to FieldTrip buffer at {host}:{port}");
        Ok(())
    }
    fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.reader.get_ref().shutdown(std::net::Shutdown::Both);
            log::info!("disconnected from FieldTrip buffer");
        }
    }
    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
    fn get_header(&mut self) -> Result<Option<BufferHeader>, BufferError> {
        let reply = self.request(protocol::GET_HDR, &[])?;
        if reply.command == protocol::GET_ERR {
            return Ok(None);
        }
        expect_reply(&reply, protocol::GET_OK, protocol::GET_ERR, "GET_HDR")?;
        protocol::decode_header(&reply.payload).map(Some)
    }
    fn get_data(&mut self, begin: u64, end: u64) -> Result<Array2<f32>, BufferError> {
        let selection = protocol::encode_selection(begin, end)?;
        let reply = self.request(protocol::GET_DAT, &selection)?;
        expect_reply(&reply, protocol::GET_OK, protocol::GET_ERR, "GET_DAT")?;
        protocol::decode_data(&reply.payload)
    }
    fn put_header(
        &mut self,
        channel_count: usize,
        sample_rate: f32,
        labels: &[String],
    ) -> Result<(), BufferError> {
        let header = BufferHeader {
            channel_count,
            sample_count: 0,
            event_count: 0,
            sample_rate,
            data_type: DataType::Float32,
            labels: labels.to_vec(),
        };
        let payload = protocol::encode_header(&header)?;
        let reply = self.request(protocol::PUT_HDR, &payload)?;
        expect_reply(&reply, protocol::PUT_OK, protocol::PUT_ERR, "PUT_HDR")
    }
    fn put_data(&mut self, block: ArrayView2<f32>) -> Result<(), BufferError> {
        let payload = protocol::encode_data(block)?;
        let reply = self.request(protocol::PUT_DAT, &payload)?;
        expect_reply(&reply, protocol::PUT_OK, protocol::PUT_ERR, "PUT_DAT")
    }
}
impl Drop for FieldTripClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::protocol::{read_message, write_message};
    use ndarray::array;
    use std::net::TcpListener;
    use std::thread;
    /// Serves one scripted exchange per incoming request.
    fn serve(replies: Vec<(u16, Vec<u8>)>) -> (u16, thread::JoinHandle<Vec<Message>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            for (command, payload) in replies {
                seen.push(read_message(&mut stream).unwrap());
                write_message(&mut stream, command, &payload).unwrap();
            }
            seen
        });
        (port, handle)
    }
    #[test]
    fn header_then_data_roundtrip_over_tcp() {
        let header = BufferHeader {
            channel_count: 2,
            sample_count: 4,
            event_count: 0,
            sample_rate: 256.0,
            data_type: DataType::Float32,
            labels: vec!["chan1".into(), "chan2".into()],
        };
        let block = array![[0.5f32, -0.5], [1.5, -1.5]];
        let (port, server) = serve(vec![
            (protocol::GET_OK, protocol::encode_header(&header).unwrap()),
            (protocol::GET_OK, protocol::encode_data(block.view()).unwrap()),
        ]);
        let mut client = FieldTripClient::new();
        client.connect("127.0.0.1", port).unwrap();
        assert!(client.is_connected());
        assert_eq!(client.get_header().unwrap(), Some(header));
        assert_eq!(client.get_data(2, 3).unwrap(), block);
        client.disconnect();
        let seen = server.join().unwrap();
        assert_eq!(seen[0].command, protocol::GET_HDR);
        assert_eq!(seen[1].command, protocol::GET_DAT);
        assert_eq!(seen[1].payload, protocol::encode_selection(2, 3).unwrap());
    }
    #[test]
    fn missing_header_is_none() {
        let (port, server) = serve(vec![(protocol::GET_ERR, Vec::new())]);
        let mut client = FieldTripClient::new();
        client.connect("127.0.0.1", port).unwrap();
        assert_eq!(client.get_header().unwrap(), None);
        server.join().unwrap();
    }
    #[test]
    fn rejected_put_is_reported() {
        let (port, server) = serve(vec![(protocol::PUT_ERR, Vec::new())]);
        let mut client = FieldTripClient::new();
        client.connect("127.0.0.1", port).unwrap();
        let err = client
            .put_header(1, 128.0, &["chan1".to_string()])
            .unwrap_err();
        assert!(matches!(err, BufferError::Rejected { command: "PUT_HDR" }));
        server.join().unwrap();
    }
    #[test]
    fn requests_without_connection_fail() {
        let mut client = FieldTripClient::new();
        assert!(matches!(client.get_header(), Err(BufferError::NotConnected)));
    }
}
