#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::BytesMut;
use mcumgr_lib_rs::protocols::serial::SerialCodec;
use mcumgr_lib_rs::protocols::smp::{SmpHeader, SmpMessage};
use mcumgr_lib_rs::{Session, SessionConfig};
use serde_cbor::Value;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::codec::Decoder;

pub const LINE_LENGTH: usize = 128;

pub fn config() -> SessionConfig {
    SessionConfig::new()
        .with_initial_timeout(Duration::from_secs(2))
        .with_subsequent_timeout(Duration::from_millis(200))
        .with_retries(3)
        .with_line_length(LINE_LENGTH)
}

/// Session wired to a scripted device over an in-memory link.
pub fn connect(config: SessionConfig) -> (Session<DuplexStream>, MockDevice) {
    let (host, device) = duplex(64 * 1024);
    let session = Session::new(host, config).unwrap();
    (session, MockDevice::new(device))
}

pub fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::Text(k.to_string()), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

pub fn field<'a>(body: &'a Value, key: &str) -> Option<&'a Value> {
    match body {
        Value::Map(m) => m.get(&Value::Text(key.to_string())),
        _ => None,
    }
}

pub fn int(body: &Value, key: &str) -> Option<i128> {
    match field(body, key) {
        Some(Value::Integer(i)) => Some(*i),
        _ => None,
    }
}

pub fn bytes(body: &Value, key: &str) -> Option<Vec<u8>> {
    match field(body, key) {
        Some(Value::Bytes(b)) => Some(b.clone()),
        _ => None,
    }
}

pub struct MockDevice {
    stream: DuplexStream,
    codec: SerialCodec,
    rx: BytesMut,
    pub requests: usize,
}

impl MockDevice {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            codec: SerialCodec::new(LINE_LENGTH),
            rx: BytesMut::new(),
            requests: 0,
        }
    }

    /// Waits for the next complete request; `None` once the host hangs up.
    pub async fn next_request(&mut self) -> Option<(SmpMessage, Value)> {
        loop {
            if let Some(packet) = self.codec.decode(&mut self.rx).unwrap() {
                let message = SmpMessage::from_bytes(&packet).unwrap();
                let body = serde_cbor::from_slice(&message.payload).unwrap();
                self.requests += 1;
                return Some((message, body));
            }
            match self.stream.read_buf(&mut self.rx).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    pub fn encode_response(&self, request: &SmpHeader, seq: u8, body: &Value) -> Vec<u8> {
        let payload = serde_cbor::to_vec(body).unwrap();
        let mut header = *request;
        header.op = request.op.response();
        header.seq = seq;
        header.len = payload.len() as u16;

        let message = SmpMessage { header, payload };
        let mut wire = BytesMut::new();
        self.codec.encode_packet(&message.to_bytes(), &mut wire).unwrap();
        wire.to_vec()
    }

    pub async fn reply(&mut self, request: &SmpHeader, body: &Value) {
        let wire = self.encode_response(request, request.seq, body);
        self.send_raw(&wire).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }
}
