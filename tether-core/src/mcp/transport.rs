//! Transport Implementations
//!
//! Transports handle framing and I/O; the dispatcher never sees raw bytes.

use super::protocol::{ProtocolError, ProtocolRequest, ProtocolResponse, RequestId};
use crate::error::{Result, TetherError};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

/// Transport trait for protocol communication
#[async_trait]
pub trait Transport: Send {
    /// Next request, or `None` once the peer is gone
    async fn receive(&mut self) -> Result<Option<ProtocolRequest>>;

    /// Deliver one response
    async fn send(&mut self, response: ProtocolResponse) -> Result<()>;
}

/// Newline-delimited JSON over any async reader/writer pair.
///
/// Malformed lines are answered with a -32700 parse error (id null) and
/// skipped; blank lines are ignored.
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
}

/// Line transport over the process's stdin/stdout
pub type StdioTransport = LineTransport<BufReader<Stdin>, Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        LineTransport::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Give back the writer, e.g. to inspect what was sent
    pub fn into_writer(self) -> W {
        self.writer
    }

    async fn write_frame(&mut self, response: &ProtocolResponse) -> Result<()> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');
        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| TetherError::Protocol(format!("Failed to write response: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| TetherError::Protocol(format!("Failed to flush response: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<ProtocolRequest>> {
        loop {
            // Raw bytes: a frame that is not UTF-8 is a parse error, not an I/O failure
            let mut line = Vec::new();
            let read = self
                .reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| TetherError::Protocol(format!("Failed to read request: {}", e)))?;
            if read == 0 {
                return Ok(None);
            }

            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_slice(trimmed) {
                Ok(request) => return Ok(Some(request)),
                Err(e) => {
                    tracing::warn!(error = %e, "malformed request frame");
                    let response =
                        ProtocolResponse::error(RequestId::Null, ProtocolError::parse_error(e));
                    self.write_frame(&response).await?;
                }
            }
        }
    }

    async fn send(&mut self, response: ProtocolResponse) -> Result<()> {
        self.write_frame(&response).await
    }
}

/// In-memory transport for testing
#[derive(Debug, Default)]
pub struct MemoryTransport {
    requests: VecDeque<ProtocolRequest>,
    responses: Vec<ProtocolResponse>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request to be received
    pub fn push_request(&mut self, request: ProtocolRequest) {
        self.requests.push_back(request);
    }

    /// All sent responses
    pub fn responses(&self) -> &[ProtocolResponse] {
        &self.responses
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn receive(&mut self) -> Result<Option<ProtocolRequest>> {
        Ok(self.requests.pop_front())
    }

    async fn send(&mut self, response: ProtocolResponse) -> Result<()> {
        self.responses.push(response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_line_transport_parses_and_reports_bad_frames() {
        let input: &[u8] = b"\n{not json}\n{\"id\":1,\"method\":\"tools/list\"}\n";
        let mut transport = LineTransport::new(input, Vec::new());

        let request = transport.receive().await.unwrap().unwrap();
        assert_eq!(request.method, "tools/list");
        assert!(transport.receive().await.unwrap().is_none());

        transport
            .send(ProtocolResponse::success(RequestId::Number(1), json!({"tools": []})))
            .await
            .unwrap();

        let output = String::from_utf8(transport.into_writer()).unwrap();
        let frames: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["error"]["code"], -32700);
        assert_eq!(frames[0]["id"], serde_json::Value::Null);
        assert_eq!(frames[1]["id"], 1);
    }

    #[tokio::test]
    async fn test_line_transport_survives_invalid_utf8() {
        let mut input = vec![0xff, 0xfe, b'\n'];
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\"}\n");
        let mut transport = LineTransport::new(std::io::Cursor::new(input), Vec::new());

        let request = transport.receive().await.unwrap().unwrap();
        assert_eq!(request.id, RequestId::Number(2));
        assert_eq!(request.method, "tools/list");
        assert!(transport.receive().await.unwrap().is_none());

        let output = String::from_utf8(transport.into_writer()).unwrap();
        let frame: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(frame["error"]["code"], -32700);
        assert_eq!(frame["id"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_line_transport_frames_over_mock_io() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"initialize\"}\n")
            .build();
        let writer = tokio_test::io::Builder::new()
            .write(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\n")
            .build();
        let mut transport = LineTransport::new(BufReader::new(reader), writer);

        let request = transport.receive().await.unwrap().unwrap();
        assert_eq!(request.id, RequestId::Number(7));
        transport
            .send(ProtocolResponse::success(request.id, json!({"ok": true})))
            .await
            .unwrap();
        assert!(transport.receive().await.unwrap().is_none());
    }
}
