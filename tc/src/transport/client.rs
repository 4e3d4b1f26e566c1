//! Client for talking to a running chat server

use std::time::Duration;

use eyre::{Context, Result};
use sessionstore::Turn;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use super::MAX_REQUEST_SIZE;
use super::messages::{Frame, Request};

/// Timeout for connecting and for single-frame requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest wait between two frames of a chat stream
const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(120);

/// Largest frame the client accepts
const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Client for the NDJSON chat transport
#[derive(Debug, Clone)]
pub struct ChatClient {
    addr: String,
    timeout: Duration,
    frame_timeout: Duration,
}

impl ChatClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_frame_timeout(mut self, frame_timeout: Duration) -> Self {
        self.frame_timeout = frame_timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Stream a chat turn, handing each thinking and response frame to `on_frame`
    ///
    /// Returns the session id the server used.
    pub async fn chat<F>(&self, session_id: Option<String>, content: &str, mut on_frame: F) -> Result<String>
    where
        F: FnMut(&Frame),
    {
        debug!(?session_id, "ChatClient::chat: called");
        let request = Request::Chat {
            session_id,
            content: content.to_string(),
        };
        let mut reader = self.send_request(&request).await?;

        loop {
            match read_frame(&mut reader, self.frame_timeout).await? {
                Frame::Done { session_id } => return Ok(session_id),
                Frame::Error { message } => return Err(eyre::eyre!("Server error: {}", message)),
                frame @ (Frame::Thinking { .. } | Frame::Response { .. }) => on_frame(&frame),
                other => return Err(eyre::eyre!("Unexpected frame: {:?}", other)),
            }
        }
    }

    /// Single-shot chat; returns the session id and the answer
    pub async fn send(&self, session_id: Option<String>, content: &str) -> Result<(String, String)> {
        debug!(?session_id, "ChatClient::send: called");
        let request = Request::Send {
            session_id,
            content: content.to_string(),
        };
        match self.request_frame(&request, self.frame_timeout).await? {
            Frame::Reply { session_id, content } => Ok((session_id, content)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn summary(&self, session_id: &str) -> Result<String> {
        debug!(%session_id, "ChatClient::summary: called");
        let request = Request::Summary {
            session_id: session_id.to_string(),
        };
        match self.request_frame(&request, self.timeout).await? {
            Frame::Summary { summary, .. } => Ok(summary),
            other => Err(unexpected(other)),
        }
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>> {
        debug!(%session_id, "ChatClient::history: called");
        let request = Request::History {
            session_id: session_id.to_string(),
        };
        match self.request_frame(&request, self.timeout).await? {
            Frame::History { turns, .. } => Ok(turns),
            other => Err(unexpected(other)),
        }
    }

    /// Returns whether the server knew the session
    pub async fn clear(&self, session_id: &str) -> Result<bool> {
        debug!(%session_id, "ChatClient::clear: called");
        let request = Request::Clear {
            session_id: session_id.to_string(),
        };
        match self.request_frame(&request, self.timeout).await? {
            Frame::Cleared { removed, .. } => Ok(removed),
            other => Err(unexpected(other)),
        }
    }

    /// Check the server is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("ChatClient::ping: called");
        match self.request_frame(&Request::Ping, self.timeout).await? {
            Frame::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    async fn request_frame(&self, request: &Request, wait: Duration) -> Result<Frame> {
        let mut reader = self.send_request(request).await?;
        read_frame(&mut reader, wait).await
    }

    /// Connect, write one request line and hand back the read side
    async fn send_request(&self, request: &Request) -> Result<BufReader<TcpStream>> {
        debug!(addr = %self.addr, ?request, "ChatClient: sending request");

        let json = serde_json::to_string(request).context("Failed to serialize request")?;
        if json.len() >= MAX_REQUEST_SIZE {
            return Err(eyre::eyre!("Request too large: {} bytes", json.len()));
        }

        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .context("Connection timeout")?
            .context(format!("Failed to connect to {}", self.addr))?;

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(json.as_bytes())
                .await
                .context("Failed to write request")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        Ok(BufReader::new(stream))
    }
}

fn unexpected(frame: Frame) -> eyre::Report {
    match frame {
        Frame::Error { message } => eyre::eyre!("Server error: {}", message),
        other => eyre::eyre!("Unexpected frame: {:?}", other),
    }
}

/// Read and parse one frame line
async fn read_frame<R>(reader: &mut BufReader<R>, wait: Duration) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    let bytes_read = tokio::time::timeout(wait, (&mut *reader).take(MAX_FRAME_SIZE as u64 + 1).read_line(&mut line))
        .await
        .context("Read timeout")?
        .context("Failed to read frame")?;

    if bytes_read == 0 {
        return Err(eyre::eyre!("Server closed the connection"));
    }
    if bytes_read > MAX_FRAME_SIZE {
        return Err(eyre::eyre!("Frame too large: {} bytes", bytes_read));
    }

    let frame: Frame = serde_json::from_str(line.trim()).context("Failed to parse frame")?;
    debug!(?frame, "ChatClient: received frame");
    Ok(frame)
}
