//! TCP listener for the server side

use std::future::Future;

use eyre::{Context, Result};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::MAX_REQUEST_SIZE;
use super::messages::{Frame, Request};
use crate::service::{ChatRequest, ChatService};

/// Bind the transport listener
pub async fn bind(addr: &str) -> Result<TcpListener> {
    debug!(%addr, "bind: called");
    let listener = TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind {}", addr))?;
    info!(addr = %listener.local_addr()?, "Listening");
    Ok(listener)
}

/// Accept connections until `shutdown` resolves
///
/// Each connection is served on its own task.
pub async fn serve(listener: TcpListener, service: ChatService, shutdown: impl Future<Output = ()>) -> Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "serve: accept failed");
                        continue;
                    }
                };
                debug!(%peer, "serve: connection accepted");
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, service).await {
                        debug!(%peer, error = %e, "serve: connection ended with error");
                    }
                });
            }
            _ = &mut shutdown => {
                info!("serve: shutdown requested, no longer accepting connections");
                return Ok(());
            }
        }
    }
}

/// Serve requests on one connection until the peer closes it
pub async fn handle_connection<S>(stream: S, service: ChatService) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    loop {
        let Some(request) = read_request(&mut reader, &mut writer).await? else {
            debug!("handle_connection: peer closed");
            return Ok(());
        };
        dispatch(request, &service, &mut reader, &mut writer).await?;
    }
}

/// Read one request line
///
/// Returns `None` at end of stream. Oversized lines end the connection;
/// unparseable lines are answered with an error frame and skipped.
async fn read_request<R, W>(reader: &mut BufReader<R>, writer: &mut W) -> Result<Option<Request>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let mut line = String::new();
        let bytes_read = (&mut *reader)
            .take(MAX_REQUEST_SIZE as u64 + 1)
            .read_line(&mut line)
            .await
            .context("Failed to read request")?;

        if bytes_read == 0 {
            return Ok(None);
        }
        if bytes_read > MAX_REQUEST_SIZE {
            warn!(bytes_read, "read_request: request too large");
            send_frame(writer, &Frame::error(format!("Request too large: limit is {} bytes", MAX_REQUEST_SIZE))).await?;
            return Err(eyre::eyre!("Request too large: {} bytes", bytes_read));
        }
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Request>(line.trim()) {
            Ok(request) => {
                debug!(?request, "read_request: parsed request");
                return Ok(Some(request));
            }
            Err(e) => {
                debug!(error = %e, "read_request: invalid request");
                send_frame(writer, &Frame::error(format!("Invalid request: {}", e))).await?;
            }
        }
    }
}

async fn dispatch<R, W>(request: Request, service: &ChatService, reader: &mut BufReader<R>, writer: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match request {
        Request::Chat { session_id, content } => {
            stream_chat(ChatRequest::new(session_id, content), service, reader, writer).await
        }
        Request::Send { session_id, content } => {
            let frame = match service.send(ChatRequest::new(session_id, content)).await {
                Ok(reply) => Frame::Reply {
                    session_id: reply.session_id,
                    content: reply.content,
                },
                Err(e) => Frame::error(e.to_string()),
            };
            send_frame(writer, &frame).await
        }
        Request::Summary { session_id } => {
            let frame = match service.summary(&session_id).await {
                Ok(summary) => Frame::Summary { session_id, summary },
                Err(e) => Frame::error(e.to_string()),
            };
            send_frame(writer, &frame).await
        }
        Request::History { session_id } => {
            let frame = match service.history(&session_id).await {
                Ok(turns) => Frame::History { session_id, turns },
                Err(e) => Frame::error(e.to_string()),
            };
            send_frame(writer, &frame).await
        }
        Request::Clear { session_id } => {
            let frame = match service.clear(&session_id).await {
                Ok(removed) => Frame::Cleared { session_id, removed },
                Err(e) => Frame::error(e.to_string()),
            };
            send_frame(writer, &frame).await
        }
        Request::Ping => {
            send_frame(
                writer,
                &Frame::Pong {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            )
            .await
        }
    }
}

/// Forward a chat stream frame by frame
///
/// The read half is watched while the stream runs. End of stream or a read
/// error on it means the peer hung up, and the stream is dropped, which
/// cancels the request before anything more reaches the session. A failed
/// write does the same. Bytes that arrive early belong to the next request
/// and are left in the buffer.
async fn stream_chat<R, W>(
    request: ChatRequest,
    service: &ChatService,
    reader: &mut BufReader<R>,
    writer: &mut W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stream = match service.stream_chat(request).await {
        Ok(stream) => stream,
        Err(e) => return send_frame(writer, &Frame::error(e.to_string())).await,
    };
    let session_id = stream.session_id().to_string();
    let mut watching = true;

    loop {
        let item = tokio::select! {
            item = stream.next() => item,
            peer = reader.fill_buf(), if watching => {
                match peer {
                    Ok([]) | Err(_) => {
                        debug!(%session_id, "stream_chat: peer hung up, cancelling");
                        return Ok(());
                    }
                    Ok(_) => {
                        watching = false;
                        continue;
                    }
                }
            }
        };
        match item {
            Some(Ok(envelope)) => send_frame(writer, &Frame::from(envelope)).await?,
            Some(Err(e)) => return send_frame(writer, &Frame::error(e.to_string())).await,
            None => break,
        }
    }
    send_frame(writer, &Frame::Done { session_id }).await
}

/// Send one frame
pub async fn send_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(frame).context("Failed to serialize frame")?;
    writer.write_all(json.as_bytes()).await.context("Failed to write frame")?;
    writer.write_all(b"\n").await.context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush frame")?;
    Ok(())
}
