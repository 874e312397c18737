//! Newline-delimited JSON-RPC over stdin/stdout

use crate::handler::McpHandler;
use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info};

/// Serve frames from `reader` until EOF, one call at a time
pub async fn serve<R, W>(handler: &McpHandler, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut writer = BufWriter::new(writer);

    while let Some(line) = lines.next_line().await.context("Failed to read from client")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!(bytes = line.len(), "Frame received");

        if let Some(response) = handler.handle_line(line).await {
            let mut frame = serde_json::to_string(&response).context("Failed to encode response")?;
            frame.push('\n');
            writer
                .write_all(frame.as_bytes())
                .await
                .context("Failed to write to client")?;
            writer.flush().await.context("Failed to flush to client")?;
        }
    }

    info!("Client closed stdin, shutting down");
    Ok(())
}

/// Serve the process's own stdin/stdout
pub async fn serve_stdio(handler: &McpHandler) -> Result<()> {
    info!("Serving JSON-RPC on stdio");
    serve(handler, tokio::io::stdin(), tokio::io::stdout()).await
}
