//! Line-delimited JSON over a byte pipe (stdin/stdout in production).
//!
//! One request per input line, one response per output line. Blank lines
//! are ignored. End of input ends the transport; the server then drains
//! and stops.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::{ChannelTransport, Responder};
use crate::protocol::decode_request;

/// Transport over the process's stdin and stdout.
pub fn stdio() -> ChannelTransport {
    pipe(tokio::io::stdin(), tokio::io::stdout())
}

/// Transport over an arbitrary reader/writer pair.
pub fn pipe<R, W>(reader: R, writer: W) -> ChannelTransport
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (mut transport, sink) = ChannelTransport::new("stdio");
    let (reply, mut outbound) = Responder::channel();
    let cancel = transport.cancel_token();

    transport.spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read request line");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_request(&line) {
                Ok(request) => {
                    if !sink.forward(request, reply.clone()).await {
                        break;
                    }
                }
                Err(response) => reply.send(response),
            }
        }
    });

    // Runs until every Responder clone is gone, so responses for requests
    // still in flight when input ends are written out.
    transport.spawn(async move {
        let mut writer = writer;
        while let Some(response) = outbound.recv().await {
            let mut line = response.to_json_line();
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::warn!(error = %e, "failed to write response");
                break;
            }
            if let Err(e) = writer.flush().await {
                tracing::warn!(error = %e, "failed to flush response");
                break;
            }
        }
    });

    transport
}
