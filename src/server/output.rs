//! Output draining and readiness detection for the server process.
//!
//! The server announces that it is accepting uploads with a line such as
//! `Server starting at http://192.168.1.20:8080`. Everything else it prints is
//! logged and otherwise ignored.

use crate::server::ServerId;
use futures::stream::{self, Stream, StreamExt};
use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use std::io;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Marker phrase of the readiness line
pub const READINESS_MARKER: &str = "Server starting at";

/// A parsed readiness line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// Announced port; `None` when the line was malformed
    pub port: Option<u16>,
}

/// Parses a readiness line.
///
/// Returns `None` for lines without the marker. For marker lines the text
/// after the last `:` is the port; when that is not a valid port the line
/// still counts as readiness, just without a port.
///
/// ```
/// use upload_supervisor::server::output::parse_readiness_line;
///
/// let ready = parse_readiness_line("Server starting at 0.0.0.0:9090").unwrap();
/// assert_eq!(ready.port, Some(9090));
/// assert!(parse_readiness_line("Video directory: /data").is_none());
/// ```
pub fn parse_readiness_line(line: &str) -> Option<Readiness> {
    if !line.contains(READINESS_MARKER) {
        return None;
    }

    let port = line
        .rsplit_once(':')
        .and_then(|(_, tail)| tail.trim().parse::<u16>().ok())
        .filter(|port| *port != 0);

    Some(Readiness { port })
}

/// Merges the child's stdout and stderr into a single line stream
pub fn merged_lines<O, E>(
    stdout: O,
    stderr: E,
) -> impl Stream<Item = io::Result<String>> + Send + Unpin + 'static
where
    O: AsyncRead + Send + Unpin + 'static,
    E: AsyncRead + Send + Unpin + 'static,
{
    stream::select(BufReader::new(stdout).lines(), BufReader::new(stderr).lines())
}

/// Receiving ends of an output reader
#[derive(Debug)]
pub struct OutputChannels {
    /// Latest announced port, seeded with the default
    pub port: watch::Receiver<u16>,
    /// Fires once on the first readiness line; closes without a value if
    /// the output ends first
    pub ready: oneshot::Receiver<Readiness>,
}

/// Spawns the task that drains the server's output for its whole lifetime.
///
/// Every line is logged. The first readiness line resolves
/// [`OutputChannels::ready`]; every readiness line with a valid port updates
/// [`OutputChannels::port`]. The task ends silently when the output closes.
pub fn spawn_output_reader<S>(
    server_id: ServerId,
    mut lines: S,
    default_port: u16,
) -> (JoinHandle<()>, OutputChannels)
where
    S: Stream<Item = io::Result<String>> + Send + Unpin + 'static,
{
    let (port_tx, port_rx) = watch::channel(default_port);
    let (ready_tx, ready_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ready_tx = Some(ready_tx);

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    tracing::debug!(server_id = %server_id, "Skipping non-UTF-8 output line");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(server_id = %server_id, error = %e, "Error reading server output");
                    break;
                }
            };

            tracing::info!(target: "upload_supervisor::server_output", server_id = %server_id, "{}", line);

            let Some(readiness) = parse_readiness_line(&line) else {
                continue;
            };

            match readiness.port {
                Some(port) => {
                    port_tx.send_replace(port);
                    tracing::info!(server_id = %server_id, port, "Server announced its port");
                }
                None => {
                    tracing::warn!(
                        server_id = %server_id,
                        port = *port_tx.borrow(),
                        "Failed to parse port from readiness line, keeping current port"
                    );
                }
            }

            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(readiness);
            }
        }

        tracing::debug!(server_id = %server_id, "Output reader exiting");
    });

    (
        task,
        OutputChannels {
            port: port_rx,
            ready: ready_rx,
        },
    )
}
