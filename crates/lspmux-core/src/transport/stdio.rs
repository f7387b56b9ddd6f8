//! Child-process transport using LSP header-content framing.
//!
//! Messages follow the format:
//! ```text
//! Content-Length: 123\r\n
//! \r\n
//! {"jsonrpc":"2.0",...}
//! ```
//!
//! Each framed body becomes one text frame, which turns the server's byte
//! stream into a message-oriented link.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{info, trace, warn};

use super::{Connector, FrameSink, FrameStream};
use crate::error::{Error, Result};

/// Largest message body accepted from a server.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Spawns a language server per connection and talks to it over stdio.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    current_dir: Option<PathBuf>,
}

impl StdioConnector {
    /// Create a connector for `command` with `args`.
    #[must_use]
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            current_dir: None,
        }
    }

    /// Extra environment variables for the server process.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Working directory for the server process.
    #[must_use]
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// Keeps the child alive for as long as its stdout is being read.
/// The process is killed on drop (`kill_on_drop`).
struct ServerOutput {
    stdout: BufReader<ChildStdout>,
    _child: Child,
}

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        info!("Spawning language server: {} {:?}", self.command, self.args);

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| Error::ServerSpawnFailed {
            command: self.command.clone(),
            source: e,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("Failed to capture stdout".to_string()))?;

        let sink = futures::sink::unfold(stdin, |mut stdin, frame: String| async move {
            write_frame(&mut stdin, &frame).await?;
            Ok::<_, Error>(stdin)
        });

        let output = ServerOutput {
            stdout: BufReader::new(stdout),
            _child: child,
        };
        let stream = futures::stream::unfold(Some(output), |state| async move {
            let mut output = state?;
            match read_frame(&mut output.stdout).await {
                Ok(Some(frame)) => Some((Ok(frame), Some(output))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }

    fn describe(&self) -> String {
        format!("stdio:{}", self.command)
    }
}

/// Write one message with its `Content-Length` header.
async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, content: &str) -> Result<()> {
    let header = format!("Content-Length: {}\r\n\r\n", content.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(content.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message body. `Ok(None)` means the stream ended cleanly before
/// a new header started.
async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let Some(headers) = read_headers(reader).await? else {
        return Ok(None);
    };

    let content_length = headers
        .get("content-length")
        .ok_or_else(|| Error::Protocol("Missing Content-Length header".to_string()))?
        .parse::<usize>()
        .map_err(|e| Error::Protocol(format!("Invalid Content-Length: {e}")))?;

    if content_length > MAX_FRAME_BYTES {
        return Err(Error::Protocol(format!(
            "Content-Length {content_length} exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }

    let mut buffer = vec![0u8; content_length];
    reader.read_exact(&mut buffer).await?;

    String::from_utf8(buffer)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("Invalid UTF-8 in content: {e}")))
}

/// Read headers until the blank separator line.
async fn read_headers<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<HashMap<String, String>>> {
    let mut headers = HashMap::new();
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            if headers.is_empty() {
                trace!("EOF before header");
                return Ok(None);
            }
            return Err(Error::Transport(
                "stream ended inside a message header".to_string(),
            ));
        }

        if line == "\r\n" || line == "\n" {
            if headers.is_empty() {
                continue;
            }
            break;
        }

        if let Some((key, value)) = line.trim_end().split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        } else {
            warn!("Malformed header: {}", line.trim());
        }
    }

    Ok(Some(headers))
}
