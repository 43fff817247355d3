//! Line framing for the NNTP wire
//!
//! Frames a duplex byte stream into CRLF-terminated lines with a per-line
//! size cap, and provides the dot-stuffed multi-line payload reader and
//! writer used by every multi-line command.

use crate::error::{PeerError, Result};
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::sync::Mutex;
use tracing::trace;

/// Absolute per-line size cap (bytes on the wire, terminator included)
pub const DEFAULT_MAX_LINE: usize = 16 * 1024;

/// Any duplex byte stream the peer can run over (TCP, TLS, an in-memory pipe)
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// Boxed transport; STARTTLS swaps the box contents under the same codec API
pub type BoxedTransport = Box<dyn Transport>;

/// A dot-framed payload read off the wire
#[derive(Debug, Clone)]
pub struct DotBody {
    /// De-stuffed payload, lines joined with `\n`
    pub data: Vec<u8>,
    /// True if the payload overran the size limit; `data` holds only the
    /// prefix that fit, the rest was drained and discarded
    pub truncated: bool,
}

async fn read_wire_line<R: AsyncBufRead + Unpin>(stream: &mut R, max_line: usize) -> Result<String> {
    let mut buf = Vec::with_capacity(512);
    let n = stream.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(PeerError::ConnectionClosed);
    }
    if buf.len() > max_line {
        return Err(PeerError::LineTooLong(buf.len()));
    }
    let line = String::from_utf8_lossy(&buf);
    let line = line.trim_end_matches(['\r', '\n']);
    trace!("recv: {}", line);
    Ok(line.to_string())
}

/// One de-stuffed line of a dot-framed block; `None` at the terminating `.`
async fn read_dot_line<R: AsyncBufRead + Unpin>(
    stream: &mut R,
    max_line: usize,
) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::with_capacity(512);
    let n = stream.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(PeerError::ConnectionClosed);
    }
    if buf.len() > max_line {
        return Err(PeerError::LineTooLong(buf.len()));
    }
    if buf.ends_with(b"\r\n") {
        buf.truncate(buf.len() - 2);
    } else if buf.ends_with(b"\n") {
        buf.truncate(buf.len() - 1);
    }
    if buf == b"." {
        return Ok(None);
    }
    if buf.starts_with(b"..") {
        buf.remove(0);
    }
    Ok(Some(buf))
}

async fn read_dot_lines_from<R: AsyncBufRead + Unpin>(
    stream: &mut R,
    max_line: usize,
) -> Result<Vec<String>> {
    let mut lines = Vec::with_capacity(64);
    while let Some(line) = read_dot_line(stream, max_line).await? {
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    Ok(lines)
}

/// Read header lines until the blank separator or the block terminator.
///
/// Returns the raw (de-stuffed) header lines and whether a body follows:
/// a blank line means the body continues in the same dot-block, the `.`
/// terminator means the article had no body.
async fn read_mime_block_from<R: AsyncBufRead + Unpin>(
    stream: &mut R,
    max_line: usize,
) -> Result<(Vec<String>, bool)> {
    let mut lines = Vec::with_capacity(32);
    loop {
        match read_dot_line(stream, max_line).await? {
            None => return Ok((lines, false)),
            Some(line) if line.is_empty() => return Ok((lines, true)),
            Some(line) => lines.push(String::from_utf8_lossy(&line).into_owned()),
        }
    }
}

async fn read_dot_body_from<R: AsyncBufRead + Unpin>(
    stream: &mut R,
    max_line: usize,
    limit: u64,
) -> Result<DotBody> {
    let mut data = Vec::with_capacity(4 * 1024);
    let mut truncated = false;
    while let Some(line) = read_dot_line(stream, max_line).await? {
        if truncated || (data.len() + line.len() + 1) as u64 > limit {
            // keep draining to the terminator so the connection stays framed
            truncated = true;
            continue;
        }
        data.extend_from_slice(&line);
        data.push(b'\n');
    }
    Ok(DotBody { data, truncated })
}

async fn write_command_to<W: AsyncWrite + Unpin>(stream: &mut W, cmd: &str) -> Result<()> {
    trace!("send: {}", cmd.trim_end());
    stream.write_all(cmd.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn write_line_to<W: AsyncWrite + Unpin>(stream: &mut W, line: &str) -> Result<()> {
    trace!("send: {}", line);
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    Ok(())
}

/// Write a payload as a dot-stuffed block, terminator included.
///
/// The payload is treated as a sequence of newline-terminated lines;
/// a `\r` before the `\n` is tolerated and normalized to CRLF on the wire.
async fn write_dot_body_to<W: AsyncWrite + Unpin>(stream: &mut W, body: &[u8]) -> Result<()> {
    let mut lines: Vec<&[u8]> = body.split(|&b| b == b'\n').collect();
    if let Some(last) = lines.last() {
        if last.is_empty() {
            lines.pop();
        }
    }
    for line in lines {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            stream.write_all(b".").await?;
        }
        stream.write_all(line).await?;
        stream.write_all(b"\r\n").await?;
    }
    stream.write_all(b".\r\n").await?;
    stream.flush().await?;
    Ok(())
}

async fn write_dot_lines_to<W: AsyncWrite + Unpin>(stream: &mut W, lines: &[String]) -> Result<()> {
    for line in lines {
        if line.starts_with('.') {
            stream.write_all(b".").await?;
        }
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
    }
    stream.write_all(b".\r\n").await?;
    stream.flush().await?;
    Ok(())
}

/// Duplex line codec over a single transport, used while a connection is
/// driven by one task (negotiation, reader mode, the inbound dispatcher
/// before MODE STREAM).
pub struct LineCodec {
    stream: BufReader<BoxedTransport>,
    max_line: usize,
}

impl LineCodec {
    /// Frame a transport with the default line cap
    pub fn new(transport: BoxedTransport) -> Self {
        Self::with_limit(transport, DEFAULT_MAX_LINE)
    }

    /// Frame a transport with an explicit per-line cap
    pub fn with_limit(transport: BoxedTransport, max_line: usize) -> Self {
        Self {
            stream: BufReader::new(transport),
            max_line,
        }
    }

    /// Read one CRLF-terminated line, terminator stripped
    pub async fn read_line(&mut self) -> Result<String> {
        read_wire_line(&mut self.stream, self.max_line).await
    }

    /// Read a dot-framed list of text lines (CAPABILITIES, NEWSGROUPS, XOVER)
    pub async fn read_dot_lines(&mut self) -> Result<Vec<String>> {
        read_dot_lines_from(&mut self.stream, self.max_line).await
    }

    /// Read the header part of a dot-framed article; see [`DotBody`] for the body
    pub async fn read_mime_block(&mut self) -> Result<(Vec<String>, bool)> {
        read_mime_block_from(&mut self.stream, self.max_line).await
    }

    /// Read the remainder of a dot-framed block, size-limited
    pub async fn read_dot_body(&mut self, limit: u64) -> Result<DotBody> {
        read_dot_body_from(&mut self.stream, self.max_line, limit).await
    }

    /// Write a pre-built command (CRLF included) and flush
    pub async fn send_command(&mut self, cmd: &str) -> Result<()> {
        write_command_to(self.stream.get_mut(), cmd).await
    }

    /// Write a reply/status line, appending CRLF
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        write_line_to(self.stream.get_mut(), line).await
    }

    /// Write a payload as a dot-stuffed block
    pub async fn write_dot_body(&mut self, body: &[u8]) -> Result<()> {
        write_dot_body_to(self.stream.get_mut(), body).await
    }

    /// Write a status line followed by a dot-framed list
    pub async fn send_dot_list(&mut self, status: &str, lines: &[String]) -> Result<()> {
        write_line_to(self.stream.get_mut(), status).await?;
        write_dot_lines_to(self.stream.get_mut(), lines).await
    }

    /// Write a status line followed by a dot-framed payload
    pub async fn send_block(&mut self, status: &str, body: &[u8]) -> Result<()> {
        write_line_to(self.stream.get_mut(), status).await?;
        write_dot_body_to(self.stream.get_mut(), body).await
    }

    /// Split into independently owned read and write halves for the
    /// two-task STREAM topology
    pub fn split(self) -> (LineReader, LineWriter) {
        let max_line = self.max_line;
        let (r, w) = tokio::io::split(self.stream);
        (
            LineReader {
                stream: BufReader::new(r),
                max_line,
            },
            LineWriter { stream: w },
        )
    }

    /// Rejoin halves produced by [`LineCodec::split`] on the same codec.
    ///
    /// Panics if the halves come from different splits.
    pub fn reunite(reader: LineReader, writer: LineWriter) -> LineCodec {
        let max_line = reader.max_line;
        let stream = reader.stream.into_inner().unsplit(writer.stream);
        LineCodec { stream, max_line }
    }

    /// Yield back the raw transport, dropping any buffered bytes.
    ///
    /// Only valid at a point where the peer cannot have pipelined data,
    /// i.e. immediately around a STARTTLS exchange (RFC 4642 requires
    /// discarding pre-handshake buffers anyway).
    pub fn into_inner(self) -> BoxedTransport {
        self.stream.into_inner()
    }
}

/// Read half of a split [`LineCodec`]
pub struct LineReader {
    stream: BufReader<ReadHalf<BufReader<BoxedTransport>>>,
    max_line: usize,
}

impl LineReader {
    /// Read one CRLF-terminated line, terminator stripped
    pub async fn read_line(&mut self) -> Result<String> {
        read_wire_line(&mut self.stream, self.max_line).await
    }

    /// Read a dot-framed list of text lines
    pub async fn read_dot_lines(&mut self) -> Result<Vec<String>> {
        read_dot_lines_from(&mut self.stream, self.max_line).await
    }

    /// Read the header part of a dot-framed article
    pub async fn read_mime_block(&mut self) -> Result<(Vec<String>, bool)> {
        read_mime_block_from(&mut self.stream, self.max_line).await
    }

    /// Read the remainder of a dot-framed block, size-limited
    pub async fn read_dot_body(&mut self, limit: u64) -> Result<DotBody> {
        read_dot_body_from(&mut self.stream, self.max_line, limit).await
    }
}

/// Write half of a split [`LineCodec`]
pub struct LineWriter {
    stream: WriteHalf<BufReader<BoxedTransport>>,
}

impl LineWriter {
    /// Write a pre-built command (CRLF included) and flush
    pub async fn send_command(&mut self, cmd: &str) -> Result<()> {
        write_command_to(&mut self.stream, cmd).await
    }

    /// Write a reply/status line, appending CRLF
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        write_line_to(&mut self.stream, line).await
    }

    /// Write a payload as a dot-stuffed block
    pub async fn write_dot_body(&mut self, body: &[u8]) -> Result<()> {
        write_dot_body_to(&mut self.stream, body).await
    }
}

/// Cloneable handle serializing writes from several tasks onto one write half.
///
/// Every call holds the lock for a whole wire unit (a line, or a command plus
/// its dot-framed article), so concurrent writers can never interleave partial
/// lines.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<LineWriter>>,
}

impl SharedWriter {
    /// Wrap a write half for shared use
    pub fn new(writer: LineWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write a pre-built command (CRLF included)
    pub async fn send_command(&self, cmd: &str) -> Result<()> {
        self.inner.lock().await.send_command(cmd).await
    }

    /// Write a reply/status line, appending CRLF
    pub async fn send_line(&self, line: &str) -> Result<()> {
        self.inner.lock().await.send_line(line).await
    }

    /// Write a command followed by its dot-framed article under one lock hold
    pub async fn send_article(&self, lead: &str, body: &[u8]) -> Result<()> {
        let mut w = self.inner.lock().await;
        w.send_command(lead).await?;
        w.write_dot_body(body).await
    }

    /// Write a status line followed by a dot-framed list under one lock hold
    pub async fn send_dot_list(&self, status: &str, lines: &[String]) -> Result<()> {
        let mut w = self.inner.lock().await;
        w.send_line(status).await?;
        write_dot_lines_to(&mut w.stream, lines).await
    }

    /// Write a status line followed by a dot-framed payload under one lock hold
    pub async fn send_block(&self, status: &str, body: &[u8]) -> Result<()> {
        let mut w = self.inner.lock().await;
        w.send_line(status).await?;
        w.write_dot_body(body).await
    }

    /// Take back sole ownership of the write half.
    ///
    /// Fails (returning `self`) if another task still holds a clone; callers
    /// use this around STARTTLS, before any engine has been spawned.
    pub fn try_reclaim(self) -> std::result::Result<LineWriter, SharedWriter> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex.into_inner()),
            Err(inner) => Err(SharedWriter { inner }),
        }
    }
}
