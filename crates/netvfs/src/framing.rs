//! Line and raw framing over one byte stream.
//!
//! Inbound, the stream is read as `\n` terminated lines until a response
//! declares a binary payload. [`FramedReader::begin_payload`] then switches
//! to raw framing and hands out a [`Payload`] which must be drained before
//! lines can be read again. Bytes the line decoder already buffered are
//! served to the payload first, so nothing is lost or read twice across a
//! switch.
//!
//! Outbound, commands are encoded as CRLF terminated lines and payloads are
//! written verbatim, both through one buffered sink.

use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::sink::SinkExt;
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::{Encoder, FramedRead, FramedWrite, LinesCodec};

use crate::command::Command;
use crate::error::Error;
use crate::utils::Result;

/// Longest line the reader buffers while looking for a terminator.
pub const MAX_LINE_LENGTH: usize = 512 * 1024;

const DISCARD_CHUNK: usize = 64 * 1024;

/// How the inbound stream is currently interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Framing {
    Line,
    /// A declared payload with `remaining` bytes still unread.
    Raw { remaining: u64 },
}

pub struct FramedReader<R> {
    inner: FramedRead<R, LinesCodec>,
    mode: Framing,
    timeout: Duration,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(reader: R, max_line_length: usize, timeout: Duration) -> FramedReader<R> {
        FramedReader {
            inner: FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length)),
            mode: Framing::Line,
            timeout,
        }
    }

    pub fn mode(&self) -> Framing {
        self.mode
    }

    /// Read the next line, without its terminator.
    pub async fn read_line(&mut self) -> Result<String> {
        if let Framing::Raw { .. } = self.mode {
            return Err(Error::Framing("line read while a payload is pending"));
        }

        match timeout(self.timeout, self.inner.next()).await? {
            Some(line) => {
                let line = line?;
                debug!("\t← {line}");
                Ok(line)
            }
            None => Err(io_err!(UnexpectedEof, "connection closed by peer").into()),
        }
    }

    /// Switch to raw framing for a payload of `len` bytes.
    ///
    /// An empty payload leaves the reader in line framing.
    pub fn begin_payload(&mut self, len: u64) -> Result<Payload<'_, R>> {
        if let Framing::Raw { .. } = self.mode {
            return Err(Error::Framing("a payload is already pending"));
        }
        if len > 0 {
            self.mode = Framing::Raw { remaining: len };
        }
        Ok(Payload { reader: self })
    }

    /// The pending payload, if raw framing is active.
    pub fn payload(&mut self) -> Option<Payload<'_, R>> {
        match self.mode {
            Framing::Raw { .. } => Some(Payload { reader: self }),
            Framing::Line => None,
        }
    }
}

/// Reader for the declared payload currently on the wire.
pub struct Payload<'a, R> {
    reader: &'a mut FramedReader<R>,
}

impl<R: AsyncRead + Unpin> Payload<'_, R> {
    pub fn remaining(&self) -> u64 {
        match self.reader.mode {
            Framing::Raw { remaining } => remaining,
            Framing::Line => 0,
        }
    }

    /// Read at most `buf.len()` bytes of the payload. Returns 0 once drained.
    ///
    /// The reader reverts to line framing as soon as the last byte is read.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let buffered: &mut BytesMut = self.reader.inner.read_buffer_mut();
        let n = if !buffered.is_empty() {
            let n = want.min(buffered.len());
            buf[..n].copy_from_slice(&buffered[..n]);
            buffered.advance(n);
            n
        } else {
            let inner = self.reader.inner.get_mut();
            let n = timeout(self.reader.timeout, inner.read(&mut buf[..want])).await??;
            if n == 0 {
                return Err(io_err!(UnexpectedEof, "connection closed inside a payload").into());
            }
            n
        };

        let left = remaining - n as u64;
        self.reader.mode = if left == 0 {
            Framing::Line
        } else {
            Framing::Raw { remaining: left }
        };
        Ok(n)
    }

    /// Fill `buf` completely from the payload.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if (buf.len() as u64) > self.remaining() {
            return Err(Error::Framing("read past the end of the payload"));
        }
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read(&mut buf[filled..]).await?;
        }
        Ok(())
    }

    /// Read and drop the rest of the payload. Returns the number of bytes dropped.
    pub async fn discard(mut self) -> Result<u64> {
        let total = self.remaining();
        let chunk = usize::try_from(total).unwrap_or(DISCARD_CHUNK).min(DISCARD_CHUNK);
        let mut scratch = vec![0; chunk];
        while self.remaining() > 0 {
            self.read(&mut scratch).await?;
        }
        Ok(total)
    }
}

/// One unit of outbound traffic.
pub enum Outbound<'a> {
    Command(&'a Command),
    Payload(&'a [u8]),
}

/// Encodes commands as CRLF terminated lines and payloads verbatim.
#[derive(Debug, Default)]
pub struct CommandCodec;

impl<'a> Encoder<Outbound<'a>> for CommandCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Outbound<'a>, dst: &mut BytesMut) -> io::Result<()> {
        match item {
            Outbound::Command(cmd) => {
                let line = cmd.to_string();
                dst.reserve(line.len() + 2);
                dst.extend_from_slice(line.as_bytes());
                dst.extend_from_slice(b"\r\n");
            }
            Outbound::Payload(data) => dst.extend_from_slice(data),
        }
        Ok(())
    }
}

pub struct FramedSink<W> {
    inner: FramedWrite<W, CommandCodec>,
    timeout: Duration,
}

impl<W: AsyncWrite + Unpin> FramedSink<W> {
    pub fn new(writer: W, timeout: Duration) -> FramedSink<W> {
        FramedSink {
            inner: FramedWrite::new(writer, CommandCodec),
            timeout,
        }
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }

    /// Buffer a command without flushing.
    pub async fn feed(&mut self, cmd: &Command) -> Result<()> {
        if cmd.verb == "login" {
            debug!("\t→ login");
        } else {
            debug!("\t→ {cmd}");
        }
        timeout(self.timeout, self.inner.feed(Outbound::Command(cmd))).await??;
        Ok(())
    }

    /// Send a command and flush.
    pub async fn send(&mut self, cmd: &Command) -> Result<()> {
        self.feed(cmd).await?;
        self.flush().await
    }

    /// Send a raw payload and flush.
    pub async fn send_payload(&mut self, data: &[u8]) -> Result<()> {
        debug!("\t→ <{} bytes>", data.len());
        timeout(self.timeout, self.inner.send(Outbound::Payload(data))).await??;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        timeout(self.timeout, SinkExt::<Outbound<'_>>::flush(&mut self.inner)).await??;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.flush().await?;
        timeout(self.timeout, self.inner.get_mut().shutdown()).await??;
        Ok(())
    }
}

#[cfg(test)]
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn lines_and_payload_share_the_buffer() {
    let wire: &[u8] = b"OK length=\"5\"\r\nhelloREADY\r\nOK\n";
    let mut reader = FramedReader::new(wire, MAX_LINE_LENGTH, TEST_TIMEOUT);

    assert_eq!(reader.read_line().await.unwrap(), "OK length=\"5\"");
    let mut payload = reader.begin_payload(5).unwrap();
    let mut buf = [0u8; 3];
    payload.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hel");
    assert_eq!(payload.remaining(), 2);
    assert_eq!(reader.mode(), Framing::Raw { remaining: 2 });

    let mut payload = reader.payload().unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(payload.read(&mut buf).await.unwrap(), 2);
    assert_eq!(&buf[..2], b"lo");
    assert_eq!(reader.mode(), Framing::Line);
    assert!(reader.payload().is_none());

    assert_eq!(reader.read_line().await.unwrap(), "READY");
    assert_eq!(reader.read_line().await.unwrap(), "OK");
    assert!(matches!(reader.read_line().await, Err(Error::Io(_))));
}

#[tokio::test]
async fn payload_arriving_after_the_line() {
    let (client, mut server) = tokio::io::duplex(64);
    let mut reader = FramedReader::new(client, MAX_LINE_LENGTH, TEST_TIMEOUT);

    server.write_all(b"OK length=\"6\"\n").await.unwrap();
    assert_eq!(reader.read_line().await.unwrap(), "OK length=\"6\"");

    server.write_all(b"abc").await.unwrap();
    server.write_all(b"defREADY\n").await.unwrap();
    let mut buf = [0u8; 6];
    reader.begin_payload(6).unwrap().read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"abcdef");
    assert_eq!(reader.read_line().await.unwrap(), "READY");
}

#[tokio::test]
async fn wrong_mode_is_rejected() {
    let wire: &[u8] = b"0123456789READY\n";
    let mut reader = FramedReader::new(wire, MAX_LINE_LENGTH, TEST_TIMEOUT);

    let _ = reader.begin_payload(10).unwrap();
    assert!(matches!(reader.read_line().await, Err(Error::Framing(_))));
    assert!(matches!(reader.begin_payload(1), Err(Error::Framing(_))));

    let dropped = reader.payload().unwrap().discard().await.unwrap();
    assert_eq!(dropped, 10);
    assert_eq!(reader.read_line().await.unwrap(), "READY");
}

#[tokio::test]
async fn empty_payload_stays_in_line_mode() {
    let wire: &[u8] = b"READY\n";
    let mut reader = FramedReader::new(wire, MAX_LINE_LENGTH, TEST_TIMEOUT);

    let mut payload = reader.begin_payload(0).unwrap();
    assert_eq!(payload.read(&mut [0u8; 4]).await.unwrap(), 0);
    assert_eq!(reader.mode(), Framing::Line);
    assert_eq!(reader.read_line().await.unwrap(), "READY");
}

#[tokio::test]
async fn truncated_payload_is_an_io_error() {
    let wire: &[u8] = b"abc";
    let mut reader = FramedReader::new(wire, MAX_LINE_LENGTH, TEST_TIMEOUT);

    let mut buf = [0u8; 8];
    let mut payload = reader.begin_payload(8).unwrap();
    assert!(matches!(payload.read_exact(&mut buf).await, Err(Error::Io(_))));
}

#[tokio::test]
async fn overlong_line() {
    let wire: &[u8] = b"OK 0123456789abcdef\n";
    let mut reader = FramedReader::new(wire, 8, TEST_TIMEOUT);
    assert!(matches!(reader.read_line().await, Err(Error::Framing(_))));
}

#[tokio::test]
async fn sink_encoding() {
    let mut sink = FramedSink::new(Vec::new(), TEST_TIMEOUT);
    sink.feed(&Command::new("write").bare(3)).await.unwrap();
    sink.send_payload(b"a\r\n").await.unwrap();
    sink.send(&Command::new("delete").flag("t", "f").text("/x y")).await.unwrap();

    assert_eq!(
        sink.get_ref().as_slice(),
        b"write 3\r\na\r\ndelete -t=f \"/x%20y\"\r\n"
    );
}
