//! Seekable file stream over a dedicated session.
//!
//! Writes are pipelined: each returns once its bytes are sent and the answer
//! is consumed in the background by an [`AckPipeline`]. Before any operation
//! that needs the server's view of the file, the stream is *stabilized*: an
//! unread read payload is drained, outstanding acknowledgments are awaited,
//! and the first deferred write failure is raised.

use std::io::SeekFrom;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::net::tcp::OwnedReadHalf;

use crate::ack::AckPipeline;
use crate::command::*;
use crate::error::Error;
use crate::session::{Exchange, Session, Transport, hash_command, parse_hash, read_ready};
use crate::utils::Result;

/// How to open a random-access stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OpenOptions {
    pub mode: FileMode,
    pub access: FileAccess,
    pub share: FileShare,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            mode: FileMode::Open,
            access: FileAccess::READ,
            share: FileShare::READ,
        }
    }
}

impl OpenOptions {
    pub fn new() -> OpenOptions {
        OpenOptions::default()
    }

    pub fn mode(self, mode: FileMode) -> OpenOptions {
        OpenOptions { mode, ..self }
    }

    pub fn access(self, access: FileAccess) -> OpenOptions {
        OpenOptions { access, ..self }
    }

    pub fn share(self, share: FileShare) -> OpenOptions {
        OpenOptions { share, ..self }
    }
}

/// Delivered to close listeners around the `exit` exchange.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CloseEvent {
    BeforeClose,
    AfterClose,
}

type CloseListener = Box<dyn Fn(CloseEvent) + Send + Sync>;

pub struct RandomAccessStream {
    session: Arc<Session>,
    transport: Transport,
    uri: String,
    options: OpenOptions,
    position: u64,
    /// `None` until the server reports it.
    length: Option<u64>,
    /// Unconsumed bytes of the read payload in flight.
    read_bytes_left: u64,
    can_read: bool,
    can_write: bool,
    can_seek: bool,
    closed: bool,
    acks: AckPipeline<OwnedReadHalf>,
    listeners: Vec<CloseListener>,
    /// Keeps the session dedicated to this stream until close.
    lease: Option<Arc<()>>,
}

impl RandomAccessStream {
    pub(crate) fn new(
        session: Arc<Session>,
        transport: Transport,
        lease: Arc<()>,
        uri: &str,
        options: OpenOptions,
        response: &Response,
    ) -> RandomAccessStream {
        let capability = |key: &str, default: bool| match response.get(key) {
            Some(_) => response.flag(key),
            None => default,
        };
        let acks = AckPipeline::new(
            Arc::clone(&transport.reader),
            session.config().ack_idle_timeout,
        );

        RandomAccessStream {
            uri: uri.to_owned(),
            position: 0,
            length: response.value("length").ok(),
            read_bytes_left: 0,
            can_read: capability("canread", options.access.contains(FileAccess::READ)),
            can_write: capability("canwrite", options.access.contains(FileAccess::WRITE)),
            can_seek: capability("canseek", true),
            closed: false,
            acks,
            listeners: Vec::new(),
            lease: Some(lease),
            session,
            transport,
            options,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn can_read(&self) -> bool {
        self.can_read
    }

    pub fn can_write(&self) -> bool {
        self.can_write
    }

    pub fn can_seek(&self) -> bool {
        self.can_seek
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Register a callback run before and after the `exit` exchange.
    pub fn on_close<F>(&mut self, listener: F)
    where
        F: Fn(CloseEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return res!(Error::Closed);
        }
        Ok(())
    }

    fn emit(&self, event: CloseEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }

    fn advance(&mut self, n: u64) {
        self.position += n;
        if let Some(length) = self.length {
            self.length = Some(length.max(self.position));
        }
    }

    /// Take over `position=` and `length=` from a response, where present.
    fn track(&mut self, response: &Response) -> Result<()> {
        if response.get("position").is_some() {
            self.position = response.value("position")?;
        }
        if response.get("length").is_some() {
            self.length = Some(response.value("length")?);
        }
        Ok(())
    }

    /// Reconcile with the server before an operation that depends on its state.
    ///
    /// With `for_write` set, outstanding write acknowledgments are left
    /// running; a failure already recorded is still raised.
    async fn stabilize(&mut self, for_write: bool) -> Result<()> {
        let session = Arc::clone(&self.session);

        if self.read_bytes_left > 0 {
            let mut exchange = session.exchange_on(&self.transport).await?;
            let result = abandon_read(&mut exchange, self.position).await;
            let response = exchange.check(result)?;
            self.read_bytes_left = 0;
            self.track(&response)?;
        }

        if !for_write && self.acks.is_running() {
            let flushed = match session.writer_on(&self.transport).await {
                Ok(mut writer) => writer.flush().await,
                Err(e) => Err(e),
            };
            self.acks.drain().await;
            if let Err(e) = flushed {
                session.invalidate_on(&self.transport).await;
                return Err(e);
            }
        }

        if let Some(err) = self.acks.take_error() {
            session.invalidate_on(&self.transport).await;
            return Err(err);
        }
        Ok(())
    }

    /// One complete command exchange on this stream's connection.
    async fn request(&self, cmd: Command) -> Result<Response> {
        let mut exchange = self.session.exchange_on(&self.transport).await?;
        exchange.run(&cmd).await
    }

    /// Read up to `buf.len()` bytes. Returns 0 at end of file.
    ///
    /// A read returns what the server has delivered so far; fewer bytes than
    /// requested do not mean end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        if self.read_bytes_left == 0 {
            self.stabilize(false).await?;
        }

        let session = Arc::clone(&self.session);
        let mut exchange = session.exchange_on(&self.transport).await?;

        if self.read_bytes_left == 0 {
            let result = request_read(&mut exchange, buf.len()).await;
            self.read_bytes_left = exchange.check(result)?;
            if self.read_bytes_left == 0 {
                return Ok(0);
            }
        }

        let result = read_payload(&mut exchange, buf).await;
        let (n, left) = exchange.check(result)?;
        self.read_bytes_left = left;
        self.advance(n as u64);
        Ok(n)
    }

    /// Fill `buf` completely, failing with [`Error::EndOfStream`] if the
    /// file ends first.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]).await? {
                0 => return Err(Error::EndOfStream),
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Send `buf` at the current position without waiting for the server.
    ///
    /// A failure reported by the server surfaces from a later operation.
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(());
        }
        self.stabilize(true).await?;

        let session = Arc::clone(&self.session);
        let mut writer = session.writer_on(&self.transport).await?;
        let cmd = Command::new("write").bare(buf.len());
        let sent = match writer.feed(&cmd).await {
            Ok(()) => writer.send_payload(buf).await,
            Err(e) => Err(e),
        };
        drop(writer);
        if let Err(e) = sent {
            session.invalidate_on(&self.transport).await;
            return Err(e);
        }

        self.acks.enqueue().await;
        self.advance(buf.len() as u64);
        Ok(())
    }

    /// Move the position. Returns the new position as reported by the server.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;

        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(_) => None,
        };
        if target == Some(self.position) && !self.options.share.contains(FileShare::WRITE) {
            return Ok(self.position);
        }

        self.stabilize(false).await?;
        let cmd = match pos {
            SeekFrom::Start(n) => Command::new("seek").bare(n).bare("begin"),
            SeekFrom::Current(delta) => Command::new("seek").bare(delta).bare("current"),
            SeekFrom::End(delta) => Command::new("seek").bare(delta).bare("end"),
        };
        let response = self.request(cmd).await?;
        self.position = response.value("position")?;
        self.track(&response)?;
        Ok(self.position)
    }

    /// Length of the file.
    ///
    /// Cached unless other writers may change the file and nothing is in
    /// flight on this stream.
    pub async fn length(&mut self) -> Result<u64> {
        self.ensure_open()?;

        let idle = self.read_bytes_left == 0 && !self.acks.is_running();
        let shared_write = self.options.share.contains(FileShare::WRITE);
        if let Some(length) = self.length {
            if !(shared_write && idle) {
                return Ok(length);
            }
        }

        self.stabilize(false).await?;
        let response = self.request(Command::new("getlength")).await?;
        let length = response.value("length")?;
        self.length = Some(length);
        Ok(length)
    }

    pub async fn set_length(&mut self, length: u64) -> Result<()> {
        self.ensure_open()?;
        self.stabilize(false).await?;

        let response = self.request(Command::new("setlength").bare(length)).await?;
        self.length = Some(length);
        self.track(&response)?;
        if self.position > length && response.get("position").is_none() {
            self.position = length;
        }
        Ok(())
    }

    /// Hash `length` bytes from `offset`, or to the end of file.
    pub async fn compute_hash(
        &mut self,
        algorithm: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<HashValue> {
        self.ensure_open()?;
        self.stabilize(false).await?;

        let cmd = hash_command(Command::new("computehash"), algorithm, offset, length);
        let response = self.request(cmd).await?;
        if response.get("position").is_some() {
            self.position = response.value("position")?;
        }
        parse_hash(&response, algorithm, offset)
    }

    /// Push buffered outbound bytes to the socket.
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut writer = self.session.writer_on(&self.transport).await?;
        writer.flush().await
    }

    /// Finish outstanding work and release the server side of the stream.
    ///
    /// Close listeners run even if stabilizing fails; that failure is
    /// returned once the stream is closed. Repeated calls do nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let stabilized = self.stabilize(false).await;
        self.emit(CloseEvent::BeforeClose);

        if let Err(e) = self.exit().await {
            warn!("exit from {} failed: {e}", self.uri);
            self.session.disconnect_on(&self.transport).await;
        }
        self.acks.drain().await;
        drop(self.lease.take());

        self.emit(CloseEvent::AfterClose);
        info!("closed: {}", self.uri);
        stabilized
    }

    async fn exit(&self) -> Result<()> {
        let mut exchange = self.session.exchange_on(&self.transport).await?;
        let flushed = exchange.writer.flush().await;
        exchange.check(flushed)?;
        exchange.run(&Command::new("exit")).await?;
        exchange.release();
        Ok(())
    }
}

impl Drop for RandomAccessStream {
    fn drop(&mut self) {
        if !self.closed {
            warn!("{} dropped without close", self.uri);
        }
    }
}

/// Drop the rest of an in-flight read and put the server back at `position`.
async fn abandon_read(exchange: &mut Exchange<'_>, position: u64) -> Result<Response> {
    exchange.writer.flush().await?;
    if let Some(payload) = exchange.reader.payload() {
        let dropped = payload.discard().await?;
        debug!("dropped {dropped} unread bytes");
    }
    read_ready(&mut *exchange.reader).await?;

    let response = exchange
        .command(&Command::new("seek").bare(position).bare("begin"))
        .await?;
    exchange.settle(response).await
}

/// Send `read` and enter raw framing for the declared payload.
///
/// Returns the declared length. At end of file the exchange is completed here.
async fn request_read(exchange: &mut Exchange<'_>, count: usize) -> Result<u64> {
    let response = exchange.command(&Command::new("read").bare(count)).await?;
    if !response.is_ok() {
        return exchange.settle(response).await.map(|_| 0);
    }

    let declared: u64 = response.value("length")?;
    exchange.reader.begin_payload(declared)?;
    if declared == 0 {
        read_ready(&mut *exchange.reader).await?;
    }
    Ok(declared)
}

/// Read from the pending payload. Returns the bytes read and the bytes left.
async fn read_payload(exchange: &mut Exchange<'_>, buf: &mut [u8]) -> Result<(usize, u64)> {
    let Some(mut payload) = exchange.reader.payload() else {
        return res!(Error::Framing("no payload pending"));
    };
    let n = payload.read(buf).await?;
    let left = payload.remaining();
    if left == 0 {
        read_ready(&mut *exchange.reader).await?;
    }
    Ok((n, left))
}
