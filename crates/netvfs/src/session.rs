//! Client session over one TCP connection.
//!
//! # Protocol
//! On connect the server sends a banner terminated by `READY`; the client
//! then logs in. Each command is one request line answered by one `OK` or
//! `ERROR` line, optionally followed by listing lines or a binary payload,
//! and always terminated by `READY`.
//!
//! All exchanges on a session are serialized under the session lock. Any
//! failed command moves the session to [`SessionState::Invalid`]; the next
//! command reconnects before it is sent. While a random-access stream is
//! open, the connection belongs to it and other commands fail with
//! [`Error::Busy`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{info, warn};
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};
use tokio::time::timeout;

use crate::command::*;
use crate::error::Error;
use crate::framing::{FramedReader, FramedSink, MAX_LINE_LENGTH};
use crate::retry::RetryPolicy;
use crate::serialize::*;
use crate::stream::{OpenOptions, RandomAccessStream};
use crate::utils::{self, Result};

pub type Reader = FramedReader<OwnedReadHalf>;
pub type Writer = FramedSink<OwnedWriteHalf>;

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ACK_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection parameters of a [`Session`].
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// `host:port`
    pub addr: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    /// Applied to every socket read and write.
    pub io_timeout: Duration,
    pub max_line_length: usize,
    pub retry: RetryPolicy,
    /// How long a write acknowledgment worker waits for work before stopping.
    pub ack_idle_timeout: Duration,
}

/// Everything but the address, which is left empty.
impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            addr: String::new(),
            username: None,
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_line_length: MAX_LINE_LENGTH,
            retry: RetryPolicy::default(),
            ack_idle_timeout: DEFAULT_ACK_IDLE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn new(addr: impl Into<String>) -> SessionConfig {
        SessionConfig {
            addr: addr.into(),
            ..SessionConfig::default()
        }
    }

    /// Build from `host:port` or a `tcp!host!port` dial string.
    pub fn from_addr(addr: &str) -> Option<SessionConfig> {
        utils::parse_addr(addr).map(SessionConfig::new)
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> SessionConfig {
        self.username = Some(username.to_owned());
        self.password = Some(password.to_owned());
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> SessionConfig {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> SessionConfig {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> SessionConfig {
        self.retry = retry;
        self
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> SessionConfig {
        self.max_line_length = max_line_length;
        self
    }

    pub fn with_ack_idle_timeout(mut self, ack_idle_timeout: Duration) -> SessionConfig {
        self.ack_idle_timeout = ack_idle_timeout;
        self
    }
}

/// The two halves of a connected socket.
#[derive(Clone)]
pub(crate) struct Transport {
    pub(crate) reader: Arc<Mutex<Reader>>,
    pub(crate) writer: Arc<Mutex<Writer>>,
}

impl Transport {
    fn same(&self, other: &Transport) -> bool {
        Arc::ptr_eq(&self.reader, &other.reader)
    }
}

/// Where a session stands with its connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    /// A command failed. The connection must be re-established before reuse.
    Invalid,
}

enum Link {
    Disconnected,
    Connected(Transport),
    /// Dedicated to the random-access stream holding the lease.
    Streaming(Transport, Weak<()>),
    Invalid,
}

impl Link {
    /// True if `transport` is the live connection of this link.
    fn is_on(&self, transport: &Transport) -> bool {
        match self {
            Link::Connected(current) | Link::Streaming(current, _) => current.same(transport),
            _ => false,
        }
    }

    /// A stream that went away without closing leaves the connection in an
    /// unknown protocol state.
    fn is_abandoned(&self) -> bool {
        matches!(self, Link::Streaming(_, lease) if lease.strong_count() == 0)
    }
}

/// Read lines up to and including `READY`.
///
/// The first `ERROR` line seen on the way is returned once `READY` has been
/// consumed, so the channel is always left clean. Other lines are ignored.
pub(crate) async fn read_ready<R: AsyncRead + Unpin>(reader: &mut FramedReader<R>) -> Result<()> {
    let mut first_error = None;
    loop {
        let line = reader.read_line().await?;
        if is_ready(&line) {
            break;
        }
        if let Some(err) = parse_response(&line).ok().as_ref().and_then(map_error) {
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Read one `OK`/`ERROR` line.
pub(crate) async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut FramedReader<R>,
) -> Result<Response> {
    parse_response(&reader.read_line().await?)
}

async fn open(config: &SessionConfig) -> Result<Transport> {
    let stream = timeout(config.connect_timeout, TcpStream::connect(&config.addr)).await??;
    stream.set_nodelay(true)?;
    info!("connected: {}", config.addr);

    let (read, write) = stream.into_split();
    let mut reader = FramedReader::new(read, config.max_line_length, config.io_timeout);
    let mut writer = FramedSink::new(write, config.io_timeout);

    // Banner
    while !is_ready(&reader.read_line().await?) {}

    let mut login = Command::new("login");
    if let Some(username) = &config.username {
        login = login.flag("username", username);
    }
    if let Some(password) = &config.password {
        login = login.flag("password", password);
    }
    writer.send(&login).await?;
    let response = read_response(&mut reader).await?;
    let ready = read_ready(&mut reader).await;
    response.into_result().and(ready)?;
    info!("logged in: {}", config.addr);

    Ok(Transport {
        reader: Arc::new(Mutex::new(reader)),
        writer: Arc::new(Mutex::new(writer)),
    })
}

/// Exclusive use of the session's connection for one command exchange.
pub(crate) struct Exchange<'a> {
    link: MutexGuard<'a, Link>,
    transport: Transport,
    pub(crate) reader: OwnedMutexGuard<Reader>,
    pub(crate) writer: OwnedMutexGuard<Writer>,
}

impl Exchange<'_> {
    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    pub(crate) fn invalidate(&mut self) {
        if self.link.is_on(&self.transport) {
            warn!("session invalidated");
        }
        *self.link = Link::Invalid;
    }

    /// Hand the connection back from a random-access stream to the session.
    pub(crate) fn release(&mut self) {
        if let Link::Streaming(current, _) = &*self.link {
            *self.link = Link::Connected(current.clone());
        }
    }

    /// Pass `result` through, invalidating the session if it is an error.
    pub(crate) fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.invalidate();
        }
        result
    }

    /// Send a command and read its response line.
    pub(crate) async fn command(&mut self, cmd: &Command) -> Result<Response> {
        self.writer.send(cmd).await?;
        read_response(&mut *self.reader).await
    }

    /// Consume `READY` and map an `ERROR` response.
    pub(crate) async fn settle(&mut self, response: Response) -> Result<Response> {
        let ready = read_ready(&mut *self.reader).await;
        response.into_result().and_then(|r| ready.map(|()| r))
    }

    /// [`Exchange::settle`], invalidating the session on failure.
    pub(crate) async fn finish(&mut self, response: Response) -> Result<Response> {
        let result = self.settle(response).await;
        self.check(result)
    }

    /// Send, settle and check one command.
    pub(crate) async fn run(&mut self, cmd: &Command) -> Result<Response> {
        let result = match self.command(cmd).await {
            Ok(response) => self.settle(response).await,
            Err(err) => Err(err),
        };
        self.check(result)
    }
}

pub struct Session {
    config: SessionConfig,
    link: Mutex<Link>,
}

impl Session {
    /// Connect, read the banner and log in.
    pub async fn connect(config: SessionConfig) -> Result<Arc<Session>> {
        let transport = open(&config).await?;
        Ok(Arc::new(Session {
            config,
            link: Mutex::new(Link::Connected(transport)),
        }))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn state(&self) -> SessionState {
        let link = self.link.lock().await;
        match *link {
            Link::Disconnected => SessionState::Disconnected,
            _ if link.is_abandoned() => SessionState::Invalid,
            Link::Connected(_) | Link::Streaming(..) => SessionState::Connected,
            Link::Invalid => SessionState::Invalid,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == SessionState::Connected
    }

    /// Drop the current connection, if any, and establish a new one.
    pub async fn reconnect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        self.reconnect_locked(&mut link).await.map(|_| ())
    }

    async fn reconnect_locked(&self, link: &mut Link) -> Result<Transport> {
        *link = Link::Invalid;
        let transport = open(&self.config).await?;
        *link = Link::Connected(transport.clone());
        info!("reconnected: {}", self.config.addr);
        Ok(transport)
    }

    /// Close the connection. Later commands reconnect.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        match std::mem::replace(&mut *link, Link::Disconnected) {
            Link::Connected(transport) | Link::Streaming(transport, _) => {
                self.shutdown(&transport).await;
            }
            Link::Disconnected | Link::Invalid => {}
        }
    }

    /// Close `transport` whatever state the session is in. The session is
    /// only marked disconnected if it was still on `transport`.
    pub(crate) async fn disconnect_on(&self, transport: &Transport) {
        let mut link = self.link.lock().await;
        if link.is_on(transport) {
            *link = Link::Disconnected;
        }
        self.shutdown(transport).await;
    }

    async fn shutdown(&self, transport: &Transport) {
        if let Err(e) = transport.writer.lock().await.shutdown().await {
            warn!("shutdown of {} failed: {e}", self.config.addr);
        }
        info!("disconnected: {}", self.config.addr);
    }

    /// Send `cmd` and read its response line, retrying transport failures.
    ///
    /// Between tries the session waits per `policy` and reconnects. The last
    /// failure is returned as is. On success the exchange stays locked so the
    /// caller can consume the rest of the response.
    pub(crate) async fn begin(
        &self,
        policy: RetryPolicy,
        cmd: &Command,
    ) -> Result<(Exchange<'_>, Response)> {
        let mut link = self.link.lock().await;
        if link.is_abandoned() {
            warn!("random-access stream dropped without close");
            *link = Link::Invalid;
        }
        if let Link::Streaming(..) = *link {
            return Err(Error::Busy);
        }
        let mut failed = 0;

        loop {
            let attempt = async {
                let current = match &*link {
                    Link::Connected(transport) => Some(transport.clone()),
                    _ => None,
                };
                let transport = match current {
                    Some(transport) => transport,
                    None => self.reconnect_locked(&mut link).await?,
                };
                let mut writer = transport.writer.clone().lock_owned().await;
                let mut reader = transport.reader.clone().lock_owned().await;
                writer.send(cmd).await?;
                let response = read_response(&mut *reader).await?;
                Ok::<_, Error>((transport, reader, writer, response))
            }
            .await;

            match attempt {
                Ok((transport, reader, writer, response)) => {
                    let exchange = Exchange {
                        link,
                        transport,
                        reader,
                        writer,
                    };
                    return Ok((exchange, response));
                }
                Err(err) => {
                    *link = Link::Invalid;
                    if !err.is_transport() || !policy.should_retry(failed) {
                        return Err(err);
                    }
                    let delay = policy.delay(failed);
                    warn!("{}: {err}; retrying in {delay:?}", cmd.verb);
                    tokio::time::sleep(delay).await;
                    failed += 1;
                }
            }
        }
    }

    /// One complete exchange under the configured retry policy.
    async fn run(&self, cmd: Command) -> Result<Response> {
        let (mut exchange, response) = self.begin(self.config.retry, &cmd).await?;
        exchange.finish(response).await
    }

    /// Lock the connection `transport` for an exchange without sending anything.
    ///
    /// Fails if the session has since moved to another connection.
    pub(crate) async fn exchange_on(&self, transport: &Transport) -> Result<Exchange<'_>> {
        let link = self.link.lock().await;
        if !link.is_on(transport) {
            return Err(Error::NotConnected);
        }
        let writer = transport.writer.clone().lock_owned().await;
        let reader = transport.reader.clone().lock_owned().await;
        Ok(Exchange {
            link,
            transport: transport.clone(),
            reader,
            writer,
        })
    }

    /// Lock only the outbound half of `transport`.
    pub(crate) async fn writer_on(&self, transport: &Transport) -> Result<OwnedMutexGuard<Writer>> {
        {
            let link = self.link.lock().await;
            if !link.is_on(transport) {
                return Err(Error::NotConnected);
            }
        }
        Ok(transport.writer.clone().lock_owned().await)
    }

    /// Invalidate the session if it is still on `transport`.
    pub(crate) async fn invalidate_on(&self, transport: &Transport) {
        let mut link = self.link.lock().await;
        if link.is_on(transport) {
            warn!("session invalidated");
            *link = Link::Invalid;
        }
    }

    /// `noop`
    pub async fn ping(&self) -> Result<()> {
        self.run(Command::new("noop")).await.map(|_| ())
    }

    pub async fn delete(&self, uri: &str, node_type: NodeType, recursive: bool) -> Result<()> {
        let cmd = Command::new("delete")
            .flag("t", node_type.flag())
            .switch("recursive", recursive)
            .text(uri);
        self.run(cmd).await.map(|_| ())
    }

    pub async fn create(&self, uri: &str, node_type: NodeType, create_parent: bool) -> Result<()> {
        let cmd = Command::new("create")
            .flag("t", node_type.flag())
            .switch("createparent", create_parent)
            .text(uri);
        self.run(cmd).await.map(|_| ())
    }

    pub async fn move_node(
        &self,
        src: &str,
        dest: &str,
        node_type: NodeType,
        overwrite: bool,
    ) -> Result<()> {
        self.transfer("move", src, dest, node_type, overwrite).await
    }

    pub async fn copy_node(
        &self,
        src: &str,
        dest: &str,
        node_type: NodeType,
        overwrite: bool,
    ) -> Result<()> {
        self.transfer("copy", src, dest, node_type, overwrite).await
    }

    async fn transfer(
        &self,
        verb: &str,
        src: &str,
        dest: &str,
        node_type: NodeType,
        overwrite: bool,
    ) -> Result<()> {
        let cmd = Command::new(verb)
            .flag("t", node_type.flag())
            .switch("overwrite", overwrite)
            .text(src)
            .text(dest);
        self.run(cmd).await.map(|_| ())
    }

    /// Names of the children of directory `uri`, optionally filtered by a
    /// server side regular expression.
    pub async fn list(&self, uri: &str, regex: Option<&str>) -> Result<Vec<ListEntry>> {
        let cmd = list_command(uri, regex, false);
        let (mut exchange, response) = self.begin(self.config.retry, &cmd).await?;
        if !response.is_ok() {
            return exchange.finish(response).await.map(|_| Vec::new());
        }

        let result = read_listing(&mut *exchange.reader, parse_list_entry).await;
        exchange.check(result)
    }

    /// Children of directory `uri` with their attributes.
    ///
    /// Records the server could not produce arrive as embedded `ERROR` lines;
    /// the first of them is returned once the listing is complete.
    pub async fn list_attributes(
        &self,
        uri: &str,
        regex: Option<&str>,
    ) -> Result<Vec<AttributedEntry>> {
        let cmd = list_command(uri, regex, true);
        let (mut exchange, response) = self.begin(self.config.retry, &cmd).await?;
        if !response.is_ok() {
            return exchange.finish(response).await.map(|_| Vec::new());
        }

        let result = read_listing(&mut *exchange.reader, |line| {
            parse_attributed_entry(parse_response(line)?)
        })
        .await;
        exchange.check(result)
    }

    pub async fn create_hard_link(&self, link: &str, target: &str) -> Result<()> {
        let cmd = Command::new("createhardlink").text(link).text(target);
        self.run(cmd).await.map(|_| ())
    }

    pub async fn get_attributes(&self, uri: &str, node_type: NodeType) -> Result<Tuples> {
        let cmd = Command::new("getattributes")
            .flag("t", node_type.flag())
            .text(uri);
        self.run(cmd).await.map(|response| response.tuples)
    }

    pub async fn set_attributes(
        &self,
        uri: &str,
        node_type: NodeType,
        attributes: &Tuples,
    ) -> Result<()> {
        let mut cmd = Command::new("setattributes").flag("t", node_type.flag());
        for (name, value) in attributes.iter() {
            cmd = cmd.flag(name, value);
        }
        self.run(cmd.text(uri)).await.map(|_| ())
    }

    /// Hash `length` bytes of file `uri` from `offset`; the whole rest of the
    /// file when `length` is `None`.
    pub async fn compute_hash(
        &self,
        uri: &str,
        algorithm: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<HashValue> {
        let cmd = Command::new("computehash").flag("t", NodeType::File.flag());
        let response = self.run(hash_command(cmd, algorithm, offset, length).text(uri)).await?;
        parse_hash(&response, algorithm, offset)
    }

    /// Open `uri` for random access.
    ///
    /// The session is dedicated to the stream until it is closed: other
    /// commands fail with [`Error::Busy`] meanwhile, so no answer can be
    /// taken from the stream's pending write acknowledgments.
    pub async fn open_random_access(
        self: &Arc<Self>,
        uri: &str,
        options: OpenOptions,
    ) -> Result<RandomAccessStream> {
        let cmd = Command::new("randomaccess")
            .flag("mode", options.mode.as_str())
            .flag("access", options.access.wire_name())
            .flag("share", options.share.wire_name())
            .text(uri);
        let (mut exchange, response) = self.begin(self.config.retry, &cmd).await?;
        let response = exchange.finish(response).await?;
        let transport = exchange.transport().clone();
        let lease = Arc::new(());
        *exchange.link = Link::Streaming(transport.clone(), Arc::downgrade(&lease));
        drop(exchange);

        info!("random access: {uri}");
        Ok(RandomAccessStream::new(
            Arc::clone(self),
            transport,
            lease,
            uri,
            options,
            &response,
        ))
    }
}

fn list_command(uri: &str, regex: Option<&str>, attributes: bool) -> Command {
    let mut cmd = Command::new("list").switch("attributes", attributes);
    if let Some(regex) = regex {
        cmd = cmd.flag("regex", regex);
    }
    cmd.text(uri)
}

/// Append the `computehash` range flags to `cmd`.
pub(crate) fn hash_command(
    cmd: Command,
    algorithm: &str,
    offset: u64,
    length: Option<u64>,
) -> Command {
    let mut cmd = cmd.flag("algorithm", algorithm);
    if offset > 0 {
        cmd = cmd.flag("offset", offset);
    }
    if let Some(length) = length {
        cmd = cmd.flag("length", length);
    }
    cmd
}

pub(crate) fn parse_hash(response: &Response, algorithm: &str, offset: u64) -> Result<HashValue> {
    let hash = response.get("hash").unwrap_or_default();
    let bytes = BASE64
        .decode(hash)
        .map_err(|e| Error::Unexpected(format!("hash {hash:?}: {e}")))?;

    Ok(HashValue {
        algorithm: algorithm.to_owned(),
        offset: response.value("offset").unwrap_or(offset),
        length: response.value("length")?,
        bytes,
    })
}

/// Collect listing lines until `READY`, parsing each with `parse`.
///
/// Embedded `ERROR` lines are held back and the first one returned after
/// `READY`.
async fn read_listing<R, T, F>(reader: &mut FramedReader<R>, parse: F) -> Result<Vec<T>>
where
    R: AsyncRead + Unpin,
    F: Fn(&str) -> Result<T>,
{
    let mut entries = Vec::new();
    let mut first_error = None;

    loop {
        let line = reader.read_line().await?;
        if is_ready(&line) {
            break;
        }
        let embedded = parse_response(&line).ok().as_ref().and_then(map_error);
        match embedded {
            Some(err) => {
                first_error.get_or_insert(err);
            }
            None => entries.push(parse(&line)?),
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(entries),
    }
}

#[cfg(test)]
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn ready_drains_before_reporting() {
    let wire: &[u8] =
        b"INFO something\nERROR code=\"eof\"\nERROR code=\"unauthorised\"\nREADY\nOK\n";
    let mut reader = FramedReader::new(wire, MAX_LINE_LENGTH, TEST_TIMEOUT);

    assert!(matches!(read_ready(&mut reader).await, Err(Error::EndOfStream)));
    // The terminator was consumed, the next response is intact.
    assert!(read_response(&mut reader).await.unwrap().is_ok());
}

#[tokio::test]
async fn listing_with_embedded_error() {
    let wire: &[u8] = b"F:a\nD:sub%20dir\nERROR code=\"unauthorised\" details=\"x\"\nF:b\nREADY\n";
    let mut reader = FramedReader::new(wire, MAX_LINE_LENGTH, TEST_TIMEOUT);

    let result = read_listing(&mut reader, parse_list_entry).await;
    assert!(matches!(result, Err(Error::PermissionDenied(d)) if d == "x"));

    let wire: &[u8] = b"F:a\nD:sub%20dir\nREADY\n";
    let mut reader = FramedReader::new(wire, MAX_LINE_LENGTH, TEST_TIMEOUT);
    let entries = read_listing(&mut reader, parse_list_entry).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].name, "sub dir");
    assert_eq!(entries[1].node_type, NodeType::Directory);
}

#[test]
fn hash_responses() {
    let response = parse_response("OK length=\"4\" hash=\"3q2+7w==\" offset=\"2\"").unwrap();
    let hash = parse_hash(&response, "md5", 0).unwrap();
    assert_eq!(hash.bytes, vec![0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(hash.offset, 2);
    assert_eq!(hash.length, 4);

    let response = parse_response("OK length=\"4\" hash=\"!!\"").unwrap();
    assert!(matches!(parse_hash(&response, "md5", 0), Err(Error::Unexpected(_))));
}

#[test]
fn command_shapes() {
    assert_eq!(
        format_command(&list_command("/d", Some("*.txt"), true)),
        "list -attributes -regex=*.txt \"/d\""
    );
    assert_eq!(
        format_command(&hash_command(Command::new("computehash"), "sha1", 10, Some(5))),
        "computehash -algorithm=sha1 -offset=10 -length=5"
    );
    assert_eq!(
        format_command(&hash_command(Command::new("computehash").flag("t", "f"), "md5", 0, None)),
        "computehash -t=f -algorithm=md5"
    );
}

#[test]
fn config_from_dial_string() {
    let config = SessionConfig::from_addr("tcp!fs.local!7000").unwrap();
    assert_eq!(config.addr, "fs.local:7000");
    assert_eq!(config.io_timeout, DEFAULT_IO_TIMEOUT);
    assert_eq!(config.retry, RetryPolicy::default());
    assert!(SessionConfig::from_addr("fs.local").is_none());

    let config = config.with_credentials("u", "p").with_retry(RetryPolicy::once());
    assert_eq!(config.username.as_deref(), Some("u"));
    assert_eq!(config.retry.attempts, 1);
}
