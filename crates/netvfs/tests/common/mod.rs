#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use netvfs::serialize::{escape, unescape};
use netvfs::{RetryPolicy, SessionConfig};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    File(Vec<u8>),
    Dir,
}

/// Fault injection knobs.
#[derive(Debug, Default)]
pub struct Faults {
    /// Connections to drop when they receive `noop`.
    pub drop_noops: usize,
    /// 1-based index of the random-access write answered with an error.
    pub fail_write: Option<usize>,
    /// Send read payloads in two halves, this long apart.
    pub split_reads: Option<Duration>,
}

#[derive(Default)]
pub struct State {
    pub nodes: BTreeMap<String, Node>,
    /// Every request line received, in order.
    pub log: Vec<String>,
    pub connections: usize,
    /// Connections closed by the client.
    pub hangups: usize,
    pub writes: usize,
    pub faults: Faults,
}

#[derive(Clone)]
pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<State>>,
}

impl MockServer {
    pub async fn start() -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut state = State::default();
        state.nodes.insert("/".to_owned(), Node::Dir);
        let state = Arc::new(Mutex::new(state));

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                shared.lock().unwrap().connections += 1;
                tokio::spawn(serve(socket, shared.clone()));
            }
        });

        MockServer { addr, state }
    }

    pub fn config(&self) -> SessionConfig {
        SessionConfig::new(self.addr.to_string())
            .with_credentials("tester", "secret")
            .with_io_timeout(TIMEOUT)
            .with_retry(RetryPolicy::default())
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(path.to_owned(), Node::File(data.to_vec()));
    }

    pub fn put_dir(&self, path: &str) {
        self.state.lock().unwrap().nodes.insert(path.to_owned(), Node::Dir);
    }

    pub fn node(&self, path: &str) -> Option<Node> {
        self.state.lock().unwrap().nodes.get(path).cloned()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Logged requests with the given verb.
    pub fn sent(&self, verb: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|line| line.split(' ').next() == Some(verb))
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    pub fn hangups(&self) -> usize {
        self.state.lock().unwrap().hangups
    }

    /// Wait until the client has closed `n` connections.
    pub async fn wait_for_hangups(&self, n: usize) {
        tokio::time::timeout(TIMEOUT, async {
            while self.hangups() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client kept the connection open");
    }

    pub fn faults(&self, faults: Faults) {
        self.state.lock().unwrap().faults = faults;
    }
}

/// A request line split into verb, flags and arguments.
struct Request {
    verb: String,
    flags: BTreeMap<String, String>,
    args: Vec<String>,
}

fn parse_request(line: &str) -> Request {
    let mut tokens = line.split_whitespace();
    let verb = tokens.next().unwrap_or_default().to_owned();
    let mut flags = BTreeMap::new();
    let mut args = Vec::new();

    for token in tokens {
        if let Some(flag) = token.strip_prefix('-').filter(|f| !f.starts_with(char::is_numeric)) {
            let (key, value) = flag.split_once('=').unwrap_or((flag, ""));
            flags.insert(unescape(key), unescape(value));
        } else if let Some(text) = token.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            args.push(unescape(text));
        } else {
            args.push(token.to_owned());
        }
    }

    Request { verb, flags, args }
}

fn ok(tuples: &[(&str, String)]) -> String {
    let mut line = "OK".to_owned();
    for (key, value) in tuples {
        line.push_str(&format!(" {key}=\"{}\"", escape(value)));
    }
    line + "\r\n"
}

fn error(code: &str, key: &str, value: &str) -> String {
    format!("ERROR code=\"{code}\" {key}=\"{}\"\r\n", escape(value))
}

const READY: &str = "READY\r\n";

fn checksum(data: &[u8]) -> String {
    let sum = data.iter().fold(0u32, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u32));
    BASE64.encode(sum.to_be_bytes())
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn children(nodes: &BTreeMap<String, Node>, dir: &str) -> Vec<(String, Node)> {
    nodes
        .iter()
        .filter(|(path, _)| path.as_str() != "/" && parent(path) == dir)
        .map(|(path, node)| (path.rsplit('/').next().unwrap_or_default().to_owned(), node.clone()))
        .collect()
}

/// The open random-access file of a connection.
struct Open {
    path: String,
    position: u64,
}

fn file_len(state: &State, path: &str) -> u64 {
    match state.nodes.get(path) {
        Some(Node::File(data)) => data.len() as u64,
        _ => 0,
    }
}

async fn serve(socket: TcpStream, state: Arc<Mutex<State>>) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);
    if write.write_all(b"Welcome to the mock server\r\nREADY\r\n").await.is_err() {
        return;
    }

    let mut open: Option<Open> = None;
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => {
                state.lock().unwrap().hangups += 1;
                return;
            }
            Ok(_) => {}
        }
        let line = line.trim_end().to_owned();
        let request = parse_request(&line);

        // Payload bytes must be read before anything else.
        let mut payload = Vec::new();
        if request.verb == "write" && open.is_some() {
            let n: usize = request.args[0].parse().unwrap();
            payload.resize(n, 0);
            if reader.read_exact(&mut payload).await.is_err() {
                return;
            }
        }

        let mut split = None;
        let reply = {
            let mut state = state.lock().unwrap();
            state.log.push(line.clone());
            if request.verb == "read" && open.is_some() {
                split = state.faults.split_reads;
            }

            if request.verb == "noop" && state.faults.drop_noops > 0 {
                state.faults.drop_noops -= 1;
                None
            } else {
                Some(match &mut open {
                    Some(file) => random_access(&mut state, file, &request, &payload),
                    None => command(&mut state, &request),
                })
            }
        };

        let Some(mut reply) = reply else { return };
        match request.verb.as_str() {
            "randomaccess" if reply.starts_with(b"OK") => {
                open = Some(Open {
                    path: request.args[0].clone(),
                    position: 0,
                });
            }
            "exit" => open = None,
            _ => {}
        }
        reply.extend_from_slice(READY.as_bytes());

        if let Some(pause) = split {
            let header = reply.iter().position(|&b| b == b'\n').map_or(0, |i| i + 1);
            let half = header + (reply.len() - header - READY.len()) / 2;
            if write.write_all(&reply[..half]).await.is_err() {
                return;
            }
            tokio::time::sleep(pause).await;
            reply.drain(..half);
        }
        if write.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn command(state: &mut State, request: &Request) -> Vec<u8> {
    let uri = request.args.first().cloned().unwrap_or_default();
    let reply = match request.verb.as_str() {
        "login" => match request.flags.get("username").map(String::as_str) {
            Some("intruder") => error("unauthorised", "details", "bad credentials"),
            _ => ok(&[]),
        },
        "noop" => ok(&[]),
        "list" => {
            if state.nodes.get(&uri) != Some(&Node::Dir) {
                return error("directorynotfound", "uri", &uri).into_bytes();
            }
            let attributes = request.flags.contains_key("attributes");
            let mut out = String::new();
            if attributes {
                out.push_str(&ok(&[]));
            } else {
                out.push_str("OK\r\n");
            }
            for (name, node) in children(&state.nodes, &uri) {
                let is_file = matches!(node, Node::File(_));
                match (attributes, is_file) {
                    (true, _) if name == "locked" => {
                        out.push_str(&error("unauthorised", "details", "locked"));
                    }
                    (true, true) => {
                        let len = match &node {
                            Node::File(data) => data.len(),
                            Node::Dir => 0,
                        };
                        out.push_str(&ok(&[
                            ("name", name),
                            ("type", "f".to_owned()),
                            ("length", len.to_string()),
                        ]));
                    }
                    (true, false) => out.push_str(&ok(&[("name", name), ("type", "d".to_owned())])),
                    (false, true) => out.push_str(&format!("F:{}\r\n", escape(&name))),
                    (false, false) => out.push_str(&format!("D:{}\r\n", escape(&name))),
                }
            }
            out
        }
        "create" => {
            let node = match request.flags.get("t").map(String::as_str) {
                Some("d") => Node::Dir,
                _ => Node::File(Vec::new()),
            };
            let parent_dir = parent(&uri).to_owned();
            if state.nodes.get(&parent_dir) != Some(&Node::Dir) {
                if !request.flags.contains_key("createparent") {
                    return error("directorynotfound", "uri", &parent_dir).into_bytes();
                }
                state.nodes.insert(parent_dir, Node::Dir);
            }
            state.nodes.insert(uri, node);
            ok(&[])
        }
        "delete" => match state.nodes.remove(&uri) {
            Some(_) => {
                if request.flags.contains_key("recursive") {
                    let prefix = format!("{uri}/");
                    state.nodes.retain(|path, _| !path.starts_with(&prefix));
                }
                ok(&[])
            }
            None => error("filenotfound", "uri", &uri),
        },
        "move" | "copy" => {
            let dest = request.args[1].clone();
            if state.nodes.contains_key(&dest) && !request.flags.contains_key("overwrite") {
                return error("ioerror", "details", "destination exists").into_bytes();
            }
            let node = if request.verb == "move" {
                state.nodes.remove(&uri)
            } else {
                state.nodes.get(&uri).cloned()
            };
            match node {
                Some(node) => {
                    state.nodes.insert(dest, node);
                    ok(&[])
                }
                None => error("filenotfound", "uri", &uri),
            }
        }
        "createhardlink" => {
            let target = request.args[1].clone();
            match state.nodes.get(&target).cloned() {
                Some(node) => {
                    state.nodes.insert(uri, node);
                    ok(&[])
                }
                None => error("filenotfound", "uri", &target),
            }
        }
        "getattributes" => match state.nodes.get(&uri) {
            Some(Node::File(data)) => ok(&[
                ("length", data.len().to_string()),
                ("readonly", "False".to_owned()),
            ]),
            Some(Node::Dir) => ok(&[("readonly", "False".to_owned())]),
            None => error("filenotfound", "uri", &uri),
        },
        "setattributes" => {
            if state.nodes.contains_key(&uri) {
                ok(&[])
            } else {
                error("filenotfound", "uri", &uri)
            }
        }
        "computehash" => match state.nodes.get(&uri) {
            Some(Node::File(data)) => {
                let (start, end) = range(request, data.len());
                ok(&[
                    ("length", (end - start).to_string()),
                    ("hash", checksum(&data[start..end])),
                    ("offset", start.to_string()),
                ])
            }
            _ => error("filenotfound", "uri", &uri),
        },
        "randomaccess" => {
            let mode = request.flags.get("mode").map(String::as_str).unwrap_or("open");
            let exists = matches!(state.nodes.get(&uri), Some(Node::File(_)));
            match (mode, exists) {
                ("open", false) => return error("filenotfound", "uri", &uri).into_bytes(),
                ("create" | "createnew" | "truncate", _) | ("openorcreate", false) => {
                    state.nodes.insert(uri.clone(), Node::File(Vec::new()));
                }
                _ => {}
            }
            let writable = request.flags.get("access").is_some_and(|a| a.contains("write"));
            ok(&[
                ("length", file_len(state, &uri).to_string()),
                ("canread", "True".to_owned()),
                ("canwrite", if writable { "True" } else { "False" }.to_owned()),
                ("canseek", "True".to_owned()),
            ])
        }
        _ => error("unknowncommand", "details", &request.verb),
    };
    reply.into_bytes()
}

fn range(request: &Request, len: usize) -> (usize, usize) {
    let start = request
        .flags
        .get("offset")
        .map_or(0, |o| o.parse::<usize>().unwrap())
        .min(len);
    let end = request
        .flags
        .get("length")
        .map_or(len, |l| start + l.parse::<usize>().unwrap())
        .min(len);
    (start, end)
}

fn random_access(state: &mut State, file: &mut Open, request: &Request, payload: &[u8]) -> Vec<u8> {
    let Some(Node::File(data)) = state.nodes.get_mut(&file.path) else {
        return error("filenotfound", "uri", &file.path).into_bytes();
    };

    match request.verb.as_str() {
        "read" => {
            let n: usize = request.args[0].parse().unwrap();
            let start = (file.position as usize).min(data.len());
            let end = (start + n).min(data.len());
            let mut out = format!("OK length=\"{}\"\r\n", end - start).into_bytes();
            out.extend_from_slice(&data[start..end]);
            file.position = end as u64;
            out
        }
        "write" => {
            state.writes += 1;
            if state.faults.fail_write == Some(state.writes) {
                return error("unauthorised", "details", "read only").into_bytes();
            }
            let start = file.position as usize;
            if data.len() < start + payload.len() {
                data.resize(start + payload.len(), 0);
            }
            data[start..start + payload.len()].copy_from_slice(payload);
            file.position += payload.len() as u64;
            ok(&[]).into_bytes()
        }
        "seek" => {
            let offset: i64 = request.args[0].parse().unwrap();
            let base = match request.args[1].as_str() {
                "begin" => 0,
                "current" => file.position as i64,
                _ => data.len() as i64,
            };
            if base + offset < 0 {
                return error("ioerror", "details", "seek before start").into_bytes();
            }
            file.position = (base + offset) as u64;
            ok(&[
                ("position", file.position.to_string()),
                ("length", data.len().to_string()),
            ])
            .into_bytes()
        }
        "getlength" => ok(&[("length", data.len().to_string())]).into_bytes(),
        "setlength" => {
            let len: usize = request.args[0].parse().unwrap();
            data.resize(len, 0);
            file.position = file.position.min(len as u64);
            ok(&[
                ("length", len.to_string()),
                ("position", file.position.to_string()),
            ])
            .into_bytes()
        }
        "computehash" => {
            let (start, end) = range(request, data.len());
            ok(&[
                ("length", (end - start).to_string()),
                ("hash", checksum(&data[start..end])),
                ("position", file.position.to_string()),
            ])
            .into_bytes()
        }
        "exit" => ok(&[]).into_bytes(),
        verb => error("unknowncommand", "details", verb).into_bytes(),
    }
}

/// The checksum the mock server reports for `data`, decoded.
pub fn expected_hash(data: &[u8]) -> Vec<u8> {
    BASE64.decode(checksum(data)).unwrap()
}
