//! Protocol data types.
//!
//! A request is a single line: a verb, ordered `-key=value` flags and ordered
//! arguments. A response line starts with `OK` or `ERROR` followed by
//! `key=value` tuples, and every response sequence ends with a `READY` line.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::error::Error;
use crate::utils::Result;

/// The line terminating every response sequence.
pub const READY: &str = "READY";

/// Leading token of a response line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResponseType {
    Ok,
    Error,
    Ready,
}

impl ResponseType {
    /// Case-insensitive match of a leading token.
    pub fn from_token(token: &str) -> Option<ResponseType> {
        if token.eq_ignore_ascii_case("OK") {
            Some(ResponseType::Ok)
        } else if token.eq_ignore_ascii_case("ERROR") {
            Some(ResponseType::Error)
        } else if token.eq_ignore_ascii_case(READY) {
            Some(ResponseType::Ready)
        } else {
            None
        }
    }
}

/// Ordered key/value pairs with case-insensitive keys.
///
/// Inserting a key that is already present replaces its value in place, so
/// the last occurrence of a duplicate key wins while the first occurrence
/// keeps its position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tuples(Vec<(String, String)>);

impl Tuples {
    pub fn new() -> Tuples {
        Tuples(Vec::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(i) => self.0[i].1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|i| self.0[i].1.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).map(|i| self.0.remove(i).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tuples {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tuples = Tuples::new();
        for (k, v) in iter {
            tuples.insert(k, v);
        }
        tuples
    }
}

/// A parsed `OK`/`ERROR` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub kind: ResponseType,
    /// Tuples with keys and values already unescaped.
    pub tuples: Tuples,
    /// The tuple text exactly as received.
    pub text: String,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.kind == ResponseType::Ok
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tuples.get(key)
    }

    /// Parse a required tuple value.
    pub fn value<T: FromStr>(&self, key: &str) -> Result<T> {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| Error::Unexpected(format!("missing or invalid {key:?} in {:?}", self.text)))
    }

    /// Parse a `True`/`False` tuple value, case-insensitively. Absent means false.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// A command argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arg {
    /// Sent quoted and escaped.
    Text(String),
    /// Sent as is. Only for numbers and keywords.
    Bare(String),
}

/// A request line under construction.
///
/// Flags and arguments are written in the order they were added.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub verb: String,
    pub flags: Vec<(String, Option<String>)>,
    pub args: Vec<Arg>,
}

impl Command {
    pub fn new(verb: &str) -> Command {
        Command {
            verb: verb.to_owned(),
            flags: Vec::new(),
            args: Vec::new(),
        }
    }

    /// `-key=value`
    pub fn flag(mut self, key: &str, value: impl fmt::Display) -> Command {
        self.flags.push((key.to_owned(), Some(value.to_string())));
        self
    }

    /// `-key`, only when `on` is set.
    pub fn switch(mut self, key: &str, on: bool) -> Command {
        if on {
            self.flags.push((key.to_owned(), None));
        }
        self
    }

    pub fn text(mut self, arg: impl Into<String>) -> Command {
        self.args.push(Arg::Text(arg.into()));
        self
    }

    pub fn bare(mut self, arg: impl fmt::Display) -> Command {
        self.args.push(Arg::Bare(arg.to_string()));
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    File,
    Directory,
}

impl NodeType {
    /// Value of the `-t` flag.
    pub fn flag(self) -> &'static str {
        match self {
            NodeType::File => "f",
            NodeType::Directory => "d",
        }
    }

    /// Accepts `f`/`d` and `file`/`directory`, case-insensitively.
    pub fn parse(s: &str) -> Option<NodeType> {
        match s.to_ascii_lowercase().as_str() {
            "f" | "file" => Some(NodeType::File),
            "d" | "dir" | "directory" => Some(NodeType::Directory),
            _ => None,
        }
    }
}

/// How `randomaccess` opens the target.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FileMode {
    CreateNew,
    Create,
    #[default]
    Open,
    OpenOrCreate,
    Truncate,
    Append,
}

impl FileMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FileMode::CreateNew => "createnew",
            FileMode::Create => "create",
            FileMode::Open => "open",
            FileMode::OpenOrCreate => "openorcreate",
            FileMode::Truncate => "truncate",
            FileMode::Append => "append",
        }
    }
}

bitflags! {
    /// Access requested when opening a random-access stream
    #[derive(Copy, Debug, Clone, PartialEq, Eq, Hash)]
    pub struct FileAccess: u8 {
        const READ      = 0x1;
        const WRITE     = 0x2;
        const READWRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

bitflags! {
    /// Access other openers of the same file are allowed
    #[derive(Copy, Debug, Default, Clone, PartialEq, Eq, Hash)]
    pub struct FileShare: u8 {
        const READ      = 0x1;
        const WRITE     = 0x2;
        const DELETE    = 0x4;
    }
}

fn flag_names<'a>(names: impl Iterator<Item = (&'a str, bool)>, empty: &str) -> String {
    let names: Vec<String> = names
        .filter(|(_, set)| *set)
        .map(|(name, _)| name.to_ascii_lowercase())
        .collect();
    if names.is_empty() {
        empty.to_owned()
    } else {
        names.join(",")
    }
}

impl FileAccess {
    /// Wire spelling: `read`, `write` or `readwrite`.
    pub fn wire_name(self) -> &'static str {
        if self.contains(FileAccess::READWRITE) {
            "readwrite"
        } else if self.contains(FileAccess::WRITE) {
            "write"
        } else {
            "read"
        }
    }
}

impl FileShare {
    /// Wire spelling: `none` or a comma separated list such as `read,write`.
    pub fn wire_name(self) -> String {
        flag_names(
            [
                ("read", self.contains(FileShare::READ)),
                ("write", self.contains(FileShare::WRITE)),
                ("delete", self.contains(FileShare::DELETE)),
            ]
            .into_iter(),
            "none",
        )
    }
}

/// A hash computed by the server over a byte range of a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashValue {
    pub algorithm: String,
    pub offset: u64,
    pub length: u64,
    pub bytes: Vec<u8>,
}

/// One line of a plain `list` response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub node_type: NodeType,
}

/// One record of an attributed `list` response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributedEntry {
    pub name: String,
    pub node_type: NodeType,
    /// All other attributes of the child.
    pub attributes: Tuples,
}

#[test]
fn tuples_are_case_insensitive_and_last_wins() {
    let mut t = Tuples::new();
    t.insert("Length", "1");
    t.insert("name", "a");
    t.insert("LENGTH", "2");

    assert_eq!(t.len(), 2);
    assert_eq!(t.get("length"), Some("2"));
    assert_eq!(t.iter().next(), Some(("Length", "2")));
    assert_eq!(t.remove("NAME").as_deref(), Some("a"));
    assert!(!t.contains_key("name"));
}

#[test]
fn share_and_access_wire_names() {
    assert_eq!(FileShare::empty().wire_name(), "none");
    assert_eq!((FileShare::READ | FileShare::WRITE).wire_name(), "read,write");
    assert_eq!(FileAccess::READWRITE.wire_name(), "readwrite");
    assert_eq!(FileAccess::WRITE.wire_name(), "write");
}

#[test]
fn response_values() {
    let response = Response {
        kind: ResponseType::Ok,
        tuples: [("length", "482"), ("canseek", "True")].into_iter().collect(),
        text: "length=\"482\" canseek=\"True\"".to_owned(),
    };
    assert_eq!(response.value::<u64>("length").unwrap(), 482);
    assert!(response.flag("CanSeek"));
    assert!(!response.flag("canwrite"));
    assert!(matches!(response.value::<u64>("position"), Err(Error::Unexpected(_))));
}
