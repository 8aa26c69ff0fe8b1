//! Format commands and parse responses into/from protocol lines.

use std::fmt;

use crate::command::*;
use crate::error::Error;
use crate::utils::Result;

fn needs_escape(b: u8) -> bool {
    b < 0x20 || b == 0x7f || matches!(b, b' ' | b'"' | b'=' | b'%')
}

/// Hex-escape every byte that would break a token as `%XX`.
pub fn escape(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    for &b in s.as_bytes() {
        if needs_escape(b) {
            out.extend_from_slice(format!("%{b:02X}").as_bytes());
        } else {
            out.push(b);
        }
    }
    // Only ASCII bytes are replaced, so multi-byte sequences stay intact.
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode `%XX` escapes. Malformed escapes are kept as they are.
pub fn unescape(s: &str) -> String {
    if !s.contains('%') {
        return s.to_owned();
    }

    let src = s.as_bytes();
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        if src[i] == b'%' && i + 2 < src.len() {
            if let (Some(hi), Some(lo)) = (hex_value(src[i + 1]), hex_value(src[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(src[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.verb)?;
        for (key, value) in &self.flags {
            match value {
                Some(value) => write!(f, " -{}={}", escape(key), escape(value))?,
                None => write!(f, " -{}", escape(key))?,
            }
        }
        for arg in &self.args {
            match arg {
                Arg::Text(s) => write!(f, " \"{}\"", escape(s))?,
                Arg::Bare(s) => write!(f, " {s}")?,
            }
        }
        Ok(())
    }
}

/// Render a command as its request line, without the terminator.
pub fn format_command(cmd: &Command) -> String {
    cmd.to_string()
}

fn read_token<I>(chars: &mut std::iter::Peekable<I>, is_key: bool, text: &str) -> Result<String>
where
    I: Iterator<Item = char>,
{
    let mut token = String::new();

    if chars.peek() == Some(&'"') {
        chars.next();
        loop {
            match chars.next() {
                Some('"') => return Ok(token),
                Some(c) => token.push(c),
                None => return Err(Error::Unexpected(format!("unterminated quote in {text:?}"))),
            }
        }
    }

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || (is_key && c == '=') {
            break;
        }
        token.push(c);
        chars.next();
    }
    Ok(token)
}

/// Parse whitespace separated `key=value` pairs.
///
/// Either side may be double-quoted. A key without `=` gets an empty value.
/// Keys and values are unescaped.
pub fn parse_tuples(text: &str) -> Result<Tuples> {
    let mut tuples = Tuples::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let key = read_token(&mut chars, true, text)?;
        if key.is_empty() {
            return Err(Error::Unexpected(format!("empty tuple key in {text:?}")));
        }
        let value = if chars.next_if_eq(&'=').is_some() {
            read_token(&mut chars, false, text)?
        } else {
            String::new()
        };

        tuples.insert(unescape(&key), unescape(&value));
    }

    Ok(tuples)
}

/// Inverse of [`parse_tuples`]: escaped keys, quoted escaped values.
pub fn format_tuples(tuples: &Tuples) -> String {
    tuples
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", escape(k), escape(v)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// True for the line terminating a response sequence.
pub fn is_ready(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(READY)
}

/// Parse an `OK`/`ERROR` line. Any other leading token is unexpected.
pub fn parse_response(line: &str) -> Result<Response> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));

    match ResponseType::from_token(head) {
        Some(kind @ (ResponseType::Ok | ResponseType::Error)) => Ok(Response {
            kind,
            tuples: parse_tuples(rest)?,
            text: rest.to_owned(),
        }),
        _ => Err(Error::Unexpected(line.to_owned())),
    }
}

/// Map an `ERROR` response to its typed error. `OK` responses map to `None`.
pub fn map_error(response: &Response) -> Option<Error> {
    if response.kind != ResponseType::Error {
        return None;
    }

    let detail = |key: &str| response.get(key).unwrap_or_default().to_owned();
    let code = response.get("code").unwrap_or_default().to_ascii_lowercase();

    Some(match code.as_str() {
        "eof" => Error::EndOfStream,
        "filenotfound" => Error::FileNotFound(detail("uri")),
        "directorynotfound" => Error::DirectoryNotFound(detail("uri")),
        "unauthorised" => Error::PermissionDenied(detail("details")),
        _ => Error::Protocol(unescape(&response.text)),
    })
}

impl Response {
    /// `Err` with the mapped error for `ERROR` responses.
    pub fn into_result(self) -> Result<Response> {
        match map_error(&self) {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Parse a plain listing line: `F:<name>` or `D:<name>`.
pub fn parse_list_entry(line: &str) -> Result<ListEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (node_type, name) = match line.split_once(':') {
        Some((t, name)) if t.eq_ignore_ascii_case("F") => (NodeType::File, name),
        Some((t, name)) if t.eq_ignore_ascii_case("D") => (NodeType::Directory, name),
        _ => return Err(Error::Unexpected(line.to_owned())),
    };

    Ok(ListEntry {
        name: unescape(name),
        node_type,
    })
}

/// Split the `name` and `type` tuples off an attributed listing record.
pub fn parse_attributed_entry(response: Response) -> Result<AttributedEntry> {
    let mut attributes = response.tuples;
    let name = attributes.remove("name");
    let node_type = attributes.remove("type").as_deref().and_then(NodeType::parse);

    match (name, node_type) {
        (Some(name), Some(node_type)) => Ok(AttributedEntry {
            name,
            node_type,
            attributes,
        }),
        _ => Err(Error::Unexpected(response.text)),
    }
}

#[test]
fn escape_unescape() {
    assert_eq!(escape("/foo/bar"), "/foo/bar");
    assert_eq!(escape("a b=\"c\"%"), "a%20b%3D%22c%22%25");
    assert_eq!(escape("tab\there\r\n"), "tab%09here%0D%0A");
    assert_eq!(escape("héllo wörld"), "héllo%20wörld");
    assert_eq!(unescape("%2Ffoo%2Fbar"), "/foo/bar");
    assert_eq!(unescape("h%C3%A9"), "hé");
    assert_eq!(unescape("100%"), "100%");
    assert_eq!(unescape("%zz%4"), "%zz%4");
    assert_eq!(unescape(&escape("x = \"y\" % z")), "x = \"y\" % z");
}

#[test]
fn command_line_format() {
    let cmd = Command::new("move")
        .flag("t", NodeType::File.flag())
        .switch("overwrite", true)
        .switch("createparent", false)
        .text("/a dir/x")
        .text("/b/y");
    assert_eq!(
        format_command(&cmd),
        "move -t=f -overwrite \"/a%20dir/x\" \"/b/y\""
    );

    let cmd = Command::new("seek").bare(-12i64).bare("end");
    assert_eq!(format_command(&cmd), "seek -12 end");

    let cmd = Command::new("list").flag("regex", "^a b$").text("/");
    assert_eq!(format_command(&cmd), "list -regex=^a%20b$ \"/\"");
}

#[test]
fn tuple_grammar() {
    let t = parse_tuples("length=\"482\" canseek=True  \"odd key\"=\"a=b c\" flag").unwrap();
    assert_eq!(t.get("length"), Some("482"));
    assert_eq!(t.get("CANSEEK"), Some("True"));
    assert_eq!(t.get("odd key"), Some("a=b c"));
    assert_eq!(t.get("flag"), Some(""));

    let t = parse_tuples("a=1 A=2 b=3").unwrap();
    assert_eq!(t.len(), 2);
    assert_eq!(t.get("a"), Some("2"));

    assert!(parse_tuples("").unwrap().is_empty());
    assert!(matches!(parse_tuples("a=\"open"), Err(Error::Unexpected(_))));
    assert!(matches!(parse_tuples("=x"), Err(Error::Unexpected(_))));
}

#[test]
fn tuples_survive_a_round_trip() {
    let pairs = [
        ("plain", "value"),
        ("with space", "a b c"),
        ("eq=key", "x=y=z"),
        ("quote\"d", "say \"hi\""),
        ("percent", "50% off"),
        ("empty", ""),
    ];
    let tuples: Tuples = pairs.into_iter().collect();
    let parsed = parse_tuples(&format_tuples(&tuples)).unwrap();
    assert_eq!(parsed, tuples);
}

#[test]
fn response_lines() {
    let r = parse_response("OK length=\"482\" canseek=\"True\"\r\n").unwrap();
    assert_eq!(r.kind, ResponseType::Ok);
    assert_eq!(r.get("length"), Some("482"));
    assert_eq!(r.get("canseek"), Some("True"));

    let r = parse_response("ok").unwrap();
    assert!(r.is_ok() && r.tuples.is_empty());

    assert!(matches!(parse_response("READY"), Err(Error::Unexpected(_))));
    assert!(matches!(parse_response("HELLO x=1"), Err(Error::Unexpected(_))));
    assert!(is_ready("ready\r"));
}

#[test]
fn error_mapping() {
    let r = parse_response("ERROR code=\"filenotfound\" uri=\"%2Fa%2Fb\"").unwrap();
    assert!(matches!(map_error(&r), Some(Error::FileNotFound(uri)) if uri == "/a/b"));

    let r = parse_response("ERROR code=\"DirectoryNotFound\" uri=\"%2Fd\"").unwrap();
    assert!(matches!(map_error(&r), Some(Error::DirectoryNotFound(uri)) if uri == "/d"));

    let r = parse_response("ERROR code=\"unauthorised\" details=\"read%20only\"").unwrap();
    assert!(matches!(map_error(&r), Some(Error::PermissionDenied(d)) if d == "read only"));

    let r = parse_response("ERROR code=\"eof\"").unwrap();
    assert!(matches!(map_error(&r), Some(Error::EndOfStream)));

    let r = parse_response("ERROR code=\"unexpectedcode\" message=\"bad%20thing\"").unwrap();
    assert!(matches!(
        map_error(&r),
        Some(Error::Protocol(text)) if text == "code=\"unexpectedcode\" message=\"bad thing\""
    ));

    let r = parse_response("OK").unwrap();
    assert!(map_error(&r).is_none());
    assert!(r.into_result().is_ok());
}

#[test]
fn listing_lines() {
    let e = parse_list_entry("F:a%20file.txt").unwrap();
    assert_eq!(e.name, "a file.txt");
    assert_eq!(e.node_type, NodeType::File);
    assert_eq!(parse_list_entry("d:sub").unwrap().node_type, NodeType::Directory);
    assert!(parse_list_entry("X:nope").is_err());
    assert!(parse_list_entry("READY").is_err());

    let r = parse_response("OK name=\"a%20b\" type=\"f\" length=\"10\"").unwrap();
    let e = parse_attributed_entry(r).unwrap();
    assert_eq!(e.name, "a b");
    assert_eq!(e.node_type, NodeType::File);
    assert_eq!(e.attributes.get("length"), Some("10"));
    assert!(!e.attributes.contains_key("name"));

    let r = parse_response("OK length=\"10\"").unwrap();
    assert!(parse_attributed_entry(r).is_err());
}
