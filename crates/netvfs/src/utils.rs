use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Split a dial string of the form `tcp!host!port`.
pub fn parse_proto(arg: &str) -> Option<(&str, &str, &str)> {
    let mut split = arg.split('!');
    let (proto, addr, port) = (split.next()?, split.next()?, split.next()?);

    Some((proto, addr, port))
}

/// Accepts `host:port` or `tcp!host!port` and returns `host:port`.
pub fn parse_addr(arg: &str) -> Option<String> {
    if arg.contains('!') {
        return match parse_proto(arg)? {
            ("tcp", host, port) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Some(format!("{host}:{port}"))
            }
            _ => None,
        };
    }

    let (host, port) = arg.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }
    Some(arg.to_owned())
}

#[test]
fn dial_strings() {
    assert_eq!(parse_proto("tcp!0.0.0.0!564"), Some(("tcp", "0.0.0.0", "564")));
    assert_eq!(parse_addr("tcp!localhost!7000").as_deref(), Some("localhost:7000"));
    assert_eq!(parse_addr("10.0.0.1:7000").as_deref(), Some("10.0.0.1:7000"));
    assert_eq!(parse_addr("unix!/tmp/sock!0"), None);
    assert_eq!(parse_addr("localhost"), None);
    assert_eq!(parse_addr("localhost:http"), None);
}
