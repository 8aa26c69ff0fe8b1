mod common;

use std::time::{Duration, Instant};

use common::{Faults, MockServer, Node, expected_hash, init_logger};
use netvfs::{Error, NodeType, Session, SessionConfig, SessionState, Tuples};

#[tokio::test]
async fn login_and_ping() {
    init_logger();
    let server = MockServer::start().await;
    let session = Session::connect(server.config()).await.unwrap();

    session.ping().await.unwrap();
    assert!(session.is_connected().await);

    let log = server.log();
    assert_eq!(log[0], "login -username=tester -password=secret");
    assert_eq!(log[1], "noop");
}

#[tokio::test]
async fn rejected_login() {
    init_logger();
    let server = MockServer::start().await;
    let config = server.config().with_credentials("intruder", "guess");

    let result = Session::connect(config).await;
    assert!(matches!(result, Err(Error::PermissionDenied(d)) if d == "bad credentials"));
}

#[tokio::test]
async fn dial_string_config() {
    init_logger();
    let server = MockServer::start().await;
    let dial = format!("tcp!127.0.0.1!{}", server.addr.port());
    let config = SessionConfig::from_addr(&dial)
        .unwrap()
        .with_credentials("tester", "secret");

    let session = Session::connect(config).await.unwrap();
    session.ping().await.unwrap();
}

#[tokio::test]
async fn file_system_operations() {
    init_logger();
    let server = MockServer::start().await;
    let session = Session::connect(server.config()).await.unwrap();

    session.create("/data", NodeType::Directory, false).await.unwrap();
    session.create("/data/a b.txt", NodeType::File, false).await.unwrap();
    session.create("/new/deep", NodeType::Directory, true).await.unwrap();
    assert_eq!(server.node("/new"), Some(Node::Dir));
    assert!(server.sent("create").contains(&"create -t=f \"/data/a%20b.txt\"".to_owned()));

    session
        .copy_node("/data/a b.txt", "/data/copy", NodeType::File, false)
        .await
        .unwrap();
    session
        .move_node("/data/copy", "/data/moved", NodeType::File, false)
        .await
        .unwrap();
    session.create_hard_link("/data/link", "/data/moved").await.unwrap();

    let mut names: Vec<String> = session
        .list("/data", None)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["a b.txt", "link", "moved"]);

    let attributes = session.get_attributes("/data/moved", NodeType::File).await.unwrap();
    assert_eq!(attributes.get("length"), Some("0"));
    let mut update = Tuples::new();
    update.insert("readonly", "True");
    session
        .set_attributes("/data/moved", NodeType::File, &update)
        .await
        .unwrap();
    assert!(server.sent("setattributes")[0].starts_with("setattributes -t=f -readonly=True"));

    session.delete("/data", NodeType::Directory, true).await.unwrap();
    assert_eq!(server.node("/data/moved"), None);
}

#[tokio::test]
async fn hash_of_a_range() {
    init_logger();
    let server = MockServer::start().await;
    server.put_file("/blob", b"0123456789");
    let session = Session::connect(server.config()).await.unwrap();

    let hash = session.compute_hash("/blob", "crc", 2, Some(3)).await.unwrap();
    assert_eq!(hash.bytes, expected_hash(b"234"));
    assert_eq!(hash.offset, 2);
    assert_eq!(hash.length, 3);
    assert_eq!(
        server.sent("computehash")[0],
        "computehash -t=f -algorithm=crc -offset=2 -length=3 \"/blob\""
    );
}

#[tokio::test]
async fn server_error_invalidates_the_session() {
    init_logger();
    let server = MockServer::start().await;
    let session = Session::connect(server.config()).await.unwrap();

    let result = session.delete("/missing", NodeType::File, false).await;
    assert!(matches!(result, Err(Error::FileNotFound(uri)) if uri == "/missing"));
    assert_eq!(session.state().await, SessionState::Invalid);
    assert_eq!(server.connections(), 1);

    // Errors reported by the server are not retried.
    assert_eq!(server.sent("delete").len(), 1);

    session.ping().await.unwrap();
    assert_eq!(server.connections(), 2);
    assert!(session.is_connected().await);
}

#[tokio::test]
async fn missing_directory_listing() {
    init_logger();
    let server = MockServer::start().await;
    let session = Session::connect(server.config()).await.unwrap();

    let result = session.list("/nowhere", Some(".*")).await;
    assert!(matches!(result, Err(Error::DirectoryNotFound(uri)) if uri == "/nowhere"));
    assert_eq!(server.sent("list")[0], "list -regex=.* \"/nowhere\"");
}

#[tokio::test]
async fn attributed_listing() {
    init_logger();
    let server = MockServer::start().await;
    server.put_dir("/d");
    server.put_file("/d/a", b"abc");
    server.put_dir("/d/sub");
    let session = Session::connect(server.config()).await.unwrap();

    let entries = session.list_attributes("/d", None).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "a");
    assert_eq!(entries[0].node_type, NodeType::File);
    assert_eq!(entries[0].attributes.get("length"), Some("3"));
    assert_eq!(entries[1].node_type, NodeType::Directory);

    // A record the server failed to produce fails the listing after READY,
    // so the connection stays in step.
    server.put_file("/d/locked", b"");
    let result = session.list_attributes("/d", None).await;
    assert!(matches!(result, Err(Error::PermissionDenied(d)) if d == "locked"));
    session.ping().await.unwrap();
}

#[tokio::test]
async fn transport_failures_are_retried() {
    init_logger();
    let server = MockServer::start().await;
    let session = Session::connect(server.config()).await.unwrap();
    server.faults(Faults {
        drop_noops: 3,
        ..Faults::default()
    });

    let started = Instant::now();
    session.ping().await.unwrap();

    // 0 + 50 + 100 ms of backoff between the four tries.
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(server.sent("noop").len(), 4);
    assert_eq!(server.connections(), 4);
}

#[tokio::test]
async fn retries_are_bounded() {
    init_logger();
    let server = MockServer::start().await;
    let session = Session::connect(server.config()).await.unwrap();
    server.faults(Faults {
        drop_noops: 4,
        ..Faults::default()
    });

    let result = session.ping().await;
    assert!(matches!(result, Err(Error::Io(_))));
    assert_eq!(server.sent("noop").len(), 4);
    assert_eq!(session.state().await, SessionState::Invalid);

    session.ping().await.unwrap();
}

#[tokio::test]
async fn disconnect_then_reconnect() {
    init_logger();
    let server = MockServer::start().await;
    let session = Session::connect(server.config()).await.unwrap();

    session.disconnect().await;
    assert_eq!(session.state().await, SessionState::Disconnected);

    session.ping().await.unwrap();
    assert!(session.is_connected().await);

    session.reconnect().await.unwrap();
    assert_eq!(server.connections(), 3);
    assert_eq!(server.sent("login").len(), 3);
}
