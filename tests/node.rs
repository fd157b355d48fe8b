//! End-to-end tests: a node served over real TCP, driven through the same
//! framed protocol clients use.

use dfsish::auth::{Authenticator, SecretAuthenticator};
use dfsish::binlog::BinlogWriter;
use dfsish::handler::NodeHandler;
use dfsish::proto::codec::FramedConn;
use dfsish::proto::{attrs, FileInfo, Header, Operation, ResultCode};
use dfsish::server::TcpNodeServer;
use dfsish::storage::fid::FID_PATTERN;
use dfsish::storage::ObjectStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

const GROUP: &str = "g01";
const INSTANCE: &str = "node-1";
const SECRET: &str = "s3cret";

const HELLO_FID: &str = "g01/A6/86/5d41402abc4b2a76b9719d911017c592";

type ClientConn = FramedConn<OwnedReadHalf, OwnedWriteHalf>;

struct TestNode {
    addr: SocketAddr,
    dir: tempfile::TempDir,
}

impl TestNode {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ObjectStore::open(dir.path().join("data"), dir.path().join("tmp"))
                .await
                .unwrap(),
        );
        let binlog = Arc::new(
            BinlogWriter::open(dir.path().join("binlog/binlog.dat"))
                .await
                .unwrap(),
        );
        let auth: Arc<dyn Authenticator> = Arc::new(SecretAuthenticator::new(SECRET));
        let handler = Arc::new(NodeHandler::new(GROUP, INSTANCE, store, binlog));
        let server = TcpNodeServer::new(auth, handler);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve_on(listener).await;
        });

        Self { addr, dir }
    }

    fn object_path(&self, fid: &str) -> PathBuf {
        let rel: String = fid.splitn(2, '/').nth(1).unwrap().to_string();
        self.dir.path().join("data").join(rel)
    }

    async fn binlog_records(&self) -> Vec<dfsish::binlog::BinlogRecord> {
        let log = BinlogWriter::open(self.dir.path().join("binlog/binlog.dat"))
            .await
            .unwrap();
        log.recover().await.unwrap()
    }
}

async fn connect_raw(addr: SocketAddr) -> ClientConn {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (r, w) = stream.into_split();
    FramedConn::new(r, w)
}

async fn connect_authed(addr: SocketAddr) -> ClientConn {
    let mut conn = connect_raw(addr).await;
    conn.send(&Header::request(Operation::Connect).with_attr(attrs::SECRET, SECRET))
        .await
        .unwrap();
    let (reply, _) = conn.receive().await.unwrap();
    assert!(reply.is_success(), "handshake rejected: {reply:?}");
    conn
}

async fn upload(conn: &mut ClientConn, content: &[u8]) -> Header {
    conn.send_with_body(
        &Header::request(Operation::Upload),
        &mut &content[..],
        content.len() as u64,
    )
    .await
    .unwrap();
    let (reply, body_len) = conn.receive().await.unwrap();
    assert_eq!(body_len, 0);
    reply
}

async fn download(conn: &mut ClientConn, fid: &str, offset: i64, length: i64) -> (Header, Vec<u8>) {
    conn.send(
        &Header::request(Operation::Download)
            .with_attr(attrs::FILE_ID, fid)
            .with_attr(attrs::OFFSET, offset.to_string())
            .with_attr(attrs::LENGTH, length.to_string()),
    )
    .await
    .unwrap();
    let (reply, _) = conn.receive().await.unwrap();
    let mut body = Vec::new();
    conn.body_reader().read_to_end(&mut body).await.unwrap();
    (reply, body)
}

async fn query(conn: &mut ClientConn, fid: &str) -> Header {
    conn.send(&Header::request(Operation::Query).with_attr(attrs::FILE_ID, fid))
        .await
        .unwrap();
    let (reply, body_len) = conn.receive().await.unwrap();
    assert_eq!(body_len, 0);
    reply
}

#[tokio::test]
async fn upload_creates_content_addressed_object() {
    let node = TestNode::start().await;
    let mut conn = connect_authed(node.addr).await;

    let reply = upload(&mut conn, b"hello").await;
    assert!(reply.is_success());
    let fid = reply.attr(attrs::FID).unwrap();
    assert_eq!(fid, HELLO_FID);
    assert!(FID_PATTERN.is_match(fid));
    assert_eq!(reply.attr(attrs::GROUP), Some(GROUP));
    assert_eq!(reply.attr(attrs::INSTANCE_ID), Some(INSTANCE));

    // payload + 4-byte zero footer
    let bytes = std::fs::read(node.object_path(fid)).unwrap();
    assert_eq!(bytes.len(), 9);
    assert_eq!(&bytes[..5], b"hello");
    assert_eq!(&bytes[5..], &[0, 0, 0, 0]);

    let records = node.binlog_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fid, HELLO_FID);
    assert_eq!(records[0].payload_len, 5);
    assert_eq!(records[0].instance_id, INSTANCE);
}

#[tokio::test]
async fn fid_shard_tracks_crc_of_content() {
    let node = TestNode::start().await;
    let mut conn = connect_authed(node.addr).await;

    let content = b"The quick brown fox jumps over the lazy dog";
    let reply = upload(&mut conn, content).await;
    assert!(reply.is_success());

    let crc_hex = format!("{:08x}", crc32fast::hash(content));
    let md5_hex = format!("{:x}", md5::compute(content));
    let expected = format!(
        "{GROUP}/{}/{}/{md5_hex}",
        crc_hex[4..6].to_uppercase(),
        crc_hex[6..8].to_uppercase()
    );
    assert_eq!(reply.attr(attrs::FID), Some(expected.as_str()));
}

#[tokio::test]
async fn duplicate_upload_keeps_one_object_and_bumps_footer() {
    let node = TestNode::start().await;
    let mut conn = connect_authed(node.addr).await;

    upload(&mut conn, b"hello").await;
    let reply = upload(&mut conn, b"hello").await;
    assert!(reply.is_success());
    assert_eq!(reply.attr(attrs::FID), Some(HELLO_FID));

    let bytes = std::fs::read(node.object_path(HELLO_FID)).unwrap();
    assert_eq!(bytes.len(), 9);
    assert_eq!(&bytes[5..], &[0, 0, 0, 1]);

    // Every ingest is logged, duplicates included.
    assert_eq!(node.binlog_records().await.len(), 2);
}

#[tokio::test]
async fn concurrent_duplicate_uploads_settle_on_one_object() {
    let node = TestNode::start().await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let addr = node.addr;
        tasks.push(tokio::spawn(async move {
            let mut conn = connect_authed(addr).await;
            upload(&mut conn, b"hello").await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_success());
    }

    let bytes = std::fs::read(node.object_path(HELLO_FID)).unwrap();
    assert_eq!(bytes.len(), 9);
    assert_eq!(&bytes[5..], &[0, 0, 0, 3]);

    // One object on disk, no stray shard directories.
    let data_dir = node.dir.path().join("data");
    let mut object_count = 0;
    for d1 in std::fs::read_dir(&data_dir).unwrap() {
        for d2 in std::fs::read_dir(d1.unwrap().path()).unwrap() {
            object_count += std::fs::read_dir(d2.unwrap().path()).unwrap().count();
        }
    }
    assert_eq!(object_count, 1);
}

#[tokio::test]
async fn download_round_trips_uploaded_bytes() {
    let node = TestNode::start().await;
    let mut conn = connect_authed(node.addr).await;
    upload(&mut conn, b"hello").await;

    let (reply, body) = download(&mut conn, HELLO_FID, 0, -1).await;
    assert!(reply.is_success());
    assert_eq!(body, b"hello");

    let (reply, body) = download(&mut conn, HELLO_FID, 1, 3).await;
    assert!(reply.is_success());
    assert_eq!(body, b"ell");

    // Past-the-end offsets clamp to an empty body, not an error.
    let (reply, body) = download(&mut conn, HELLO_FID, 100, 10).await;
    assert!(reply.is_success());
    assert_eq!(body, b"");

    // Overlong length clamps to the payload; the footer never leaks.
    let (reply, body) = download(&mut conn, HELLO_FID, 0, 1000).await;
    assert!(reply.is_success());
    assert_eq!(body, b"hello");
}

#[tokio::test]
async fn download_of_unknown_or_malformed_id_is_not_found() {
    let node = TestNode::start().await;
    let mut conn = connect_authed(node.addr).await;

    let (reply, body) = download(&mut conn, "not-a-fid", 0, -1).await;
    assert_eq!(reply.result, ResultCode::NotFound.code());
    assert!(body.is_empty());

    let (reply, _) = download(
        &mut conn,
        "g01/AB/CD/00000000000000000000000000000000",
        0,
        -1,
    )
    .await;
    assert_eq!(reply.result, ResultCode::NotFound.code());
}

#[tokio::test]
async fn query_reports_payload_metadata() {
    let node = TestNode::start().await;
    let mut conn = connect_authed(node.addr).await;
    upload(&mut conn, b"hello").await;

    let reply = query(&mut conn, HELLO_FID).await;
    assert!(reply.is_success());

    let info: FileInfo = serde_json::from_str(reply.attr(attrs::INFO).unwrap()).unwrap();
    assert_eq!(info.group, GROUP);
    assert_eq!(info.file_id, HELLO_FID);
    assert_eq!(info.file_length, 5);
    assert!(info.create_time > 0);

    let reply = query(&mut conn, "g01/AB/CD/00000000000000000000000000000000").await;
    assert_eq!(reply.result, ResultCode::NotFound.code());
}

#[tokio::test]
async fn unauthenticated_request_is_rejected_and_connection_closed() {
    let node = TestNode::start().await;
    let mut conn = connect_raw(node.addr).await;

    conn.send_with_body(&Header::request(Operation::Upload), &mut &b"hello"[..], 5)
        .await
        .unwrap();
    let (reply, _) = conn.receive().await.unwrap();
    assert_eq!(reply.result, ResultCode::Unauthorized.code());
    assert_eq!(reply.msg, "authentication failed");

    assert!(conn.receive().await.is_err());
}

#[tokio::test]
async fn wrong_secret_is_rejected_and_connection_closed() {
    let node = TestNode::start().await;
    let mut conn = connect_raw(node.addr).await;

    conn.send(&Header::request(Operation::Connect).with_attr(attrs::SECRET, "wrong"))
        .await
        .unwrap();
    let (reply, _) = conn.receive().await.unwrap();
    assert_eq!(reply.result, ResultCode::Unauthorized.code());

    assert!(conn.receive().await.is_err());
}

#[tokio::test]
async fn short_upload_body_reports_mismatch() {
    let node = TestNode::start().await;
    let mut conn = connect_authed(node.addr).await;

    // Declare 10 bytes but provide 5, then half-close so the server sees EOF.
    let err = conn
        .send_with_body(&Header::request(Operation::Upload), &mut &b"hello"[..], 10)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        dfsish::proto::codec::ProtocolError::ShortBody { .. }
    ));
    conn.shutdown().await.unwrap();

    let (reply, _) = conn.receive().await.unwrap();
    assert_eq!(reply.result, ResultCode::Error.code());
    assert_eq!(reply.msg, "mismatch body length");

    assert!(node.binlog_records().await.is_empty());
}

#[tokio::test]
async fn unknown_operation_gets_a_reply_without_closing() {
    let node = TestNode::start().await;
    let mut conn = connect_authed(node.addr).await;

    let mut bogus = Header::default();
    bogus.operation = 9;
    conn.send(&bogus).await.unwrap();
    let (reply, _) = conn.receive().await.unwrap();
    assert_eq!(reply.result, ResultCode::UnknownOperation.code());
    assert_eq!(reply.msg, "unknown operation");

    // The connection survives and keeps serving.
    let reply = upload(&mut conn, b"hello").await;
    assert!(reply.is_success());
}

#[tokio::test]
async fn empty_upload_is_a_valid_object() {
    let node = TestNode::start().await;
    let mut conn = connect_authed(node.addr).await;

    let reply = upload(&mut conn, b"").await;
    assert!(reply.is_success());
    let fid = reply.attr(attrs::FID).unwrap().to_string();

    let bytes = std::fs::read(node.object_path(&fid)).unwrap();
    assert_eq!(bytes.len(), 4);

    let (reply, body) = download(&mut conn, &fid, 0, -1).await;
    assert!(reply.is_success());
    assert!(body.is_empty());

    let info: FileInfo =
        serde_json::from_str(query(&mut conn, &fid).await.attr(attrs::INFO).unwrap()).unwrap();
    assert_eq!(info.file_length, 0);
}

#[tokio::test]
async fn one_connection_serves_many_requests_in_order() {
    let node = TestNode::start().await;
    let mut conn = connect_authed(node.addr).await;

    let contents: Vec<Vec<u8>> = (0u8..5).map(|i| vec![i; 1000 + i as usize]).collect();
    let mut fids = Vec::new();
    for content in &contents {
        let reply = upload(&mut conn, content).await;
        assert!(reply.is_success());
        fids.push(reply.attr(attrs::FID).unwrap().to_string());
    }

    for (fid, content) in fids.iter().zip(&contents) {
        let (reply, body) = download(&mut conn, fid, 0, -1).await;
        assert!(reply.is_success());
        assert_eq!(&body, content);
    }

    // Binlog order is commit order.
    let logged: Vec<String> = node
        .binlog_records()
        .await
        .into_iter()
        .map(|r| r.fid)
        .collect();
    assert_eq!(logged, fids);
}
