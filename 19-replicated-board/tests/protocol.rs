//! Raw wire behaviour of a replica.

mod common;

use std::net::SocketAddr;

use anyhow::Result;
use common::TestCluster;
use replicated_board::protocol::{RequestKind, NOTHING};
use replicated_board::wire::{error_message, read_reply, write_frame, Frame};
use replicated_board::ConsistencyMode;
use tokio::net::TcpStream;

async fn send(addr: &str, frame: &Frame) -> Result<Vec<u8>> {
    let addr: SocketAddr = addr.parse()?;
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, frame).await?;
    Ok(read_reply(&mut stream, 1 << 20).await?)
}

#[tokio::test]
async fn unknown_request_type_gets_an_error_and_the_node_keeps_serving() -> Result<()> {
    let cluster = TestCluster::spawn(2, ConsistencyMode::Sequential).await?;

    for code in [2u64, 4, 5, 77] {
        let reply = send(&cluster.addrs[0], &Frame::new(code, Vec::new())).await?;
        let message = error_message(&reply).expect("error reply");
        assert!(message.contains(&code.to_string()), "{message}");
    }

    let post = br#"{"id": null, "parent": 0, "title": "T", "content": "C", "user": "U"}"#;
    let frame = Frame::new(RequestKind::Post.code(), post.to_vec());
    let reply = send(&cluster.addrs[0], &frame).await?;
    assert_eq!(reply, b"ACK");

    cluster.shutdown().await
}

#[tokio::test]
async fn read_ignores_a_dummy_body() -> Result<()> {
    let cluster = TestCluster::spawn(1, ConsistencyMode::Quorum).await?;
    let dummy = br#"{"id": null, "parent": 0, "title": "dummy", "content": "dummy", "user": "x"}"#;
    let frame = Frame::new(RequestKind::Read.code(), dummy.to_vec());
    let reply = send(&cluster.addrs[0], &frame).await?;
    assert_eq!(reply, NOTHING);
    cluster.shutdown().await
}

#[tokio::test]
async fn replica_only_requests_answer_directly() -> Result<()> {
    let cluster = TestCluster::spawn(2, ConsistencyMode::Sequential).await?;
    cluster.client(0).post(&common::article("ana", "x")).await?;

    // r_READ at a follower returns its own (empty) store, never forwarding.
    let frame = Frame::new(RequestKind::ReadData.code(), Vec::new());
    let reply = send(&cluster.addrs[1], &frame).await?;
    assert_eq!(reply, b"{}");

    // r_GET_ID at a follower is forwarded to the coordinator.
    let frame = Frame::new(RequestKind::GetId.code(), Vec::new());
    let reply = send(&cluster.addrs[1], &frame).await?;
    assert_eq!(reply, 2u64.to_be_bytes());

    cluster.shutdown().await
}
