//! Connect search against a server that never answers `NULL`: covers the
//! §4.2 "exhausted all candidates" path, not just the happy path already
//! exercised indirectly through the portmapper round-trip tests.

use std::sync::Arc;
use std::time::Duration;

use nfs_rpc_client::auth::NoneAuth;
use nfs_rpc_client::config::MountConfig;
use nfs_rpc_client::net::tokio_impl::TokioConnector;
use nfs_rpc_client::search::{connect_search, TransportPolicy};
use nfs_rpc_client::state::MountState;

#[tokio::test]
async fn connect_search_fails_fast_against_closed_tcp_port() {
    // Bind then immediately drop so the port is provably unused but the
    // OS won't hand it back out from under us before the search runs.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let connector = TokioConnector::default();
    let auth = NoneAuth;
    let state = MountState::new(MountConfig::default(), Arc::new(NoneAuth), vec![addr]);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        connect_search(&connector, &state, 100_003, 3, 3, &auth, TransportPolicy::StreamOnly),
    )
    .await
    .expect("connect search must not hang against a closed port");

    assert!(result.is_err(), "nothing is listening, the search must fail");
}

#[tokio::test]
async fn connect_search_succeeds_once_a_candidate_answers_null() {
    let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    tokio::spawn(async move {
        use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
        let mut buf = [0u8; 1024];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        let xid = std::io::Cursor::new(&buf[..n]).read_u32::<BigEndian>().unwrap();

        let mut reply = Vec::new();
        reply.write_u32::<BigEndian>(xid).unwrap();
        reply.write_u32::<BigEndian>(1).unwrap();
        reply.write_u32::<BigEndian>(0).unwrap();
        reply.write_u32::<BigEndian>(0).unwrap();
        reply.write_u32::<BigEndian>(0).unwrap();
        reply.write_u32::<BigEndian>(0).unwrap();
        server.send_to(&reply, from).await.unwrap();
    });

    let connector = TokioConnector::default();
    let auth = NoneAuth;
    let state = MountState::new(MountConfig::default(), Arc::new(NoneAuth), vec![addr]);

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        connect_search(&connector, &state, 100_003, 3, 3, &auth, TransportPolicy::DgramOnly),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(outcome.negotiated_vers, 3);
}
