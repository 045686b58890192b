//! End-to-end wire round trip against a hand-fed fake portmapper, covering
//! the real `CallHeader`/`ReplyHeader` codec path rather than a unit-level
//! pack/unpack check.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use nfs_rpc_client::auth::NoneAuth;
use nfs_rpc_client::net::tokio_impl::TokioConnector;
use nfs_rpc_client::portmapper;
use tokio::net::UdpSocket;

/// Reads one call record off `server`, replies `ACCEPT_SUCCESS` with
/// `body`, and echoes the call's xid.
async fn answer_once(server: &UdpSocket, body: &[u8]) {
    let mut buf = [0u8; 1024];
    let (n, from) = server.recv_from(&mut buf).await.unwrap();
    let mut cursor = std::io::Cursor::new(&buf[..n]);
    let xid = cursor.read_u32::<BigEndian>().unwrap();

    let mut reply = Vec::new();
    reply.write_u32::<BigEndian>(xid).unwrap();
    reply.write_u32::<BigEndian>(1).unwrap(); // MSG_REPLY
    reply.write_u32::<BigEndian>(0).unwrap(); // MSG_ACCEPTED
    reply.write_u32::<BigEndian>(0).unwrap(); // verf flavor AUTH_NONE
    reply.write_u32::<BigEndian>(0).unwrap(); // verf length
    reply.write_u32::<BigEndian>(0).unwrap(); // ACCEPT_SUCCESS
    reply.extend_from_slice(body);

    server.send_to(&reply, from).await.unwrap();
}

#[tokio::test]
async fn null_ping_round_trips_over_real_codec() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let connector = TokioConnector::default();
    let auth = NoneAuth;

    let server_task = tokio::spawn(async move {
        answer_once(&server, &[]).await;
    });

    portmapper::null(&connector, addr, &auth).await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn getport_parses_resolved_port_from_reply_body() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let connector = TokioConnector::default();
    let auth = NoneAuth;

    let server_task = tokio::spawn(async move {
        let mut body = Vec::new();
        body.write_u32::<BigEndian>(2049).unwrap();
        answer_once(&server, &body).await;
    });

    let port = portmapper::getport(
        &connector,
        addr,
        100_003,
        3,
        portmapper::IPPROTO_UDP,
        &auth,
    )
    .await
    .unwrap();
    assert_eq!(port, Some(2049));
    server_task.await.unwrap();
}

#[tokio::test]
async fn getport_none_when_server_reports_unregistered() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let connector = TokioConnector::default();
    let auth = NoneAuth;

    let server_task = tokio::spawn(async move {
        let mut body = Vec::new();
        body.write_u32::<BigEndian>(0).unwrap();
        answer_once(&server, &body).await;
    });

    let port = portmapper::getport(
        &connector,
        addr,
        100_003,
        3,
        portmapper::IPPROTO_UDP,
        &auth,
    )
    .await
    .unwrap();
    assert_eq!(port, None);
    server_task.await.unwrap();
}
