use std::env;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use nfs_rpc_client::auth::{negotiate_flavor, NoneAuth, SysAuth};
use nfs_rpc_client::config::MountConfig;
use nfs_rpc_client::net::tokio_impl::TokioConnector;
use nfs_rpc_client::search::TransportPolicy;
use nfs_rpc_client::{mountproto, portmapper, Mount, ProcClass};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = env::args().collect::<Vec<_>>();
    if args.len() < 3 {
        eprintln!("Usage: mount <server_ip> <export_path> [portmapper_port]");
        return Ok(());
    }
    let host = args[1].clone();
    let export_path = args[2].clone();
    let portmapper_port = args
        .get(3)
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(portmapper::PMAP_PORT);

    tracing_subscriber::fmt::init();

    let pmap_addr = format!("{host}:{portmapper_port}")
        .to_socket_addrs()?
        .next()
        .ok_or("could not resolve portmapper address")?;

    let connector = Arc::new(TokioConnector::default());
    let none_auth = NoneAuth;

    let mount_port = portmapper::getport(
        connector.as_ref(),
        pmap_addr,
        mountproto::MOUNT_PROG,
        mountproto::MOUNT_VERS_V3,
        portmapper::IPPROTO_TCP,
        &none_auth,
    )
    .await?
    .ok_or("MOUNT program not registered with portmapper")?;
    let mount_addr = std::net::SocketAddr::new(pmap_addr.ip(), mount_port);

    let mnt = mountproto::mount(
        connector.as_ref(),
        mount_addr,
        &export_path,
        mountproto::MOUNT_VERS_V3,
        &none_auth,
    )
    .await?;
    println!(
        "mounted {export_path}: root fh is {} bytes, auth flavors {:?}",
        mnt.root_fh.len(),
        mnt.auth_flavors
    );

    let auth: Arc<dyn nfs_rpc_client::auth::AuthProvider> =
        match negotiate_flavor(&[nfs_rpc_client::wire::auth_flavor::SYS], &mnt.auth_flavors) {
            Some(_) => Arc::new(SysAuth::new(0, 0)),
            None => Arc::new(NoneAuth),
        };

    let nfs_port = portmapper::getport(
        connector.as_ref(),
        pmap_addr,
        100_003,
        3,
        portmapper::IPPROTO_TCP,
        &none_auth,
    )
    .await?
    .ok_or("NFS3 program not registered with portmapper")?;
    let nfs_addr = std::net::SocketAddr::new(pmap_addr.ip(), nfs_port);

    let (mount, vers) = Mount::connect(
        vec![nfs_addr],
        100_003,
        3,
        3,
        auth,
        MountConfig::default(),
        connector.clone(),
        TransportPolicy::StreamThenDgram,
    )
    .await?;

    println!("mount established, negotiated NFS version {vers}");
    mount.call(vers, 0, ProcClass::Default, &[]).await?;
    println!("NULL call succeeded");

    mountproto::unmount(
        connector.as_ref(),
        mount_addr,
        &export_path,
        mountproto::MOUNT_VERS_V3,
        &none_auth,
    )
    .await?;
    mount.shutdown();

    Ok(())
}
