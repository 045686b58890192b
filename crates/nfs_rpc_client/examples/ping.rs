use std::env;
use std::net::ToSocketAddrs;

use nfs_rpc_client::auth::NoneAuth;
use nfs_rpc_client::net::tokio_impl::TokioConnector;
use nfs_rpc_client::portmapper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = env::args().collect::<Vec<_>>();
    let host = match args.get(1) {
        Some(host) => host.as_str(),
        None => "127.0.0.1",
    };
    let port = match args.get(2) {
        Some(port) => port.parse::<u16>()?,
        None => portmapper::PMAP_PORT,
    };

    tracing_subscriber::fmt::init();

    let addr = format!("{host}:{port}")
        .to_socket_addrs()?
        .next()
        .ok_or("could not resolve address")?;

    let connector = TokioConnector::default();
    let auth = NoneAuth;

    portmapper::null(&connector, addr, &auth).await?;
    println!("portmapper on {addr} answered NULL");

    for (name, prog, vers) in [
        ("MOUNT3", portmapper::PMAP_PROG, portmapper::PMAP_VERS),
        ("NFS3", 100_003, 3),
    ] {
        match portmapper::getport(&connector, addr, prog, vers, portmapper::IPPROTO_TCP, &auth).await {
            Ok(Some(port)) => println!("{name} is listening on port {port}"),
            Ok(None) => println!("{name} is not registered"),
            Err(e) => eprintln!("failed to resolve {name}: {e}"),
        }
    }

    Ok(())
}
