//! Portmapper/rpcbind client (§4.2 "warm connect"): resolves a program's
//! port before the main connect search runs, grounded on
//! `nfs3_client::portmapper::PortmapperClient`, rewritten against this
//! crate's own wire codec instead of the vendored XDR derive framework.

use std::io;
use std::net::SocketAddr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::auth::AuthProvider;
use crate::error::TransportError;
use crate::net::Connector;
use crate::search::{recv_one, send_all};
use crate::socket::{socket_create, socket_destroy};
use crate::wire::{self, AcceptData, CallHeader, ReplyHeader, ReplyStatus};
use crate::xid::XID;

pub const PMAP_PROG: u32 = 100_000;
pub const PMAP_VERS: u32 = 2;
pub const PMAP_PORT: u16 = 111;

const PMAPPROC_NULL: u32 = 0;
const PMAPPROC_GETPORT: u32 = 3;

pub const IPPROTO_TCP: u32 = 6;
pub const IPPROTO_UDP: u32 = 17;

/// Asks the portmapper at `addr` which port `prog`/`vers` over `proto`
/// (`IPPROTO_TCP`/`IPPROTO_UDP`) is listening on. Returns `None` if the
/// program isn't registered (port `0`), matching rpcbind's own convention.
pub async fn getport(
    connector: &dyn Connector,
    addr: SocketAddr,
    prog: u32,
    vers: u32,
    proto: u32,
    auth: &dyn AuthProvider,
) -> Result<Option<u16>, TransportError> {
    let local: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let candidate = socket_create(connector, local, addr, false, crate::config::MountFlags::default())
        .await
        .map_err(TransportError::classify_io)?;

    let mut args = Vec::with_capacity(16);
    args.write_u32::<BigEndian>(prog).unwrap();
    args.write_u32::<BigEndian>(vers).unwrap();
    args.write_u32::<BigEndian>(proto).unwrap();
    args.write_u32::<BigEndian>(0).unwrap(); // port, unused on lookup

    let header = CallHeader {
        xid: XID.next_xid32(),
        prog: PMAP_PROG,
        vers: PMAP_VERS,
        proc: PMAPPROC_GETPORT,
        cred: auth.build_credential(),
        verf: auth.build_verifier(),
    };
    let record = wire::pack_call_record(&header, &args).map_err(TransportError::Other)?;

    let result = pmap_roundtrip(&candidate, header.xid, &record).await;
    socket_destroy(candidate);
    let port = result?;
    Ok((port != 0).then_some(port))
}

/// Pings the portmapper's `NULL` procedure, used to confirm a candidate
/// address actually runs a portmapper before spending a `GETPORT` round
/// trip on it.
pub async fn null(
    connector: &dyn Connector,
    addr: SocketAddr,
    auth: &dyn AuthProvider,
) -> Result<(), TransportError> {
    let local: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let candidate = socket_create(connector, local, addr, false, crate::config::MountFlags::default())
        .await
        .map_err(TransportError::classify_io)?;

    let header = CallHeader {
        xid: XID.next_xid32(),
        prog: PMAP_PROG,
        vers: PMAP_VERS,
        proc: PMAPPROC_NULL,
        cred: auth.build_credential(),
        verf: auth.build_verifier(),
    };
    let record = wire::pack_call_record(&header, &[]).map_err(TransportError::Other)?;
    let result = pmap_roundtrip(&candidate, header.xid, &record).await;
    socket_destroy(candidate);
    result.map(|_| ())
}

async fn pmap_roundtrip(
    candidate: &crate::socket::CandidateSocket,
    xid: u32,
    record: &[u8],
) -> Result<u16, TransportError> {
    send_all(candidate, record)
        .await
        .map_err(TransportError::classify_io)?;
    let reply = recv_one(candidate).await.map_err(TransportError::classify_io)?;
    let mut cursor = io::Cursor::new(reply);
    let header = ReplyHeader::unpack(&mut cursor).map_err(|e| TransportError::BadRpc(e.to_string()))?;
    if header.xid != xid {
        return Err(TransportError::BadRpc("xid mismatch on portmapper reply".into()));
    }
    match header.status {
        ReplyStatus::Accepted {
            data: AcceptData::Success,
            ..
        } => {
            // GETPORT returns a u32, NULL returns nothing; NULL callers
            // ignore the Ok(0) this produces when the cursor is already
            // exhausted.
            Ok(u16::try_from(cursor.read_u32::<BigEndian>().unwrap_or(0)).unwrap_or(0))
        }
        other => Err(TransportError::BadRpc(format!("portmapper call rejected: {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getport_args_are_16_bytes() {
        let mut args = Vec::new();
        args.write_u32::<BigEndian>(100_003).unwrap();
        args.write_u32::<BigEndian>(3).unwrap();
        args.write_u32::<BigEndian>(IPPROTO_TCP).unwrap();
        args.write_u32::<BigEndian>(0).unwrap();
        assert_eq!(args.len(), 16);
    }
}
