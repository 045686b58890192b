//! MOUNT protocol client (§4.2 "warm connect"): obtains the root file
//! handle used to bootstrap an NFS mount and, on teardown, tells the server
//! to drop its mount-table entry. Only `MNT`/`UMNT` are implemented; the
//! rest of the MOUNT program (`DUMP`/`EXPORT`) is out of scope.

use std::io;
use std::io::Read;
use std::net::SocketAddr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::auth::AuthProvider;
use crate::error::TransportError;
use crate::net::Connector;
use crate::search::{recv_one, send_all};
use crate::socket::{socket_create, socket_destroy};
use crate::wire::{self, AcceptData, CallHeader, ReplyHeader, ReplyStatus};
use crate::xid::XID;

pub const MOUNT_PROG: u32 = 100_005;
pub const MOUNT_VERS_V3: u32 = 3;

const MOUNTPROC_MNT: u32 = 1;
const MOUNTPROC_UMNT: u32 = 3;

const MNT_OK: u32 = 0;

/// The result of a successful `MNT` call: the root file handle (opaque to
/// this crate, as with every other procedure result) and the server's
/// chosen auth flavor list for the export.
#[derive(Debug, Clone)]
pub struct MountResult {
    pub root_fh: Vec<u8>,
    pub auth_flavors: Vec<u32>,
}

/// Issues `MNT` for `path` and returns the root file handle plus the
/// export's acceptable auth flavors (for [`crate::auth::negotiate_flavor`]).
pub async fn mount(
    connector: &dyn Connector,
    addr: SocketAddr,
    path: &str,
    vers: u32,
    auth: &dyn AuthProvider,
) -> Result<MountResult, TransportError> {
    let local: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let candidate = socket_create(connector, local, addr, false, crate::config::MountFlags::default())
        .await
        .map_err(TransportError::classify_io)?;

    let mut args = Vec::new();
    pack_path(&mut args, path);

    let header = CallHeader {
        xid: XID.next_xid32(),
        prog: MOUNT_PROG,
        vers,
        proc: MOUNTPROC_MNT,
        cred: auth.build_credential(),
        verf: auth.build_verifier(),
    };
    let record = wire::pack_call_record(&header, &args).map_err(TransportError::Other)?;

    let result = roundtrip(&candidate, header.xid, &record).await;
    socket_destroy(candidate);
    let body = result?;
    parse_mnt_reply(&body)
}

/// Issues `UMNT` for `path`; best-effort, the caller shouldn't treat a
/// failure here as fatal to the unmount itself (§6.4 `callumnt`).
pub async fn unmount(
    connector: &dyn Connector,
    addr: SocketAddr,
    path: &str,
    vers: u32,
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

    let mut args = Vec::new();
    pack_path(&mut args, path);

    let header = CallHeader {
        xid: XID.next_xid32(),
        prog: MOUNT_PROG,
        vers,
        proc: MOUNTPROC_UMNT,
        cred: auth.build_credential(),
        verf: auth.build_verifier(),
    };
    let record = wire::pack_call_record(&header, &args).map_err(TransportError::Other)?;
    let result = roundtrip(&candidate, header.xid, &record).await;
    socket_destroy(candidate);
    result.map(|_| ())
}

fn pack_path(out: &mut Vec<u8>, path: &str) {
    let bytes = path.as_bytes();
    out.write_u32::<BigEndian>(u32::try_from(bytes.len()).unwrap_or(u32::MAX)).unwrap();
    out.extend_from_slice(bytes);
    let pad = (4 - (bytes.len() % 4)) % 4;
    out.extend(std::iter::repeat_n(0u8, pad));
}

async fn roundtrip(
    candidate: &crate::socket::CandidateSocket,
    xid: u32,
    record: &[u8],
) -> Result<Vec<u8>, TransportError> {
    send_all(candidate, record).await.map_err(TransportError::classify_io)?;
    let reply = recv_one(candidate).await.map_err(TransportError::classify_io)?;
    let mut cursor = io::Cursor::new(reply);
    let header = ReplyHeader::unpack(&mut cursor).map_err(|e| TransportError::BadRpc(e.to_string()))?;
    if header.xid != xid {
        return Err(TransportError::BadRpc("xid mismatch on MOUNT reply".into()));
    }
    match header.status {
        ReplyStatus::Accepted {
            data: AcceptData::Success,
            ..
        } => {
            let pos = usize::try_from(cursor.position()).unwrap_or(0);
            Ok(cursor.into_inner()[pos..].to_vec())
        }
        other => Err(TransportError::BadRpc(format!("MOUNT call rejected: {other:?}"))),
    }
}

fn parse_mnt_reply(body: &[u8]) -> Result<MountResult, TransportError> {
    let mut cursor = io::Cursor::new(body);
    let status = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| TransportError::BadRpc(e.to_string()))?;
    if status != MNT_OK {
        return Err(TransportError::BadRpc(format!("MNT denied export, status {status}")));
    }
    let fh_len = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| TransportError::BadRpc(e.to_string()))? as usize;
    let mut root_fh = vec![0u8; fh_len];
    cursor
        .read_exact(&mut root_fh)
        .map_err(|e| TransportError::BadRpc(e.to_string()))?;
    let pad = (4 - (fh_len % 4)) % 4;
    let mut discard = [0u8; 3];
    cursor
        .read_exact(&mut discard[..pad])
        .map_err(|e| TransportError::BadRpc(e.to_string()))?;

    let count = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| TransportError::BadRpc(e.to_string()))? as usize;
    let mut auth_flavors = Vec::with_capacity(count);
    for _ in 0..count {
        auth_flavors.push(
            cursor
                .read_u32::<BigEndian>()
                .map_err(|e| TransportError::BadRpc(e.to_string()))?,
        );
    }

    Ok(MountResult { root_fh, auth_flavors })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mnt_reply_roundtrip() {
        let mut body = Vec::new();
        body.write_u32::<BigEndian>(MNT_OK).unwrap();
        body.write_u32::<BigEndian>(4).unwrap();
        body.extend_from_slice(&[1, 2, 3, 4]);
        body.write_u32::<BigEndian>(1).unwrap();
        body.write_u32::<BigEndian>(crate::wire::auth_flavor::SYS).unwrap();

        let parsed = parse_mnt_reply(&body).unwrap();
        assert_eq!(parsed.root_fh, vec![1, 2, 3, 4]);
        assert_eq!(parsed.auth_flavors, vec![crate::wire::auth_flavor::SYS]);
    }

    #[test]
    fn parse_mnt_reply_rejects_nonzero_status() {
        let mut body = Vec::new();
        body.write_u32::<BigEndian>(2).unwrap();
        assert!(parse_mnt_reply(&body).is_err());
    }
}
