//! ONC-RPC v2 call/reply framing (RFC 1057 / RFC 5531) and the stream
//! record-marking header. Bit-exact per §6.1; all integers are big-endian.
//!
//! The transport core never needs to understand NFS procedure arguments or
//! results, so everything past the RPC envelope is treated as an opaque
//! byte payload: callers hand us an already-packed argument buffer and get
//! back an already-unpacked (but still opaque) reply buffer.

use std::io;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub const RPC_VERSION_2: u32 = 2;

pub const MSG_CALL: u32 = 0;
pub const MSG_REPLY: u32 = 1;

pub const MSG_ACCEPTED: u32 = 0;
pub const MSG_DENIED: u32 = 1;

pub const ACCEPT_SUCCESS: u32 = 0;
pub const ACCEPT_PROG_UNAVAIL: u32 = 1;
pub const ACCEPT_PROG_MISMATCH: u32 = 2;
pub const ACCEPT_PROC_UNAVAIL: u32 = 3;
pub const ACCEPT_GARBAGE_ARGS: u32 = 4;
pub const ACCEPT_SYSTEM_ERR: u32 = 5;

pub const REJECT_RPC_MISMATCH: u32 = 0;
pub const REJECT_AUTH_ERROR: u32 = 1;

/// Authentication flavors (§6.1). Only `NONE`/`SYS` are spoken on the wire
/// by this crate's built-in [`crate::auth`] providers; the GSS flavors are
/// recognized for negotiation bookkeeping (see [`crate::search`]) but their
/// context establishment is an external collaborator.
pub mod auth_flavor {
    pub const NONE: u32 = 0;
    pub const SYS: u32 = 1;
    pub const KRB5: u32 = 390_003;
    pub const KRB5I: u32 = 390_004;
    pub const KRB5P: u32 = 390_005;
}

/// An opaque, length-prefixed credential or verifier blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpaqueAuth {
    pub flavor: u32,
    pub body: Vec<u8>,
}

impl OpaqueAuth {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            flavor: auth_flavor::NONE,
            body: Vec::new(),
        }
    }

    fn pack(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u32::<BigEndian>(self.flavor)?;
        pack_opaque(out, &self.body)
    }

    fn unpack(input: &mut impl io::Read) -> io::Result<Self> {
        let flavor = input.read_u32::<BigEndian>()?;
        let body = unpack_opaque(input)?;
        Ok(Self { flavor, body })
    }
}

fn pack_opaque(out: &mut Vec<u8>, body: &[u8]) -> io::Result<()> {
    out.write_u32::<BigEndian>(
        u32::try_from(body.len()).map_err(|_| io::Error::other("opaque body too large"))?,
    )?;
    out.extend_from_slice(body);
    let pad = pad_len(body.len());
    out.extend(std::iter::repeat_n(0u8, pad));
    Ok(())
}

fn unpack_opaque(input: &mut impl io::Read) -> io::Result<Vec<u8>> {
    let len = input.read_u32::<BigEndian>()? as usize;
    let mut body = vec![0u8; len];
    input.read_exact(&mut body)?;
    let mut pad = [0u8; 3];
    let pad_len = pad_len(len);
    input.read_exact(&mut pad[..pad_len])?;
    Ok(body)
}

const fn pad_len(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// The RPC call header, not including `rpcvers` (fixed at
/// [`RPC_VERSION_2`]) framing of the arguments that follow it.
#[derive(Debug, Clone)]
pub struct CallHeader {
    pub xid: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
}

impl CallHeader {
    pub fn pack(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u32::<BigEndian>(self.xid)?;
        out.write_u32::<BigEndian>(MSG_CALL)?;
        out.write_u32::<BigEndian>(RPC_VERSION_2)?;
        out.write_u32::<BigEndian>(self.prog)?;
        out.write_u32::<BigEndian>(self.vers)?;
        out.write_u32::<BigEndian>(self.proc)?;
        self.cred.pack(out)?;
        self.verf.pack(out)?;
        Ok(())
    }
}

/// The accepted/rejected status of one RPC reply, with the small bit of
/// data each status variant carries.
#[derive(Debug, Clone)]
pub enum ReplyStatus {
    Accepted { verf: OpaqueAuth, data: AcceptData },
    Denied(DeniedData),
}

#[derive(Debug, Clone)]
pub enum AcceptData {
    Success,
    ProgUnavail,
    ProgMismatch { low: u32, high: u32 },
    ProcUnavail,
    GarbageArgs,
    SystemErr,
}

#[derive(Debug, Clone)]
pub enum DeniedData {
    RpcMismatch { low: u32, high: u32 },
    AuthError(u32),
}

/// A fully parsed RPC reply header. `body_offset` is the number of bytes of
/// `buf` consumed by the header; whatever remains (only meaningful for
/// `Accepted { data: Success, .. }`) is the opaque procedure result.
#[derive(Debug, Clone)]
pub struct ReplyHeader {
    pub xid: u32,
    pub status: ReplyStatus,
}

impl ReplyHeader {
    /// Parses the leading `(xid, msg_type)` pair without committing to a
    /// full reply parse; used by [`crate::registry`] to reject non-`REPLY`
    /// messages cheaply before taking the registry lock.
    pub fn peek_xid_and_type(buf: &[u8]) -> io::Result<(u32, u32)> {
        let mut cursor = io::Cursor::new(buf);
        let xid = cursor.read_u32::<BigEndian>()?;
        let msg_type = cursor.read_u32::<BigEndian>()?;
        Ok((xid, msg_type))
    }

    pub fn unpack(input: &mut impl io::Read) -> io::Result<Self> {
        let xid = input.read_u32::<BigEndian>()?;
        let msg_type = input.read_u32::<BigEndian>()?;
        if msg_type != MSG_REPLY {
            return Err(io::Error::other("expected a REPLY message"));
        }
        let reply_stat = input.read_u32::<BigEndian>()?;
        let status = match reply_stat {
            MSG_ACCEPTED => {
                let verf = OpaqueAuth::unpack(input)?;
                let accept_stat = input.read_u32::<BigEndian>()?;
                let data = match accept_stat {
                    ACCEPT_SUCCESS => AcceptData::Success,
                    ACCEPT_PROG_UNAVAIL => AcceptData::ProgUnavail,
                    ACCEPT_PROG_MISMATCH => {
                        let low = input.read_u32::<BigEndian>()?;
                        let high = input.read_u32::<BigEndian>()?;
                        AcceptData::ProgMismatch { low, high }
                    }
                    ACCEPT_PROC_UNAVAIL => AcceptData::ProcUnavail,
                    ACCEPT_GARBAGE_ARGS => AcceptData::GarbageArgs,
                    ACCEPT_SYSTEM_ERR => AcceptData::SystemErr,
                    other => {
                        return Err(io::Error::other(format!("unknown accept_stat {other}")));
                    }
                };
                ReplyStatus::Accepted { verf, data }
            }
            MSG_DENIED => {
                let reject_stat = input.read_u32::<BigEndian>()?;
                let data = match reject_stat {
                    REJECT_RPC_MISMATCH => {
                        let low = input.read_u32::<BigEndian>()?;
                        let high = input.read_u32::<BigEndian>()?;
                        DeniedData::RpcMismatch { low, high }
                    }
                    REJECT_AUTH_ERROR => {
                        let stat = input.read_u32::<BigEndian>()?;
                        DeniedData::AuthError(stat)
                    }
                    other => {
                        return Err(io::Error::other(format!("unknown reject_stat {other}")));
                    }
                };
                ReplyStatus::Denied(data)
            }
            other => return Err(io::Error::other(format!("unknown reply_stat {other}"))),
        };
        Ok(Self { xid, status })
    }
}

/// The 4-byte record-mark fragment header used on STREAM transports
/// (§6.1): top bit is the last-fragment flag, low 31 bits are the fragment
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader(u32);

impl FragmentHeader {
    #[must_use]
    pub const fn new(fragment_len: u32, last: bool) -> Self {
        let top = if last { 0x8000_0000 } else { 0 };
        Self(top | (fragment_len & 0x7fff_ffff))
    }

    #[must_use]
    pub const fn is_last(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    #[must_use]
    pub const fn fragment_len(self) -> u32 {
        self.0 & 0x7fff_ffff
    }

    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

/// Serializes a full call message (header + already-packed opaque
/// arguments) with its leading stream record mark, matching the framing
/// [`crate::mount::Mount::call`] sends over the wire.
pub fn pack_call_record(header: &CallHeader, args: &[u8]) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(64 + args.len());
    header.pack(&mut body)?;
    body.extend_from_slice(args);
    let frag = FragmentHeader::new(
        u32::try_from(body.len()).map_err(|_| io::Error::other("message too large"))?,
        true,
    );
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&frag.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_header_roundtrips() {
        let h = FragmentHeader::new(0x0000_0008, true);
        assert!(h.is_last());
        assert_eq!(h.fragment_len(), 8);
        assert_eq!(h, FragmentHeader::from_be_bytes(h.to_be_bytes()));
        assert_eq!(h.to_be_bytes(), [0x80, 0x00, 0x00, 0x08]);
    }

    #[test]
    fn opaque_auth_roundtrip_with_padding() {
        let auth = OpaqueAuth {
            flavor: auth_flavor::SYS,
            body: vec![1, 2, 3, 4, 5],
        };
        let mut buf = Vec::new();
        auth.pack(&mut buf).unwrap();
        // 4 (flavor) + 4 (len) + 5 (body) + 3 (pad) = 16
        assert_eq!(buf.len(), 16);
        let mut cursor = io::Cursor::new(buf);
        let parsed = OpaqueAuth::unpack(&mut cursor).unwrap();
        assert_eq!(parsed, auth);
    }

    #[test]
    fn reply_header_parses_prog_mismatch() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(42).unwrap();
        buf.write_u32::<BigEndian>(MSG_REPLY).unwrap();
        buf.write_u32::<BigEndian>(MSG_ACCEPTED).unwrap();
        OpaqueAuth::none().pack(&mut buf).unwrap();
        buf.write_u32::<BigEndian>(ACCEPT_PROG_MISMATCH).unwrap();
        buf.write_u32::<BigEndian>(2).unwrap();
        buf.write_u32::<BigEndian>(3).unwrap();

        let mut cursor = io::Cursor::new(buf);
        let reply = ReplyHeader::unpack(&mut cursor).unwrap();
        assert_eq!(reply.xid, 42);
        assert!(matches!(
            reply.status,
            ReplyStatus::Accepted {
                data: AcceptData::ProgMismatch { low: 2, high: 3 },
                ..
            }
        ));
    }

    #[test]
    fn peek_xid_and_type_does_not_consume_rest() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(7).unwrap();
        buf.write_u32::<BigEndian>(MSG_REPLY).unwrap();
        let (xid, ty) = ReplyHeader::peek_xid_and_type(&buf).unwrap();
        assert_eq!(xid, 7);
        assert_eq!(ty, MSG_REPLY);
    }
}
