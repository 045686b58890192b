//! The RPC security layer boundary (§9 "Polymorphism").
//!
//! The transport core never interprets credentials or verifiers; it asks an
//! [`AuthProvider`] to build them, to check a reply's verifier, and (for
//! stateful flavors) to renew or tear down whatever context it holds. Three
//! concrete providers ship here: `AUTH_NONE`, `AUTH_SYS`, and a structural
//! `AUTH_GSS` stub that negotiates but never establishes a context, since
//! RPCSEC_GSS context establishment is an external collaborator (§1).

use crate::wire::{auth_flavor, OpaqueAuth};

/// One RPC authentication flavor's behavior.
pub trait AuthProvider: Send + Sync {
    /// The flavor id this provider speaks, used during MOUNT flavor
    /// negotiation (§6.1) and logged on `WRONGSEC` restarts.
    fn flavor(&self) -> u32;

    /// Builds the credential to attach to the next call.
    fn build_credential(&self) -> OpaqueAuth;

    /// Builds the verifier to attach to the next call. For `AUTH_SYS` this
    /// is always empty; GSS flavors would place a sequence-number MIC here.
    fn build_verifier(&self) -> OpaqueAuth {
        OpaqueAuth::none()
    }

    /// Validates the server's reply verifier. Returning `false` surfaces
    /// [`crate::error::Error::EAuth`] to the caller.
    fn verify_reply(&self, _verf: &OpaqueAuth) -> bool {
        true
    }

    /// Refreshes a stateful security context (GSS sequence window, ticket
    /// renewal). `AUTH_NONE`/`AUTH_SYS` are stateless and never need this.
    fn renew_context(&self) -> Result<(), AuthError> {
        Ok(())
    }

    /// Releases any resources held by the provider (GSS context deletion).
    fn destroy(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    ContextExpired,
    Unsupported,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContextExpired => write!(f, "security context expired"),
            Self::Unsupported => write!(f, "security flavor not supported"),
        }
    }
}

/// `AUTH_NONE` (§6.1): empty credential and verifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneAuth;

impl AuthProvider for NoneAuth {
    fn flavor(&self) -> u32 {
        auth_flavor::NONE
    }

    fn build_credential(&self) -> OpaqueAuth {
        OpaqueAuth::none()
    }
}

/// `AUTH_SYS` (historically `AUTH_UNIX`): a fixed machine name, uid/gid, and
/// supplementary group list packed as the credential body on every call.
#[derive(Debug, Clone)]
pub struct SysAuth {
    pub stamp: u32,
    pub machine_name: String,
    pub uid: u32,
    pub gid: u32,
    pub gids: Vec<u32>,
}

impl SysAuth {
    #[must_use]
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            stamp: 0,
            machine_name: String::new(),
            uid,
            gid,
            gids: Vec::new(),
        }
    }
}

impl AuthProvider for SysAuth {
    fn flavor(&self) -> u32 {
        auth_flavor::SYS
    }

    fn build_credential(&self) -> OpaqueAuth {
        let mut body = Vec::new();
        body.extend_from_slice(&self.stamp.to_be_bytes());
        pack_string(&mut body, &self.machine_name);
        body.extend_from_slice(&self.uid.to_be_bytes());
        body.extend_from_slice(&self.gid.to_be_bytes());
        body.extend_from_slice(&u32::try_from(self.gids.len()).unwrap_or(u32::MAX).to_be_bytes());
        for gid in &self.gids {
            body.extend_from_slice(&gid.to_be_bytes());
        }
        OpaqueAuth {
            flavor: auth_flavor::SYS,
            body,
        }
    }
}

fn pack_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.extend_from_slice(&u32::try_from(bytes.len()).unwrap_or(u32::MAX).to_be_bytes());
    out.extend_from_slice(bytes);
    let pad = (4 - (bytes.len() % 4)) % 4;
    out.extend(std::iter::repeat_n(0u8, pad));
}

/// Structural `AUTH_KRB5`/`AUTH_KRB5I`/`AUTH_KRB5P` stub. Participates in
/// flavor negotiation (so a server list containing a Kerberos flavor isn't
/// silently dropped) but refuses to actually issue calls, since establishing
/// a GSS context is out of scope for this crate (§1, §9).
#[derive(Debug, Clone, Copy)]
pub struct GssStub {
    pub flavor: u32,
}

impl AuthProvider for GssStub {
    fn flavor(&self) -> u32 {
        self.flavor
    }

    fn build_credential(&self) -> OpaqueAuth {
        OpaqueAuth {
            flavor: self.flavor,
            body: Vec::new(),
        }
    }

    fn renew_context(&self) -> Result<(), AuthError> {
        Err(AuthError::Unsupported)
    }
}

/// Picks the client's preferred flavor from the intersection of a client
/// preference list and a server-offered list (§6.1, §6.4
/// "default preference prefers SYS over NONE").
#[must_use]
pub fn negotiate_flavor(client_preference: &[u32], server_offered: &[u32]) -> Option<u32> {
    client_preference
        .iter()
        .find(|flavor| server_offered.contains(flavor))
        .copied()
}

/// The default client preference order: Kerberos privacy, Kerberos
/// integrity, Kerberos auth-only, `AUTH_SYS`, `AUTH_NONE`.
#[must_use]
pub const fn default_preference() -> [u32; 5] {
    [
        auth_flavor::KRB5P,
        auth_flavor::KRB5I,
        auth_flavor::KRB5,
        auth_flavor::SYS,
        auth_flavor::NONE,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_prefers_sys_over_none() {
        let server = [auth_flavor::NONE, auth_flavor::SYS];
        let chosen = negotiate_flavor(&default_preference(), &server);
        assert_eq!(chosen, Some(auth_flavor::SYS));
    }

    #[test]
    fn negotiate_falls_back_to_none() {
        let server = [auth_flavor::NONE];
        let chosen = negotiate_flavor(&default_preference(), &server);
        assert_eq!(chosen, Some(auth_flavor::NONE));
    }

    #[test]
    fn negotiate_none_in_common() {
        let server = [999_u32];
        assert_eq!(negotiate_flavor(&default_preference(), &server), None);
    }

    #[test]
    fn sys_auth_packs_gids() {
        let auth = SysAuth {
            stamp: 1,
            machine_name: "host".into(),
            uid: 100,
            gid: 200,
            gids: vec![1, 2],
        };
        let cred = auth.build_credential();
        assert_eq!(cred.flavor, auth_flavor::SYS);
        assert!(!cred.body.is_empty());
    }
}
