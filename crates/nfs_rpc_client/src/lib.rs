#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod auth;
pub mod config;
pub(crate) mod cwnd;
pub mod error;
pub mod net;
pub(crate) mod record;
pub mod rto;
pub mod wire;
pub(crate) mod xid;

#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
pub(crate) mod mount;
#[cfg(feature = "tokio")]
pub mod mountproto;
#[cfg(feature = "tokio")]
pub mod portmapper;
#[cfg(feature = "tokio")]
pub(crate) mod recv;
#[cfg(feature = "tokio")]
pub mod registry;
#[cfg(feature = "tokio")]
pub mod search;
#[cfg(feature = "tokio")]
pub(crate) mod send;
#[cfg(feature = "tokio")]
pub(crate) mod socket;
#[cfg(feature = "tokio")]
pub mod state;
#[cfg(feature = "tokio")]
pub(crate) mod timer;

#[cfg(feature = "tokio")]
pub use mount::Mount;
pub use wire::auth_flavor;

pub use error::Error;
pub use rto::ProcClass;
