//! XID generation. The core keeps a 64-bit counter internally (so wraparound
//! is astronomically rare within one process lifetime) of which the low 32
//! bits are what actually goes on the wire (§3, GLOSSARY).

use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;

/// The process-wide generator every mount draws XIDs from (§3 GLOSSARY:
/// XIDs are unique across the whole process, not per mount).
pub static XID: Lazy<XidGenerator> = Lazy::new(XidGenerator::new);

/// A process-wide XID generator, seeded randomly so two clients started at
/// the same instant don't collide on the first request.
pub struct XidGenerator {
    counter: AtomicU64,
}

impl XidGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(u64::from(rand::random::<u32>())),
        }
    }

    /// Returns the next XID's wire-visible 32 bits.
    pub fn next_xid32(&self) -> u32 {
        let v = self.counter.fetch_add(1, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        {
            v as u32
        }
    }
}

impl Default for XidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_xids_differ() {
        let gen = XidGenerator::new();
        let a = gen.next_xid32();
        let b = gen.next_xid32();
        assert_ne!(a, b);
        assert_eq!(b.wrapping_sub(a), 1);
    }
}
