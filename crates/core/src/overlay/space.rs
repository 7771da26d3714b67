//! The circular identifier space of the overlay.
//!
//! All overlay routing is expressed in terms of a `B` bit ring: signed delta
//! and absolute distance between two ids, the common prefix plus next digit
//! extraction feeding the routing rows, and the resolution of textual node
//! names into ring positions.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigInt;
use num_bigint::BigUint;
use serde::Deserialize;
use serde::Serialize;

use crate::config::Config;
use crate::config::Resolver;
use crate::error::Error;
use crate::error::Result;

/// A non negative integer naming a node or a routable entity on the ring.
///
/// Plain ids live in `[0, 2^B)`; compound topic member ids used by the
/// heartbeat service extend beyond `2^B` and are split back by
/// [Space::split_member].
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(BigUint);

impl Id {
    /// Interpret a big endian byte slice as an id.
    pub fn from_bytes_be(raw: &[u8]) -> Self {
        Id(BigUint::from_bytes_be(raw))
    }

    /// The underlying unsigned integer.
    pub fn as_uint(&self) -> &BigUint {
        &self.0
    }
}

impl From<BigUint> for Id {
    fn from(v: BigUint) -> Self {
        Id(v)
    }
}

impl From<u64> for Id {
    fn from(v: u64) -> Self {
        Id(BigUint::from(v))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = &self.0;
        write!(f, "0x{inner:x}")
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        BigUint::parse_bytes(digits.as_bytes(), 16)
            .map(Id)
            .ok_or_else(|| Error::MalformedId(s.to_string()))
    }
}

/// Arithmetic over one configured identifier space.
///
/// The space is constructed from a [Config] and carries the derived ring
/// constants, so overlays with different widths can coexist in a process.
#[derive(Clone, Debug)]
pub struct Space {
    bits: usize,
    base: usize,
    digits: usize,
    resolver: Resolver,
    modulo: BigUint,
    posmid: BigUint,
}

impl Space {
    /// Derive the ring constants for the configured width and digit base.
    pub fn new(config: &Config) -> Result<Self> {
        if config.base == 0 || config.space % config.base != 0 {
            return Err(Error::UnevenSpace {
                space: config.space,
                base: config.base,
            });
        }
        let modulo = BigUint::from(1u8) << config.space;
        let posmid = &modulo >> 1;
        Ok(Self {
            bits: config.space,
            base: config.base,
            digits: config.space / config.base,
            resolver: config.resolver,
            modulo,
            posmid,
        })
    }

    /// Bit width `B` of the space.
    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Bits `b` per routing digit.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Digits `D = B/b` per id.
    pub fn digits(&self) -> usize {
        self.digits
    }

    /// Number of values a single digit can take.
    pub fn columns(&self) -> usize {
        1 << self.base
    }

    /// Whether a plain id fits the ring.
    pub fn contains(&self, id: &Id) -> bool {
        id.0 < self.modulo
    }

    /// Signed distance from `a` to `b` on the ring, folded into
    /// `(-2^(B-1), 2^(B-1)]`. The antipodal tie resolves to the positive
    /// branch on both orientations, keeping the ordering deterministic.
    pub fn delta(&self, a: &Id, b: &Id) -> BigInt {
        let posmid = BigInt::from(self.posmid.clone());
        let modulo = BigInt::from(self.modulo.clone());

        let mut d = BigInt::from(b.0.clone()) - BigInt::from(a.0.clone());
        if d > posmid {
            d -= &modulo;
        } else if d < -posmid.clone() {
            d += &modulo;
        }
        if d == -posmid.clone() {
            d = posmid;
        }
        d
    }

    /// Absolute distance between two ids on the ring.
    pub fn distance(&self, a: &Id, b: &Id) -> BigUint {
        self.delta(a, b).magnitude().clone()
    }

    /// Length of the common digit prefix of two ids, and the first differing
    /// digit of `b`. Self comparison yields `(D, 0)`, which callers must
    /// treat as a don't care.
    pub fn prefix(&self, a: &Id, b: &Id) -> (usize, usize) {
        if a == b {
            return (self.digits, 0);
        }
        let mut p = 0;
        for bit in (0..self.bits).rev() {
            if a.0.bit(bit as u64) != b.0.bit(bit as u64) {
                p = (self.bits - 1 - bit) / self.base;
                break;
            }
        }
        let mut d = 0;
        for bit in 0..self.base {
            let pos = self.bits - (p + 1) * self.base + bit;
            if b.0.bit(pos as u64) {
                d |= 1 << bit;
            }
        }
        (p, d)
    }

    /// Hash a textual name into a ring position with the configured digest:
    /// the first `ceil(B/8)` bytes, top overflow bits cleared, big endian.
    pub fn resolve(&self, name: &str) -> Id {
        let bytes = (self.bits + 7) / 8;
        let mut sum = self.resolver.digest(name.as_bytes());
        while sum.len() < bytes {
            // Digest narrower than the space, stretch by chaining.
            let ext = self.resolver.digest(&sum);
            sum.extend_from_slice(&ext);
        }
        let mut raw = sum[..bytes].to_vec();
        for i in 0..(raw.len() * 8 - self.bits) {
            raw[0] &= !(1u8 << (7 - i));
        }
        Id(BigUint::from_bytes_be(&raw))
    }

    /// Sort ids into a consistent clockwise order around `origin`.
    pub fn sort_by_delta(&self, origin: &Id, ids: &mut [Id]) {
        ids.sort_by(|x, y| self.delta(origin, x).cmp(&self.delta(origin, y)));
    }

    /// Compound id for a node within a topic: `(topic << B) + node`. Topic
    /// and overlay member ids share the heartbeat service without collision
    /// as long as `topic >= 1`.
    pub fn member_id(&self, topic: &Id, node: &Id) -> Id {
        Id((topic.0.clone() << self.bits) + &node.0)
    }

    /// Split a compound id back into its `(topic, node)` parts. Plain
    /// overlay ids come back with a zero topic.
    pub fn split_member(&self, id: &Id) -> (Id, Id) {
        let topic = &id.0 >> self.bits;
        let node = &id.0 - (topic.clone() << self.bits);
        (Id(topic), Id(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(bits: usize, base: usize) -> Space {
        Space::new(&Config {
            space: bits,
            base,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn uneven_space_rejected() {
        assert!(Space::new(&Config {
            space: 160,
            base: 3,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn delta_wraps_both_ways() {
        let s = space(8, 4);
        let a = Id::from(0x10u64);
        let b = Id::from(0xf0u64);

        // Counter clockwise is shorter than the linear difference.
        assert_eq!(s.delta(&a, &b), BigInt::from(-0x20));
        assert_eq!(s.delta(&b, &a), BigInt::from(0x20));
        assert_eq!(s.distance(&a, &b), BigUint::from(0x20u8));
        assert_eq!(s.distance(&b, &a), BigUint::from(0x20u8));
    }

    #[test]
    fn delta_antisymmetric_mod_ring() {
        let s = space(8, 4);
        let modulo = BigInt::from(256);
        for (x, y) in [(0u64, 17u64), (3, 250), (128, 129), (200, 100)] {
            let a = Id::from(x);
            let b = Id::from(y);
            let fwd = s.delta(&a, &b);
            let bwd = s.delta(&b, &a);
            assert_eq!(
                (fwd + bwd) % &modulo,
                BigInt::from(0),
                "delta not antisymmetric for {x}/{y}"
            );
        }
    }

    #[test]
    fn antipodal_tie_is_positive_both_ways() {
        let s = space(8, 4);
        let a = Id::from(0x00u64);
        let b = Id::from(0x80u64);
        assert_eq!(s.delta(&a, &b), BigInt::from(0x80));
        assert_eq!(s.delta(&b, &a), BigInt::from(0x80));
    }

    #[test]
    fn prefix_counts_digits() {
        let s = space(8, 4);
        let a = Id::from(0x12u64);

        assert_eq!(s.prefix(&a, &Id::from(0x82u64)), (0, 0x8));
        assert_eq!(s.prefix(&a, &Id::from(0x15u64)), (1, 0x5));
        assert_eq!(s.prefix(&a, &a), (2, 0));
    }

    #[test]
    fn prefix_bounds_hold() {
        let s = space(16, 4);
        for (x, y) in [(0u64, 1u64), (0xffff, 0xfffe), (0x1234, 0x1235), (7, 0xf000)] {
            let (p, d) = s.prefix(&Id::from(x), &Id::from(y));
            assert!(p < s.digits());
            assert!(d < s.columns());
        }
    }

    #[test]
    fn resolve_is_pure_and_bounded() {
        let s = space(160, 4);
        let a = s.resolve("node-a");
        assert_eq!(a, s.resolve("node-a"));
        assert_ne!(a, s.resolve("node-b"));
        assert!(s.contains(&a));
    }

    #[test]
    fn resolve_masks_overflow_bits() {
        // 12 bit space forces clearing the top nibble of the first byte.
        let s = space(12, 4);
        for name in ["a", "b", "c", "d", "e"] {
            assert!(s.contains(&s.resolve(name)), "{name} overflowed");
        }
    }

    #[test]
    fn sort_orders_clockwise() {
        let s = space(8, 4);
        let origin = Id::from(0xf0u64);
        let mut ids = vec![Id::from(0x70u64), Id::from(0x10u64), Id::from(0xe0u64)];
        s.sort_by_delta(&origin, &mut ids);
        // 0xe0 sits just behind the origin, 0x10 just past it, 0x70 opposite.
        assert_eq!(ids, vec![
            Id::from(0xe0u64),
            Id::from(0x10u64),
            Id::from(0x70u64)
        ]);
    }

    #[test]
    fn member_id_round_trips() {
        let s = space(8, 4);
        let topic = Id::from(3u64);
        let node = Id::from(0xabu64);
        let compound = s.member_id(&topic, &node);
        assert_eq!(s.split_member(&compound), (topic, node));
    }

    #[test]
    fn plain_id_splits_to_zero_topic() {
        let s = space(8, 4);
        let node = Id::from(0x42u64);
        assert_eq!(s.split_member(&node), (Id::from(0u64), node.clone()));
    }

    #[test]
    fn id_string_round_trips() {
        let id = Id::from(0xdeadbeefu64);
        assert_eq!(id.to_string().parse::<Id>().unwrap(), id);
    }
}
