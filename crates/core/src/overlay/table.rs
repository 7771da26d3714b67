//! Pastry routing state of a single node.
//!
//! The table holds the leaf set, the prefix routing rows and the
//! neighborhood set. It stores bare ids only; resolving an id to a live
//! peer happens in the overlay registry, under the overlay lock. The local
//! id itself is never stored.

use std::collections::BTreeSet;
use std::sync::Arc;

use itertools::Itertools;
use num_bigint::BigInt;
use num_bigint::BigUint;

use super::space::Id;
use super::space::Space;

/// Leaf set, routing rows and neighborhood set of the local node.
#[derive(Clone, Debug)]
pub struct RoutingTable {
    space: Arc<Space>,
    local: Id,
    leaf_half: usize,
    leaves: Vec<Id>,
    rows: Vec<Vec<Option<Id>>>,
    nearby: Vec<Id>,
}

impl RoutingTable {
    /// Create the empty routing state for `local`.
    pub fn new(space: Arc<Space>, local: Id, leaf_half: usize) -> Self {
        let rows = vec![vec![None; space.columns()]; space.digits()];
        Self {
            space,
            local,
            leaf_half,
            leaves: Vec::new(),
            rows,
            nearby: Vec::new(),
        }
    }

    /// Admit a node into every position it qualifies for. Returns whether
    /// the table changed.
    pub fn insert(&mut self, id: &Id) -> bool {
        if *id == self.local || !self.space.contains(id) {
            return false;
        }
        let mut changed = self.insert_leaf(id);

        let (p, d) = self.space.prefix(&self.local, id);
        if self.rows[p][d].is_none() {
            // No proximity metric, the first seen entry keeps the cell.
            self.rows[p][d] = Some(id.clone());
            changed = true;
        }

        if self.nearby.len() < 2 * self.leaf_half && !self.nearby.contains(id) {
            self.nearby.push(id.clone());
            changed = true;
        }
        changed
    }

    /// Clear every slot referencing `id`. Returns whether the table changed.
    pub fn remove(&mut self, id: &Id) -> bool {
        let mut changed = false;
        if let Some(pos) = self.leaves.iter().position(|l| l == id) {
            self.leaves.remove(pos);
            changed = true;
        }
        for row in self.rows.iter_mut() {
            for cell in row.iter_mut() {
                if cell.as_ref() == Some(id) {
                    *cell = None;
                    changed = true;
                }
            }
        }
        if let Some(pos) = self.nearby.iter().position(|n| n == id) {
            self.nearby.remove(pos);
            changed = true;
        }
        changed
    }

    /// Next hop toward `dest`, or `None` when the message is to be
    /// delivered locally. A remote is only ever returned when it is
    /// strictly closer to `dest` than the local node, so routing always
    /// makes progress and terminates.
    pub fn route(&self, dest: &Id) -> Option<Id> {
        if *dest == self.local {
            return None;
        }
        // Destination inside the leaf set span: closest of leaves and self.
        if self.leaf_span_covers(dest) {
            return self.closest_leaf(dest);
        }
        let (p, d) = self.space.prefix(&self.local, dest);
        let here = self.space.distance(&self.local, dest);

        // Exact routing cell for the next digit of the destination.
        if let Some(entry) = &self.rows[p][d] {
            if self.space.distance(entry, dest) < here {
                return Some(entry.clone());
            }
        }
        // Rare fallback: anything with an equal or better prefix that still
        // makes numeric progress.
        let mut best: Option<(usize, BigUint, Id)> = None;
        for cand in self.entries() {
            let (cp, _) = self.space.prefix(&cand, dest);
            if cp < p {
                continue;
            }
            let dist = self.space.distance(&cand, dest);
            if dist >= here {
                continue;
            }
            let better = match &best {
                None => true,
                Some((bp, bd, bid)) => {
                    cp > *bp || (cp == *bp && (dist < *bd || (dist == *bd && cand < *bid)))
                }
            };
            if better {
                best = Some((cp, dist, cand));
            }
        }
        best.map(|(_, _, id)| id)
    }

    /// Whether `id` occupies any slot of the table.
    pub fn contains(&self, id: &Id) -> bool {
        self.leaves.contains(id)
            || self.nearby.contains(id)
            || self
                .rows
                .iter()
                .any(|row| row.iter().any(|cell| cell.as_ref() == Some(id)))
    }

    /// The current leaf set, in clockwise order around the local id.
    pub fn leaves(&self) -> &[Id] {
        &self.leaves
    }

    /// The routing row at the given prefix level.
    pub fn row(&self, level: usize) -> &[Option<Id>] {
        &self.rows[level]
    }

    /// Every distinct id referenced anywhere in the table.
    pub fn entries(&self) -> Vec<Id> {
        let mut set: BTreeSet<Id> = self.leaves.iter().cloned().collect();
        set.extend(self.rows.iter().flatten().flatten().cloned());
        set.extend(self.nearby.iter().cloned());
        set.into_iter().collect()
    }

    /// Number of distinct nodes the table references.
    pub fn fill(&self) -> usize {
        self.entries().len()
    }

    fn insert_leaf(&mut self, id: &Id) -> bool {
        if self.leaves.contains(id) {
            return false;
        }
        let mut candidates = self.leaves.clone();
        candidates.push(id.clone());

        let (mut left, mut right): (Vec<Id>, Vec<Id>) = candidates
            .into_iter()
            .partition(|c| self.space.delta(&self.local, c) < BigInt::from(0));
        left.sort_by(|x, y| {
            self.space
                .delta(&self.local, y)
                .cmp(&self.space.delta(&self.local, x))
        });
        right.sort_by(|x, y| {
            self.space
                .delta(&self.local, x)
                .cmp(&self.space.delta(&self.local, y))
        });
        left.truncate(self.leaf_half);
        right.truncate(self.leaf_half);

        let mut leaves = left;
        leaves.extend(right);
        self.space.sort_by_delta(&self.local, &mut leaves);

        if leaves == self.leaves {
            return false;
        }
        self.leaves = leaves;
        true
    }

    fn leaf_span_covers(&self, dest: &Id) -> bool {
        let (Some(first), Some(last)) = (self.leaves.first(), self.leaves.last()) else {
            return false;
        };
        let lo = self.space.delta(&self.local, first).min(BigInt::from(0));
        let hi = self.space.delta(&self.local, last).max(BigInt::from(0));
        let dd = self.space.delta(&self.local, dest);
        lo <= dd && dd <= hi
    }

    fn closest_leaf(&self, dest: &Id) -> Option<Id> {
        let mut winner = None;
        let mut best = self.space.distance(&self.local, dest);
        for leaf in self
            .leaves
            .iter()
            .sorted_by(|x, y| x.cmp(y))
        {
            let dist = self.space.distance(leaf, dest);
            if dist < best {
                best = dist;
                winner = Some(leaf.clone());
            }
        }
        winner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn table(local: u64) -> RoutingTable {
        let space = Arc::new(
            Space::new(&Config {
                space: 8,
                base: 4,
                ..Default::default()
            })
            .unwrap(),
        );
        RoutingTable::new(space, Id::from(local), 2)
    }

    #[test]
    fn local_id_never_stored() {
        let mut t = table(0x10);
        assert!(!t.insert(&Id::from(0x10u64)));
        assert!(t.entries().is_empty());
    }

    #[test]
    fn insert_fills_leaf_and_row() {
        let mut t = table(0x10);
        assert!(t.insert(&Id::from(0x80u64)));

        assert_eq!(t.leaves(), &[Id::from(0x80u64)]);
        // 0x10 and 0x80 differ in their first digit.
        assert_eq!(t.row(0)[0x8], Some(Id::from(0x80u64)));
        assert!(t.contains(&Id::from(0x80u64)));
    }

    #[test]
    fn row_cells_keep_first_seen() {
        let mut t = table(0x10);
        t.insert(&Id::from(0x80u64));
        t.insert(&Id::from(0x85u64));
        assert_eq!(t.row(0)[0x8], Some(Id::from(0x80u64)));
    }

    #[test]
    fn row_prefix_invariant_holds() {
        let mut t = table(0x1f);
        for id in [0x12u64, 0x80, 0xfe, 0x13, 0x1c, 0x74] {
            t.insert(&Id::from(id));
        }
        let space = t.space.clone();
        let local = t.local.clone();
        for (level, row) in t.rows.iter().enumerate() {
            for (digit, cell) in row.iter().enumerate() {
                let Some(entry) = cell else { continue };
                assert_eq!(space.prefix(&local, entry), (level, digit));
            }
        }
    }

    #[test]
    fn leaf_set_keeps_closest_per_side() {
        let mut t = table(0x80);
        for id in [0x70u64, 0x78, 0x7c, 0x84, 0x88, 0x8c] {
            t.insert(&Id::from(id));
        }
        // Half size two: the two nearest on each side survive.
        assert_eq!(t.leaves(), &[
            Id::from(0x78u64),
            Id::from(0x7cu64),
            Id::from(0x84u64),
            Id::from(0x88u64)
        ]);
    }

    #[test]
    fn remove_clears_every_slot() {
        let mut t = table(0x10);
        t.insert(&Id::from(0x80u64));
        assert!(t.remove(&Id::from(0x80u64)));
        assert!(!t.contains(&Id::from(0x80u64)));
        assert!(t.entries().is_empty());
        assert!(!t.remove(&Id::from(0x80u64)));
    }

    #[test]
    fn three_node_routing() {
        // A=0x10, B=0x80, C=0xf0 as seen from A.
        let mut t = table(0x10);
        t.insert(&Id::from(0x80u64));
        t.insert(&Id::from(0xf0u64));

        assert_eq!(t.route(&Id::from(0x85u64)), Some(Id::from(0x80u64)));
        assert_eq!(t.route(&Id::from(0xf5u64)), Some(Id::from(0xf0u64)));
        assert_eq!(t.route(&Id::from(0x12u64)), None);
    }

    #[test]
    fn route_to_self_is_local() {
        let t = table(0x10);
        assert_eq!(t.route(&Id::from(0x10u64)), None);
    }

    #[test]
    fn route_on_empty_table_is_local() {
        let t = table(0x10);
        assert_eq!(t.route(&Id::from(0xeeu64)), None);
    }

    #[test]
    fn route_never_regresses() {
        let mut t = table(0x42);
        for id in [0x07u64, 0x21, 0x33, 0x58, 0x7a, 0x9c, 0xe1] {
            t.insert(&Id::from(id));
        }
        let space = t.space.clone();
        let local = t.local.clone();
        for dest in 0u64..=0xff {
            let dest = Id::from(dest);
            if let Some(hop) = t.route(&dest) {
                assert!(
                    space.distance(&hop, &dest) < space.distance(&local, &dest),
                    "hop {hop} regressed toward {dest}"
                );
            }
        }
    }
}
