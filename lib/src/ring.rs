// Static ring construction: sorted membership, predecessors and finger tables
use std::collections::HashSet;
use std::fmt::Write as _;

use thiserror::Error;

use crate::routing;
use crate::{Identifier, IdentifierSpace};

/// Opaque transport address of a node.
pub type Address = String;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("identifier width must be between 1 and 32 bits, got {0}")]
    InvalidBits(u32),
    #[error("a ring needs at least one member")]
    Empty,
    #[error("identifier {id} does not fit in a {bits}-bit space")]
    OutOfSpace { id: Identifier, bits: u32 },
    #[error("identifier {0} is assigned to more than one member")]
    DuplicateId(Identifier),
    #[error("{members} members cannot be placed in a space of {size} identifiers")]
    SpaceExhausted { members: usize, size: u64 },
}

/// Everything a node knows about its place on the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: Identifier,
    pub address: Address,
    pub predecessor: Identifier,
    /// `fingers[i]` is `successor(id + 2^i)`; always `m` entries.
    pub fingers: Vec<Identifier>,
}

impl NodeRecord {
    pub fn successor(&self) -> Identifier {
        self.fingers.first().copied().unwrap_or(self.id)
    }

    pub fn is_responsible(&self, ring_len: usize, key: Identifier) -> bool {
        routing::is_responsible(self.id, self.predecessor, ring_len, key)
    }

    pub fn next_hop(&self, key: Identifier) -> Identifier {
        routing::next_hop(self.id, &self.fingers, key)
    }
}

/// An immutable ring built once from the full membership.
#[derive(Debug, Clone)]
pub struct Ring {
    space: IdentifierSpace,
    // sorted by id
    records: Vec<NodeRecord>,
}

impl Ring {
    pub fn build<I>(space: IdentifierSpace, members: I) -> Result<Self, RingError>
    where
        I: IntoIterator<Item = (Identifier, Address)>,
    {
        let mut members: Vec<(Identifier, Address)> = members.into_iter().collect();
        if members.is_empty() {
            return Err(RingError::Empty);
        }

        let mut seen = HashSet::with_capacity(members.len());
        for (id, _) in &members {
            if !space.contains(*id) {
                return Err(RingError::OutOfSpace {
                    id: *id,
                    bits: space.bits(),
                });
            }
            if !seen.insert(*id) {
                return Err(RingError::DuplicateId(*id));
            }
        }

        members.sort_by_key(|(id, _)| *id);
        let ids: Vec<Identifier> = members.iter().map(|(id, _)| *id).collect();

        let records = members
            .into_iter()
            .enumerate()
            .map(|(index, (id, address))| {
                let predecessor = if index == 0 {
                    ids.last().copied().unwrap_or(id)
                } else {
                    ids.get(index - 1).copied().unwrap_or(id)
                };
                let fingers = (0..space.bits())
                    .map(|i| successor_in(&ids, space.add_power_of_two(id, i)))
                    .collect();
                NodeRecord {
                    id,
                    address,
                    predecessor,
                    fingers,
                }
            })
            .collect();

        Ok(Self { space, records })
    }

    pub fn space(&self) -> IdentifierSpace {
        self.space
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[NodeRecord] {
        &self.records
    }

    pub fn record(&self, id: Identifier) -> Option<&NodeRecord> {
        self.records
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .and_then(|index| self.records.get(index))
    }

    pub fn ids(&self) -> Vec<Identifier> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// First member with `id >= target`, wrapping to the smallest id.
    pub fn successor_of(&self, target: Identifier) -> Identifier {
        let index = self.records.partition_point(|r| r.id < target);
        self.records
            .get(index)
            .or_else(|| self.records.first())
            .map(|r| r.id)
            .unwrap_or(target)
    }

    /// Last member with `id < target`, wrapping to the largest id.
    pub fn predecessor_of(&self, target: Identifier) -> Identifier {
        let index = self.records.partition_point(|r| r.id < target);
        index
            .checked_sub(1)
            .and_then(|i| self.records.get(i))
            .or_else(|| self.records.last())
            .map(|r| r.id)
            .unwrap_or(target)
    }

    /// The single member that owns `key`.
    pub fn responsible_node(&self, key: Identifier) -> Identifier {
        self.successor_of(self.space.wrap(u64::from(key)))
    }

    pub fn address_of(&self, id: Identifier) -> Option<&str> {
        self.record(id).map(|r| r.address.as_str())
    }

    pub fn describe(&self) -> String {
        let mut out = format!(
            "ring of {} nodes in a {}-bit space\n",
            self.records.len(),
            self.space.bits()
        );
        for record in &self.records {
            let _ = writeln!(
                out,
                "  node {:>6} @ {} pred={} fingers={:?}",
                record.id, record.address, record.predecessor, record.fingers
            );
        }
        out
    }
}

fn successor_in(sorted: &[Identifier], target: Identifier) -> Identifier {
    let index = sorted.partition_point(|id| *id < target);
    sorted
        .get(index)
        .or_else(|| sorted.first())
        .copied()
        .unwrap_or(target)
}
