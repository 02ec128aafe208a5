// Key ownership and next-hop selection
use crate::{in_range, strictly_between, Identifier};

/// Whether the node `self_id` with the given predecessor owns `key`.
pub fn is_responsible(
    self_id: Identifier,
    predecessor: Identifier,
    ring_len: usize,
    key: Identifier,
) -> bool {
    if ring_len <= 1 || key == self_id {
        return true;
    }
    in_range(key, predecessor, self_id)
}

// Farthest finger that still precedes the key. Falls back to the immediate
// successor; returns self only when the table has nothing else to offer.
pub fn next_hop(self_id: Identifier, fingers: &[Identifier], key: Identifier) -> Identifier {
    fingers
        .iter()
        .rev()
        .find(|finger| strictly_between(**finger, self_id, key))
        .or_else(|| fingers.first())
        .copied()
        .unwrap_or(self_id)
}
