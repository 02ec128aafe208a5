//! Structural ring properties over many random memberships

use chord_integration_tests::integration::RingInvariants;
use chord_lib::ring::Ring;
use chord_lib::{Identifier, IdentifierSpace};
use chord_node::ids::{assign_ids, sha1_identity_hash};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

fn random_ring(rng: &mut StdRng, bits: u32, nodes: usize) -> Ring {
    let space = IdentifierSpace::new(bits).unwrap();
    let mut ids = BTreeSet::new();
    while ids.len() < nodes {
        ids.insert(rng.gen_range(0..space.size()) as Identifier);
    }
    Ring::build(space, ids.into_iter().map(|id| (id, format!("n{}", id)))).unwrap()
}

#[test]
fn test_random_rings_satisfy_invariants() {
    let mut rng = StdRng::seed_from_u64(21);
    for round in 0..40 {
        let bits = 3 + round % 8;
        let max_nodes = (1usize << bits).min(40);
        let nodes = rng.gen_range(1..=max_nodes);
        let ring = random_ring(&mut rng, bits as u32, nodes);

        let violations = RingInvariants::check_ring(&ring);
        assert!(
            violations.is_empty(),
            "ring {:?} violates: {:?}",
            ring.ids(),
            violations
        );
    }
}

#[test]
fn test_full_ring_owns_keys_one_to_one() {
    // Every identifier is a node, so every node owns exactly its own id
    let space = IdentifierSpace::new(4).unwrap();
    let ring = Ring::build(space, (0..16).map(|id| (id, format!("n{}", id)))).unwrap();
    for key in 0..16 {
        assert_eq!(ring.responsible_node(key), key);
        assert_eq!(ring.record(key).unwrap().predecessor, (key + 15) % 16);
    }
    assert!(RingInvariants::check_ring(&ring).is_empty());
}

#[test]
fn test_hashed_membership_builds_consistent_ring() {
    let space = IdentifierSpace::new(14).unwrap();
    let identities: Vec<String> = (0..50)
        .map(|i| format!("10.0.{}.{}_{}", i / 256, i % 256, i))
        .collect();
    let ids = assign_ids(space, &identities, sha1_identity_hash).unwrap();
    let ring = Ring::build(space, ids.into_iter().zip(identities)).unwrap();

    assert_eq!(ring.len(), 50);
    assert!(RingInvariants::check_ring(&ring).is_empty());
}
