// Identifier assignment from external identity strings
use chord_lib::{Identifier, IdentifierSpace, RingError};
use sha1::{Digest, Sha1};
use std::collections::HashSet;

const MAX_RESAMPLES: u32 = 1 << 16;

/// SHA-1 of the identity (with the salt appended when non-zero), folded into
/// a u64 from the first 8 digest bytes.
pub fn sha1_identity_hash(identity: &str, salt: u32) -> u64 {
    let mut hasher = Sha1::new();
    hasher.update(identity.as_bytes());
    if salt > 0 {
        hasher.update(salt.to_be_bytes());
    }
    hasher
        .finalize()
        .iter()
        .take(8)
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

/// Maps every identity into `space`, re-hashing with an increasing salt
/// until each one lands on a free identifier.
pub fn assign_ids<S, F>(
    space: IdentifierSpace,
    identities: &[S],
    hash_fn: F,
) -> Result<Vec<Identifier>, RingError>
where
    S: AsRef<str>,
    F: Fn(&str, u32) -> u64,
{
    if identities.len() as u64 > space.size() {
        return Err(RingError::SpaceExhausted {
            members: identities.len(),
            size: space.size(),
        });
    }

    let mut taken = HashSet::with_capacity(identities.len());
    let mut ids = Vec::with_capacity(identities.len());
    for identity in identities {
        let identity = identity.as_ref();
        let id = (0..MAX_RESAMPLES)
            .map(|salt| space.wrap(hash_fn(identity, salt)))
            .find(|candidate| !taken.contains(candidate))
            .ok_or(RingError::SpaceExhausted {
                members: identities.len(),
                size: space.size(),
            })?;
        taken.insert(id);
        ids.push(id);
    }
    Ok(ids)
}
