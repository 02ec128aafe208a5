// Shared Chord ring primitives
pub mod messages;
pub mod ring;
pub mod routing;

pub use ring::RingError;

/// A position on the ring. Only the low `bits` of the space are ever used.
pub type Identifier = u32;

/// The modular identifier space of size 2^m.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentifierSpace {
    bits: u32,
}

impl IdentifierSpace {
    pub const MAX_BITS: u32 = 32;

    pub fn new(bits: u32) -> Result<Self, RingError> {
        if bits == 0 || bits > Self::MAX_BITS {
            return Err(RingError::InvalidBits(bits));
        }
        Ok(Self { bits })
    }

    /// The bit width `m`, which is also the length of every finger table.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn size(&self) -> u64 {
        1u64 << self.bits
    }

    pub fn contains(&self, id: Identifier) -> bool {
        u64::from(id) < self.size()
    }

    pub fn wrap(&self, raw: u64) -> Identifier {
        // size() <= 2^32, so the remainder always fits
        (raw % self.size()) as Identifier
    }

    /// `(id + 2^i) mod 2^m`, the start of the i-th finger interval.
    pub fn add_power_of_two(&self, id: Identifier, i: u32) -> Identifier {
        self.wrap(u64::from(id) + (1u64 << (i % self.bits)))
    }

    /// Forward (clockwise) distance from `from` to `to`.
    pub fn distance(&self, from: Identifier, to: Identifier) -> u64 {
        (u64::from(to) + self.size() - u64::from(from) % self.size()) % self.size()
    }
}

// Checks if an ID lies in the half-open ring interval (start, end].
// When start == end the interval is the whole ring (single node case).
pub fn in_range(id: Identifier, start: Identifier, end: Identifier) -> bool {
    if start == end {
        return true;
    }
    if start < end {
        start < id && id <= end
    } else {
        // Wraps around zero
        start < id || id <= end
    }
}

// Open interval (start, end). With start == end this is every id except start.
pub fn strictly_between(id: Identifier, start: Identifier, end: Identifier) -> bool {
    if start == end {
        return id != start;
    }
    in_range(id, start, end) && id != end
}
