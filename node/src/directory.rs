use chord_lib::ring::Ring;
use chord_lib::Identifier;

/// Static id to address mapping, fixed once the ring is built.
pub trait Directory: Send + Sync {
    fn address_of(&self, id: Identifier) -> Option<String>;

    /// Number of nodes on the ring; bounds the hop count of a search.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Directory for Ring {
    fn address_of(&self, id: Identifier) -> Option<String> {
        Ring::address_of(self, id).map(str::to_string)
    }

    fn len(&self) -> usize {
        Ring::len(self)
    }
}
