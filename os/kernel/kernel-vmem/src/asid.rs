use core::fmt;
use core::num::NonZeroU32;
use core::sync::atomic::{AtomicU32, Ordering};

/// Identity of one address space.
///
/// Frames record the identity of the address space that owns them; the
/// kernel itself has no identity (`Option::<AddressSpaceId>::None`).
/// Identities are never reused while the system runs.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AddressSpaceId(NonZeroU32);

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

impl AddressSpaceId {
    /// Hands out a fresh identity.
    ///
    /// # Panics
    /// After 2³² − 1 identities; a uniprocessor teaching kernel does not get
    /// there.
    #[must_use]
    pub fn next() -> Self {
        let raw = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        match NonZeroU32::new(raw) {
            Some(id) => Self(id),
            None => panic!("address space identities exhausted"),
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as#{}", self.0)
    }
}

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
