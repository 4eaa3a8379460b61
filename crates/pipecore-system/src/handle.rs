use std::fmt;
use std::num::NonZeroU64;

/// Opaque reference to a live resource in a [`HandleTable`](crate::HandleTable).
///
/// The raw value packs the slot generation (high 32 bits) and the slot index
/// plus one (low 32 bits), so it is never zero. `0` is the invalid sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU64);

/// Raw value that never names a live handle.
pub const INVALID_HANDLE_VALUE: u64 = 0;

impl Handle {
    pub(crate) fn from_parts(index: u32, generation: u32) -> Self {
        let low = u64::from(index) + 1;
        let raw = (u64::from(generation) << 32) | low;
        // `low` is at least 1, so `raw` is non-zero.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Rebuild a handle from its raw value; `0` yields `None`.
    ///
    /// A non-zero value is not necessarily live: operations on it fail with
    /// `INVALID_ARGUMENT` if the table does not know it.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw)
            .filter(|value| value.get() & u64::from(u32::MAX) != 0)
            .map(Self)
    }

    pub fn into_raw(self) -> u64 {
        self.0.get()
    }

    pub(crate) fn index(self) -> usize {
        // Low word is index + 1 and never zero for values built by this crate.
        ((self.0.get() & u64::from(u32::MAX)) - 1) as usize
    }

    pub(crate) fn generation(self) -> u32 {
        (self.0.get() >> 32) as u32
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0.get())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}
