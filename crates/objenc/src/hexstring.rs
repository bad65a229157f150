use binrw::{BinRead, BinWrite};

struct Hexstring<'a>(pub &'a [u8]);

impl<'a> core::fmt::Debug for Hexstring<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for byte in self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Fixed-size byte slot as stored on disk, printed as a hexstring.
///
/// Variable-length values (IVs, signatures) are stored left-aligned and zero-padded, with their
/// length kept next to the slot.
#[derive(Copy, Clone, Eq, PartialEq, Hash, BinRead, BinWrite)]
pub struct HexData<const N: usize>(pub [u8; N]);

impl<const N: usize> HexData<N> {
    pub const ZERO: Self = Self([0; N]);

    /// Stores `value` at the start of a zeroed slot.
    ///
    /// Panics if `value` does not fit.
    pub fn from_prefix(value: &[u8]) -> Self {
        assert!(
            value.len() <= N,
            "value of {} bytes does not fit into a {} byte slot",
            value.len(),
            N
        );
        let mut slot = [0; N];
        slot[..value.len()].copy_from_slice(value);
        Self(slot)
    }

    pub fn prefix(&self, len: usize) -> &[u8] {
        &self.0[..len]
    }
}

impl<const N: usize> core::fmt::Debug for HexData<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", Hexstring(&self.0[..]))
    }
}

impl<const N: usize> core::fmt::Display for HexData<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

impl<const N: usize> AsRef<[u8]> for HexData<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const N: usize> From<[u8; N]> for HexData<N> {
    fn from(value: [u8; N]) -> Self {
        Self(value)
    }
}
