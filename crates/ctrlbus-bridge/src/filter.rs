use std::fmt;

use serde::Deserialize;

/// Address filter registered with the bridge.
///
/// Bus address `a` is delivered iff `a & mask == address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct AcceptanceFilter {
    pub mask: u16,
    pub address: u16,
}

impl AcceptanceFilter {
    /// Mask selecting every address bit of an 11/12-bit bus identifier.
    pub const EXACT_MASK: u16 = 0xFFF;

    pub fn new(mask: u16, address: u16) -> Self {
        Self { mask, address }
    }

    /// Filter that lets exactly one address through.
    pub fn exact(address: u16) -> Self {
        Self::new(Self::EXACT_MASK, address)
    }

    pub fn accepts(&self, address: u16) -> bool {
        address & self.mask == self.address
    }
}

impl fmt::Display for AcceptanceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mask=0x{:x} addr=0x{:x}", self.mask, self.address)
    }
}
