//! Pipe-level flag bits (spec.md §3 "Pipe").
//!
//! Modeled the same way as [`crate::message::MF_WRITE_PROTECTED`] — a plain
//! `u32` with named bit constants — rather than pulling in a bitflags crate
//! for a set this small and fixed. The low half is the common, cross-subtype
//! set named by spec.md §3; the high half is reserved for per-subtype
//! private bits (none are defined yet, since subtype-specific behavior such
//! as driver reconnection state lives in the out-of-scope driver modules).

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipeFlags(pub u32);

impl PipeFlags {
    pub const INITIALIZED: u32 = 1 << 0;
    pub const INLINED: u32 = 1 << 1;
    pub const BRANCH_FINAL: u32 = 1 << 2;
    pub const BRANCH_FALLBACK: u32 = 1 << 3;
    pub const DROP_UNMATCHED: u32 = 1 << 4;
    pub const HARD_FLOW_CONTROL: u32 = 1 << 5;
    pub const SOURCE: u32 = 1 << 6;
    pub const JUNCTION_END: u32 = 1 << 7;
    pub const CONDITIONAL_MIDPOINT: u32 = 1 << 8;
    pub const SYNC_FILTERX: u32 = 1 << 9;

    /// Bits 16..=31 are reserved for per-subtype private state.
    pub const PRIVATE_SHIFT: u32 = 16;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u32) {
        self.0 &= !bit;
    }

    /// Bits that select the slowpath (spec.md §4.4 "Slowpath"): anything the
    /// fastpath doesn't special-case.
    pub const fn needs_slowpath(self) -> bool {
        self.0 & (Self::SYNC_FILTERX | Self::HARD_FLOW_CONTROL | Self::JUNCTION_END | Self::CONDITIONAL_MIDPOINT) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fastpath_eligible_when_no_slowpath_bits_set() {
        let flags = PipeFlags(PipeFlags::INITIALIZED | PipeFlags::SOURCE);
        assert!(!flags.needs_slowpath());
    }

    #[test]
    fn any_slowpath_bit_forces_slowpath() {
        for bit in [
            PipeFlags::SYNC_FILTERX,
            PipeFlags::HARD_FLOW_CONTROL,
            PipeFlags::JUNCTION_END,
            PipeFlags::CONDITIONAL_MIDPOINT,
        ] {
            assert!(PipeFlags(bit).needs_slowpath());
        }
    }
}
