//! The discovered-device record: everything the core remembers about the
//! UNDI driver it loaded or found resident, including the four latched
//! flags that shadow state `PXENV_UNDI_GET_STATE` cannot be trusted to
//! report (§3).

use crate::env::PciSelector;
use crate::far_ptr::SegOff;

/// A base-memory region the arena allocated on the UNDI driver's behalf.
/// The UNDI descriptor holds only a weak (base, length) reference; the
/// arena remains the owner (§3 "Ownership").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: u32,
    pub len: u32,
}

/// Discovered-device record (§3's "UNDI descriptor").
#[derive(Debug, Clone, Default)]
pub struct UndiDescriptor {
    pub pxe_ptr: Option<SegOff>,
    pub undi_rom_id: Option<SegOff>,
    pub pci: PciSelector,
    pub code_region: Option<Region>,
    pub data_region: Option<Region>,
    pub irq: u8,

    /// Latched because `PXENV_UNDI_GET_STATE` aliases the opcode used for
    /// `UNDI_STARTUP`'s stop counterpart and cannot be trusted (§3).
    pub prestarted: bool,
    pub started: bool,
    pub initialized: bool,
    pub opened: bool,
}

impl UndiDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a driver region is currently tracked (either code or data).
    /// Freeing either region is only valid in `Unloaded` (§3); callers
    /// consult this before handing regions back to the arena.
    pub fn has_regions(&self) -> bool {
        self.code_region.is_some() || self.data_region.is_some()
    }

    /// Take both regions, leaving `None` behind -- used by `STOP_UNDI`/
    /// `UNLOAD_STACK` handlers when freeing the driver back to the arena.
    pub fn take_regions(&mut self) -> (Option<Region>, Option<Region>) {
        (self.code_region.take(), self.data_region.take())
    }
}
