//! Runtime publisher: builds and maintains the `!PXE`/`PXENV+` structures
//! and owns the INT 1Ah hook (§4.8).
//!
//! The PXE callback trampoline, the real-mode-callback interface, and the
//! E820-mangler trampolines are all installed within one contiguous
//! allocation from the [`crate::arena::Arena`] -- this module decides
//! *where* each structure lives and keeps the checksums current; it never
//! pokes the interrupt vector table directly, that's
//! [`crate::env::CallGate::hook_int1a`]/`unhook_int1a`'s job.

use crate::arena::{Arena, ArenaError};
use crate::env::CallGate;
use crate::error::CoreError;
use crate::far_ptr::SegOff;
use crate::records::{PxeRecord, PxenvRecord, SegDesc};

/// Size reserved for the trampoline code (PXE entry stub, real-mode
/// callback glue, E820-mangler stub) installed alongside the two runtime
/// structures.
const TRAMPOLINE_SIZE: u32 = 256;

/// Size of the stack reservation shared between `Stack` and `UNDI-Data`
/// per §3's invariant.
const STACK_SIZE: u32 = 1536;

/// Paragraph alignment (16 bytes): the segment-register granularity on
/// x86 real mode (§4.4).
const PARAGRAPH: u32 = 16;

fn runtime_region_size() -> u32 {
    (core::mem::size_of::<PxeRecord>() as u32)
        + (core::mem::size_of::<PxenvRecord>() as u32)
        + TRAMPOLINE_SIZE
        + STACK_SIZE
}

/// The published `!PXE`/`PXENV+` pair plus the hook state that gates
/// whether INT 1Ah currently points at this stack.
pub struct Runtime {
    pub pxe: PxeRecord,
    pub pxenv: PxenvRecord,
    pub pxe_addr: SegOff,
    pub pxenv_addr: SegOff,
    pub region: (u32, u32),
    saved_int1a: Option<SegOff>,
}

impl Runtime {
    /// Allocate the runtime region and build both structures. `entry` is
    /// the trampoline's far pointer -- installing the actual trampoline
    /// bytes at that address is an `env::CallGate`-backend concern; this
    /// module only reserves the space and records where it lives, per the
    /// Design Notes' "compile-time constant... or compute at install time
    /// and store in the descriptor" guidance for `_pxe_stack_size`.
    pub fn install(arena: &mut Arena, entry: SegOff) -> Result<Self, CoreError> {
        let size = runtime_region_size();
        let base = arena.alloc(size, PARAGRAPH).map_err(|e| match e {
            ArenaError::OutOfMemory => CoreError::OutOfResources,
            ArenaError::BadRequest => CoreError::Fatal("runtime region request malformed"),
        })?;

        let pxe_addr = SegOff::from_linear(base);
        let pxenv_addr = SegOff::from_linear(base + core::mem::size_of::<PxeRecord>() as u32);
        let stack_base = base + size - STACK_SIZE;

        let shared_stack_seg = SegDesc::new(
            (stack_base / PARAGRAPH) as u16,
            stack_base,
            STACK_SIZE as u16,
        );
        let undi_code = SegDesc::new(
            (base / PARAGRAPH) as u16,
            base,
            size as u16,
        );

        let pxe = PxeRecord::new(
            SegOff::NULL, // undi_rom_id: filled in once the loader finds one
            SegOff::NULL, // base_rom_id: filled in by a pixie hunt, if any
            entry,
            SegOff::NULL, // status_callout: no callback installed by default
            shared_stack_seg,
            shared_stack_seg,
            undi_code,
            undi_code,
            SegDesc::empty(),
            SegDesc::empty(),
            SegDesc::empty(),
        );

        let pxenv = PxenvRecord::new(
            entry,
            shared_stack_seg.seg_addr, shared_stack_seg.seg_size,
            0, 0,
            0, 0,
            shared_stack_seg.seg_addr, shared_stack_seg.seg_size,
            undi_code.seg_addr, undi_code.seg_size,
            pxe_addr,
        );

        Ok(Self {
            pxe,
            pxenv,
            pxe_addr,
            pxenv_addr,
            region: (base, size),
            saved_int1a: None,
        })
    }

    pub fn is_hooked(&self) -> bool {
        self.saved_int1a.is_some()
    }

    /// Save the current INT 1Ah vector and install `handler`. A no-op
    /// success if already hooked.
    pub fn hook(&mut self, gate: &dyn CallGate, handler: SegOff) -> bool {
        if self.saved_int1a.is_some() {
            return true;
        }
        match gate.hook_int1a(handler) {
            Some(saved) => {
                self.saved_int1a = Some(saved);
                true
            }
            None => false,
        }
    }

    /// Restore the saved INT 1Ah vector. A no-op success if not currently
    /// hooked. Returns `false` (leaving the saved vector tracked) if the
    /// restore failed -- callers must treat this as fatal.
    pub fn unhook(&mut self, gate: &dyn CallGate) -> bool {
        let saved = match self.saved_int1a {
            Some(s) => s,
            None => return true,
        };
        if gate.unhook_int1a(saved) {
            self.saved_int1a = None;
            true
        } else {
            false
        }
    }

    /// Recompute both checksums -- call after mutating either record
    /// in-place (e.g. `runtime.pxe.undi_rom_id = ...` once discovery
    /// completes).
    pub fn refresh_checksums(&mut self) {
        self.pxe.recompute_checksum();
        self.pxenv.recompute_checksum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::CallResult;
    use core::cell::Cell;

    struct FakeGate {
        hooked: Cell<Option<SegOff>>,
        unhook_ok: bool,
    }

    impl CallGate for FakeGate {
        fn call(&self, _entry: SegOff, _opcode: u16, _params: SegOff) -> CallResult {
            CallResult { completed: true, vendor_status: 0 }
        }
        fn hook_int1a(&self, handler: SegOff) -> Option<SegOff> {
            let prev = self.hooked.get().unwrap_or(SegOff::new(0x1000, 0x20));
            self.hooked.set(Some(handler));
            Some(prev)
        }
        fn unhook_int1a(&self, _saved: SegOff) -> bool {
            self.unhook_ok
        }
        fn a20_enable(&self) {}
    }

    #[test]
    fn install_produces_checksummed_records() {
        let mut arena = Arena::new();
        let rt = Runtime::install(&mut arena, SegOff::new(0x2000, 0x10)).unwrap();
        assert!(rt.pxe.checksum_holds());
        assert!(rt.pxenv.checksum_holds());
        assert_eq!(rt.pxenv.pxe_ptr, rt.pxe_addr);
    }

    #[test]
    fn stack_and_undi_data_share_segment_reservation() {
        let mut arena = Arena::new();
        let rt = Runtime::install(&mut arena, SegOff::NULL).unwrap();
        assert_eq!(rt.pxe.stack, rt.pxe.undi_data);
    }

    #[test]
    fn hook_then_unhook_round_trips_saved_vector() {
        let mut arena = Arena::new();
        let mut rt = Runtime::install(&mut arena, SegOff::NULL).unwrap();
        let gate = FakeGate { hooked: Cell::new(None), unhook_ok: true };
        assert!(rt.hook(&gate, SegOff::new(0x3000, 0x0)));
        assert!(rt.is_hooked());
        assert!(rt.unhook(&gate));
        assert!(!rt.is_hooked());
    }

    #[test]
    fn failed_unhook_keeps_hooked_state() {
        let mut arena = Arena::new();
        let mut rt = Runtime::install(&mut arena, SegOff::NULL).unwrap();
        let gate = FakeGate { hooked: Cell::new(None), unhook_ok: false };
        assert!(rt.hook(&gate, SegOff::new(0x3000, 0x0)));
        assert!(!rt.unhook(&gate));
        assert!(rt.is_hooked());
    }

    #[test]
    fn refresh_checksums_after_mutation() {
        let mut arena = Arena::new();
        let mut rt = Runtime::install(&mut arena, SegOff::NULL).unwrap();
        rt.pxe.undi_rom_id = SegOff::new(0xC000, 0x40);
        assert!(!rt.pxe.checksum_holds());
        rt.refresh_checksums();
        assert!(rt.pxe.checksum_holds());
    }
}
