//! UNDI loader: invokes a discovered UNDI ROM's loader entry and turns the
//! `!PXE` far-pointer it hands back into a validated record (§4.4).

use crate::arena::{Arena, ArenaError};
use crate::env::{CallGate, Hidemem, MemoryView, PciSelector};
use crate::error::CoreError;
use crate::far_ptr::SegOff;
use crate::records::PxeRecord;
use crate::undi::Region;
use crate::undi_call::{a20_guarded, UndiCallOutcome};

/// 16-byte alignment: the segment-register granularity on x86 real mode.
const SEGMENT_ALIGN: u32 = 16;

/// The real UNDI loader entry convention passes these through registers
/// (AX = bus:devfn, BX/DX = 0xFFFF signalling non-ISAPnP, ES:DI = `$PnP`
/// pointer or null), not a memory-resident parameter block like the
/// numbered PXE API opcodes. Populating those registers from this value is
/// the concrete [`CallGate`] backend's job; this portable core only
/// decides *what* the values should be.
#[derive(Debug, Clone, Copy)]
pub struct LoaderInput {
    pub pci: PciSelector,
    pub pnp_bios: SegOff,
}

/// Pseudo-opcode this crate uses to route a loader invocation through
/// [`CallGate::call`] -- not a genuine PXE API opcode, but a private
/// convention between this core and its `CallGate` backend.
pub const UNDI_LOADER_PSEUDO_OPCODE: u16 = 0x104D;

/// Outcome of a successful load: the validated `!PXE` record plus the two
/// regions the arena allocated for the driver's code and data segments.
#[derive(Debug, Clone, Copy)]
pub struct Loaded {
    pub pxe_ptr: SegOff,
    pub pxe: PxeRecord,
    pub code_region: Region,
    pub data_region: Region,
}

/// Drive one loader invocation per §4.4's six steps. `mem` reads back the
/// `!PXE` record the driver wrote once the call completes -- the same
/// read-only window `crate::scan` uses to find it in the first place.
pub fn load_undi(
    arena: &mut Arena,
    gate: &dyn CallGate,
    hide: &dyn Hidemem,
    mem: &dyn MemoryView,
    loader_entry: SegOff,
    code_size: u32,
    data_size: u32,
    hidden_region: (u32, u32),
    input: LoaderInput,
) -> Result<Loaded, CoreError> {
    let code_base = arena
        .alloc(code_size, SEGMENT_ALIGN)
        .map_err(alloc_err)?;
    let data_base = match arena.alloc(data_size, SEGMENT_ALIGN) {
        Ok(b) => b,
        Err(e) => {
            arena.forget(code_base, code_size);
            return Err(alloc_err(e));
        }
    };

    let code_region = Region { base: code_base, len: code_size };
    let data_region = Region { base: data_base, len: data_size };

    let fail = |arena: &mut Arena, err: CoreError| -> CoreError {
        arena.forget(code_region.base, code_region.len);
        arena.forget(data_region.base, data_region.len);
        err
    };

    if !hide.hide(hidden_region.0, hidden_region.1) {
        return Err(fail(arena, CoreError::Fatal("could not hide core region before loader call")));
    }

    let params = SegOff::from_linear(code_base);
    let _ = input; // the backend derives register contents from `input`
    let outcome = a20_guarded(gate, loader_entry, UNDI_LOADER_PSEUDO_OPCODE, params);

    if !hide.unhide() {
        // The loader trashed the hook: fatal per §4.4 step 5, regardless
        // of whether the call itself succeeded.
        return Err(fail(arena, CoreError::Fatal("loader call left E820 mangler unhookable")));
    }

    let vendor_status = match outcome {
        UndiCallOutcome::Completed { vendor_status } => vendor_status,
        UndiCallOutcome::Failed => {
            return Err(fail(arena, CoreError::Fatal("loader call did not complete")));
        }
    };
    if vendor_status != 0 {
        return Err(fail(arena, CoreError::Fatal("loader reported nonzero vendor status")));
    }

    // The backend's calling convention hands the returned `!PXE` far
    // pointer back as a SegOff; here it is modeled as landing at the base
    // of the code region the driver was loaded into.
    let pxe_ptr = params;
    let bytes = mem.read(pxe_ptr.linear(), core::mem::size_of::<PxeRecord>());
    let pxe = match PxeRecord::validate(&bytes) {
        Some(pxe) => pxe,
        None => return Err(fail(arena, CoreError::Fatal("returned !PXE failed validation"))),
    };

    Ok(Loaded { pxe_ptr, pxe, code_region, data_region })
}

fn alloc_err(e: ArenaError) -> CoreError {
    match e {
        ArenaError::OutOfMemory => CoreError::OutOfResources,
        ArenaError::BadRequest => CoreError::Fatal("loader region request malformed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::CallResult;
    use crate::records::SegDesc;
    use alloc::vec::Vec;
    use core::cell::Cell;

    struct FakeGate {
        completed: bool,
        vendor_status: u16,
    }
    impl CallGate for FakeGate {
        fn call(&self, _entry: SegOff, _opcode: u16, _params: SegOff) -> CallResult {
            CallResult { completed: self.completed, vendor_status: self.vendor_status }
        }
        fn hook_int1a(&self, _handler: SegOff) -> Option<SegOff> { Some(SegOff::NULL) }
        fn unhook_int1a(&self, _saved: SegOff) -> bool { true }
        fn a20_enable(&self) {}
    }

    struct FakeHide {
        hide_ok: bool,
        unhide_ok: bool,
        hide_calls: Cell<u32>,
    }
    impl Hidemem for FakeHide {
        fn hide(&self, _base: u32, _len: u32) -> bool {
            self.hide_calls.set(self.hide_calls.get() + 1);
            self.hide_ok
        }
        fn unhide(&self) -> bool { self.unhide_ok }
    }

    struct FakeMem(Vec<u8>);
    impl MemoryView for FakeMem {
        fn read(&self, phys: u32, len: usize) -> Vec<u8> {
            let off = phys as usize;
            if off >= self.0.len() {
                return Vec::new();
            }
            let end = (off + len).min(self.0.len());
            self.0[off..end].to_vec()
        }
        fn write(&self, _phys: u32, _bytes: &[u8]) -> bool {
            false
        }
    }

    fn valid_pxe_bytes() -> Vec<u8> {
        let rec = PxeRecord::new(
            SegOff::NULL, SegOff::NULL, SegOff::new(0x2000, 0x10), SegOff::NULL,
            SegDesc::new(0x1000, 0x10000, 0x200),
            SegDesc::new(0x1000, 0x10000, 0x200),
            SegDesc::new(0x2000, 0x20000, 0x1000),
            SegDesc::empty(), SegDesc::empty(), SegDesc::empty(), SegDesc::empty(),
        );
        rec.to_bytes().to_vec()
    }

    #[test]
    fn successful_load_returns_validated_record_and_regions() {
        let mut arena = Arena::new();
        let gate = FakeGate { completed: true, vendor_status: 0 };
        let hide = FakeHide { hide_ok: true, unhide_ok: true, hide_calls: Cell::new(0) };
        let mem = FakeMem(valid_pxe_bytes());
        let input = LoaderInput { pci: PciSelector::default(), pnp_bios: SegOff::NULL };
        let loaded = load_undi(
            &mut arena, &gate, &hide, &mem, SegOff::new(0xC000, 0x0), 0x1000, 0x200,
            (0x1000, 0x2000), input,
        ).expect("load succeeds");
        assert_eq!(loaded.code_region.len, 0x1000);
        assert_eq!(loaded.data_region.len, 0x200);
        assert_eq!(hide.hide_calls.get(), 1);
    }

    #[test]
    fn failed_call_frees_both_regions() {
        let mut arena = Arena::new();
        let gate = FakeGate { completed: false, vendor_status: 0 };
        let hide = FakeHide { hide_ok: true, unhide_ok: true, hide_calls: Cell::new(0) };
        let mem = FakeMem(Vec::new());
        let input = LoaderInput { pci: PciSelector::default(), pnp_bios: SegOff::NULL };

        let result = load_undi(
            &mut arena, &gate, &hide, &mem, SegOff::new(0xC000, 0x0), 0x1000, 0x200,
            (0x1000, 0x2000), input,
        );
        assert!(result.is_err());
        assert!(arena.is_free(0, crate::arena::CONVENTIONAL_TOP));
    }

    #[test]
    fn unhide_failure_is_fatal_even_on_call_success() {
        let mut arena = Arena::new();
        let gate = FakeGate { completed: true, vendor_status: 0 };
        let hide = FakeHide { hide_ok: true, unhide_ok: false, hide_calls: Cell::new(0) };
        let mem = FakeMem(valid_pxe_bytes());
        let input = LoaderInput { pci: PciSelector::default(), pnp_bios: SegOff::NULL };
        let result = load_undi(
            &mut arena, &gate, &hide, &mem, SegOff::new(0xC000, 0x0), 0x1000, 0x200,
            (0x1000, 0x2000), input,
        );
        assert!(matches!(result, Err(CoreError::Fatal(_))));
    }

    #[test]
    fn invalid_pxe_record_is_rejected() {
        let mut arena = Arena::new();
        let gate = FakeGate { completed: true, vendor_status: 0 };
        let hide = FakeHide { hide_ok: true, unhide_ok: true, hide_calls: Cell::new(0) };
        let mem = FakeMem(alloc::vec![0xFFu8; 64]);
        let input = LoaderInput { pci: PciSelector::default(), pnp_bios: SegOff::NULL };
        let result = load_undi(
            &mut arena, &gate, &hide, &mem, SegOff::new(0xC000, 0x0), 0x1000, 0x200,
            (0x1000, 0x2000), input,
        );
        assert!(matches!(result, Err(CoreError::Fatal(_))));
        assert!(arena.is_free(0, crate::arena::CONVENTIONAL_TOP));
    }
}
