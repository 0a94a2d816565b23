//! PXE API dispatcher and UNDI state machine core.
//!
//! This crate never touches a BIOS, a real NIC, or the interrupt vector
//! table directly -- every external effect goes through the seams in
//! [`env`]. That is what makes `[cfg(test)]` fakes sufficient to exercise
//! the whole opcode surface without real-mode hardware.
#![no_std]

extern crate alloc;

pub mod arena;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod far_ptr;
pub mod hidemem;
pub mod isr;
pub mod loader;
pub mod params;
pub mod records;
pub mod runtime;
pub mod scan;
pub mod state;
pub mod status;
pub mod trace;
pub mod tx;
pub mod undi;
pub mod undi_call;

#[cfg(feature = "real-mode-backend")]
pub mod backends;

use core::sync::atomic::AtomicBool;

use arena::{Arena, ArenaError};
use env::{CallGate, Console, Hidemem, MemoryView, NetDevice, Platform, Transport};
use far_ptr::SegOff;
use hidemem::HidemenManager;
use isr::IsrState;
use records::CachedPackets;
use runtime::Runtime;
use state::StackState;
use undi::UndiDescriptor;

/// Fixed capacity of the ISR's receive bounce buffer (§4.5): large enough
/// for a full Ethernet frame including a VLAN tag, never resized.
pub const ISR_BOUNCE_CAPACITY: usize = 1536;

/// Paragraph alignment (16 bytes): matches `runtime::Runtime::install`'s
/// arena reservation.
const PARAGRAPH: u32 = 16;

/// Everything the dispatcher needs for the stack's lifetime: the readiness
/// token, the owned component state, and the environment seams supplied at
/// [`Stack::install`] time. This is the "core `Stack` value instead of a
/// global mutable singleton" the Design Notes call for (§9) -- every
/// handler takes `&mut Stack` rather than reaching for statics.
pub struct Stack<'a> {
    pub state: StackState,
    pub runtime: Runtime,
    pub hidemem: HidemenManager,
    pub undi: UndiDescriptor,
    pub isr: IsrState,
    pub cache: CachedPackets,
    pub arena: Arena,

    /// Reentry guard for the `UNDI_ISR` pump (§5): a plain flag, not a
    /// `spinlock`-style mutex, because the core never blocks and never
    /// holds a lock across a call into an external collaborator. Set for
    /// the duration of one ISR sub-opcode; a nested entry observes it
    /// already set and refuses rather than re-entering the pump.
    isr_busy: AtomicBool,

    net: &'a dyn NetDevice,
    gate: &'a dyn CallGate,
    hide: &'a dyn Hidemem,
    mem: Option<&'a dyn MemoryView>,
    console: Option<&'a dyn Console>,
    transport: Option<&'a dyn Transport>,
    platform: Option<&'a dyn Platform>,

    /// Far pointer to the INT 1Ah trampoline `state::ensure_state` installs
    /// on `Unloaded -> Midway`.
    handler_entry: SegOff,
    /// `[base, len)` of this stack's own working set -- runtime structures,
    /// UNDI driver segments, arena metadata -- hidden from the OS-visible
    /// E820 map while `Midway` or above.
    hidden_region: (u32, u32),
}

impl<'a> Stack<'a> {
    /// Allocate the runtime region and build a fresh `Stack` at `Unloaded`.
    /// Mirrors the teacher's idempotent install/remove wrapper: callers
    /// that already hold a `Stack` should not call this again, they should
    /// reuse it across `ensure_state` transitions.
    #[allow(clippy::too_many_arguments)]
    pub fn install(
        net: &'a dyn NetDevice,
        gate: &'a dyn CallGate,
        hide: &'a dyn Hidemem,
        mem: Option<&'a dyn MemoryView>,
        console: Option<&'a dyn Console>,
        transport: Option<&'a dyn Transport>,
        platform: Option<&'a dyn Platform>,
        entry: SegOff,
    ) -> Result<Self, error::CoreError> {
        let mut arena = Arena::new();
        let runtime = Runtime::install(&mut arena, entry)?;
        let handler_entry = runtime.pxe_addr;
        let hidden_region = runtime.region;
        let cache_base = arena
            .alloc(CachedPackets::storage_size(), PARAGRAPH)
            .map_err(|e| match e {
                ArenaError::OutOfMemory => error::CoreError::OutOfResources,
                ArenaError::BadRequest => error::CoreError::Fatal("cache region request malformed"),
            })?;
        Ok(Self {
            state: StackState::Unloaded,
            runtime,
            hidemem: HidemenManager::new(),
            undi: UndiDescriptor::new(),
            isr: IsrState::new(SegOff::NULL, ISR_BOUNCE_CAPACITY),
            cache: CachedPackets::new(SegOff::from_linear(cache_base)),
            arena,
            isr_busy: AtomicBool::new(false),
            net,
            gate,
            hide,
            mem,
            console,
            transport,
            platform,
            handler_entry,
            hidden_region,
        })
    }

    /// Tear the stack down: forces `ensure_state(Unloaded)` and frees any
    /// driver regions still tracked. Fails loudly (mirroring §3's "remove
    /// ... fails loudly if that cannot be reached") rather than silently
    /// leaving a live INT 1Ah handler in memory the caller is about to
    /// reclaim.
    pub fn remove(&mut self) -> Result<(), error::CoreError> {
        if !state::ensure_state(self, StackState::Unloaded) {
            return Err(error::CoreError::Fatal("stack could not reach Unloaded on remove"));
        }
        let (code, data) = self.undi.take_regions();
        if let Some(r) = code {
            self.arena.forget(r.base, r.len);
        }
        if let Some(r) = data {
            self.arena.forget(r.base, r.len);
        }
        Ok(())
    }

    /// The installed console, if any -- used by the [`pxe_trace!`]/
    /// [`pxe_warn!`] macros, which no-op when this returns `None`.
    pub fn console(&self) -> Option<&dyn Console> {
        self.console
    }

    pub fn net(&self) -> &dyn NetDevice {
        self.net
    }

    pub fn gate(&self) -> &dyn CallGate {
        self.gate
    }

    pub fn hide(&self) -> &dyn Hidemem {
        self.hide
    }

    pub fn mem(&self) -> Option<&dyn MemoryView> {
        self.mem
    }

    pub fn transport(&self) -> Option<&dyn Transport> {
        self.transport
    }

    pub fn platform(&self) -> Option<&dyn Platform> {
        self.platform
    }

    /// Try to claim the ISR reentry guard. Returns `false` if a cycle is
    /// already in progress -- the caller must not touch `self.isr` or the
    /// net device in that case (§5).
    pub(crate) fn try_enter_isr(&self) -> bool {
        self.isr_busy
            .compare_exchange(
                false,
                true,
                core::sync::atomic::Ordering::Acquire,
                core::sync::atomic::Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Release the ISR reentry guard. Must be called exactly once per
    /// successful [`Stack::try_enter_isr`].
    pub(crate) fn leave_isr(&self) {
        self.isr_busy.store(false, core::sync::atomic::Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use env::{CallResult, PciSelector, PollResult};
    use alloc::vec::Vec;

    struct FakeGate;
    impl CallGate for FakeGate {
        fn call(&self, _entry: SegOff, _opcode: u16, _params: SegOff) -> CallResult {
            CallResult { completed: true, vendor_status: 0 }
        }
        fn hook_int1a(&self, _handler: SegOff) -> Option<SegOff> { Some(SegOff::NULL) }
        fn unhook_int1a(&self, _saved: SegOff) -> bool { true }
        fn a20_enable(&self) {}
    }

    struct FakeHide;
    impl Hidemem for FakeHide {
        fn hide(&self, _base: u32, _len: u32) -> bool { true }
        fn unhide(&self) -> bool { true }
    }

    struct FakeNet;
    impl NetDevice for FakeNet {
        fn mac(&self) -> [u8; 6] { [0; 6] }
        fn mtu(&self) -> u16 { 1500 }
        fn io_base(&self) -> u32 { 0 }
        fn irq(&self) -> u8 { 0 }
        fn probe(&self, _s: PciSelector) -> bool { true }
        fn deactivate(&self) {}
        fn poll(&self) -> PollResult { PollResult::default() }
        fn irq_enable(&self, _e: bool) {}
        fn recv(&self) -> Option<Vec<u8>> { None }
        fn tx(&self, _frame: &[u8]) -> bool { true }
    }

    #[test]
    fn install_starts_unloaded_with_no_console() {
        let gate = FakeGate;
        let hide = FakeHide;
        let net = FakeNet;
        let stack = Stack::install(
            &net, &gate, &hide, None, None, None, None, SegOff::new(0x2000, 0x10),
        ).unwrap();
        assert_eq!(stack.state, StackState::Unloaded);
        assert!(stack.console().is_none());
    }

    #[test]
    fn remove_on_fresh_stack_is_a_noop_success() {
        let gate = FakeGate;
        let hide = FakeHide;
        let net = FakeNet;
        let mut stack = Stack::install(
            &net, &gate, &hide, None, None, None, None, SegOff::new(0x2000, 0x10),
        ).unwrap();
        assert!(stack.remove().is_ok());
        assert_eq!(stack.state, StackState::Unloaded);
    }

    #[test]
    fn ensure_state_reaches_ready_through_the_public_surface() {
        let gate = FakeGate;
        let hide = FakeHide;
        let net = FakeNet;
        let mut stack = Stack::install(
            &net, &gate, &hide, None, None, None, None, SegOff::new(0x2000, 0x10),
        ).unwrap();
        assert!(state::ensure_state(&mut stack, StackState::Ready));
    }
}
