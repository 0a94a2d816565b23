//! Readiness state machine: the one gate every dispatcher handler passes
//! through before touching the NIC or the runtime structures (§3, §4.1).

/// The stack's lifecycle token. Ordered `Unloaded < Midway < Ready` so
/// `ensure_state` can reason about "target above/below current" with plain
/// comparison, matching §3's "no skipping" invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StackState {
    Unloaded,
    Midway,
    Ready,
}

/// Drive `stack` one level at a time toward `target`, stopping at the first
/// sub-step that fails. Returns whether `target` was reached.
pub fn ensure_state(stack: &mut crate::Stack, target: StackState) -> bool {
    while stack.state != target {
        let ok = if target > stack.state {
            step_up(stack)
        } else {
            step_down(stack)
        };
        if !ok {
            return false;
        }
    }
    true
}

/// One `Unloaded -> Midway` or `Midway -> Ready` transition.
fn step_up(stack: &mut crate::Stack) -> bool {
    match stack.state {
        StackState::Unloaded => {
            let (base, len) = stack.hidden_region;
            if !stack.hidemem.hook(stack.hide, base, len) {
                return false;
            }
            if !stack.runtime.hook(stack.gate, stack.handler_entry) {
                // Don't leave the mangler installed over a stack that
                // failed to reach Midway.
                stack.hidemem.unhook(stack.hide);
                return false;
            }
            stack.state = StackState::Midway;
            true
        }
        StackState::Midway => {
            let up = if stack.net.already_up() {
                true
            } else {
                stack.net.probe(stack.undi.pci)
            };
            if !up {
                return false;
            }
            stack.state = StackState::Ready;
            true
        }
        StackState::Ready => true,
    }
}

/// One `Ready -> Midway` or `Midway -> Unloaded` transition.
fn step_down(stack: &mut crate::Stack) -> bool {
    match stack.state {
        StackState::Ready => {
            stack.net.irq_enable(false);
            stack.net.deactivate();
            stack.isr.reset();
            stack.state = StackState::Midway;
            true
        }
        StackState::Midway => {
            // Per §4.1: restore INT 1Ah first, then unhook the mangler. If
            // the mangler refuses to unhook, the stack stays Midway even
            // though the vector has already been restored.
            if !stack.runtime.unhook(stack.gate) {
                return false;
            }
            if !stack.hidemem.unhook(stack.hide) {
                return false;
            }
            stack.state = StackState::Unloaded;
            true
        }
        StackState::Unloaded => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::env::{CallGate, CallResult, Hidemem, NetDevice, PciSelector, PollResult};
    use crate::far_ptr::SegOff;
    use crate::hidemem::HidemenManager;
    use crate::isr::IsrState;
    use crate::runtime::Runtime;
    use crate::undi::UndiDescriptor;
    use alloc::vec::Vec;
    use core::cell::Cell;

    struct FakeGate {
        hook_ok: bool,
        unhook_ok: bool,
    }
    impl CallGate for FakeGate {
        fn call(&self, _entry: SegOff, _opcode: u16, _params: SegOff) -> CallResult {
            CallResult { completed: true, vendor_status: 0 }
        }
        fn hook_int1a(&self, _handler: SegOff) -> Option<SegOff> {
            if self.hook_ok { Some(SegOff::new(0x1000, 0x20)) } else { None }
        }
        fn unhook_int1a(&self, _saved: SegOff) -> bool {
            self.unhook_ok
        }
        fn a20_enable(&self) {}
    }

    struct FakeHide {
        hide_ok: bool,
        unhide_ok: bool,
    }
    impl Hidemem for FakeHide {
        fn hide(&self, _base: u32, _len: u32) -> bool { self.hide_ok }
        fn unhide(&self) -> bool { self.unhide_ok }
    }

    struct FakeNet {
        up: bool,
        probe_ok: bool,
        irq_enabled: Cell<bool>,
        deactivated: Cell<bool>,
    }
    impl NetDevice for FakeNet {
        fn mac(&self) -> [u8; 6] { [0; 6] }
        fn mtu(&self) -> u16 { 1500 }
        fn io_base(&self) -> u32 { 0 }
        fn irq(&self) -> u8 { 0 }
        fn probe(&self, _s: PciSelector) -> bool { self.probe_ok }
        fn already_up(&self) -> bool { self.up }
        fn deactivate(&self) { self.deactivated.set(true); }
        fn poll(&self) -> PollResult { PollResult::default() }
        fn irq_enable(&self, enable: bool) { self.irq_enabled.set(enable); }
        fn recv(&self) -> Option<Vec<u8>> { None }
        fn tx(&self, _frame: &[u8]) -> bool { true }
    }

    fn make_stack<'a>(
        gate: &'a dyn CallGate,
        hide: &'a dyn Hidemem,
        net: &'a dyn NetDevice,
    ) -> crate::Stack<'a> {
        let mut arena = Arena::new();
        let runtime = Runtime::install(&mut arena, SegOff::new(0x2000, 0x10)).unwrap();
        crate::Stack {
            state: StackState::Unloaded,
            runtime,
            hidemem: HidemenManager::new(),
            undi: UndiDescriptor::new(),
            isr: IsrState::new(SegOff::NULL, 1500),
            arena,
            net,
            gate,
            mem: None,
            console: None,
            transport: None,
            platform: None,
            hide,
            handler_entry: SegOff::new(0x2000, 0x10),
            hidden_region: (0x1000, 0x2000),
        }
    }

    #[test]
    fn unloaded_to_ready_climbs_both_steps() {
        let gate = FakeGate { hook_ok: true, unhook_ok: true };
        let hide = FakeHide { hide_ok: true, unhide_ok: true };
        let net = FakeNet { up: false, probe_ok: true, irq_enabled: Cell::new(false), deactivated: Cell::new(false) };
        let mut stack = make_stack(&gate, &hide, &net);
        assert!(ensure_state(&mut stack, StackState::Ready));
        assert_eq!(stack.state, StackState::Ready);
    }

    #[test]
    fn failed_hide_keeps_unloaded() {
        let gate = FakeGate { hook_ok: true, unhook_ok: true };
        let hide = FakeHide { hide_ok: false, unhide_ok: true };
        let net = FakeNet { up: false, probe_ok: true, irq_enabled: Cell::new(false), deactivated: Cell::new(false) };
        let mut stack = make_stack(&gate, &hide, &net);
        assert!(!ensure_state(&mut stack, StackState::Midway));
        assert_eq!(stack.state, StackState::Unloaded);
    }

    #[test]
    fn failed_probe_stays_at_midway() {
        let gate = FakeGate { hook_ok: true, unhook_ok: true };
        let hide = FakeHide { hide_ok: true, unhide_ok: true };
        let net = FakeNet { up: false, probe_ok: false, irq_enabled: Cell::new(false), deactivated: Cell::new(false) };
        let mut stack = make_stack(&gate, &hide, &net);
        assert!(!ensure_state(&mut stack, StackState::Ready));
        assert_eq!(stack.state, StackState::Midway);
    }

    #[test]
    fn ready_down_to_unloaded_descends_both_steps() {
        let gate = FakeGate { hook_ok: true, unhook_ok: true };
        let hide = FakeHide { hide_ok: true, unhide_ok: true };
        let net = FakeNet { up: false, probe_ok: true, irq_enabled: Cell::new(false), deactivated: Cell::new(false) };
        let mut stack = make_stack(&gate, &hide, &net);
        assert!(ensure_state(&mut stack, StackState::Ready));
        assert!(ensure_state(&mut stack, StackState::Unloaded));
        assert_eq!(stack.state, StackState::Unloaded);
        assert!(net.deactivated.get());
    }

    #[test]
    fn unhookable_mangler_aborts_at_midway() {
        let gate = FakeGate { hook_ok: true, unhook_ok: true };
        let hide = FakeHide { hide_ok: true, unhide_ok: false };
        let net = FakeNet { up: false, probe_ok: true, irq_enabled: Cell::new(false), deactivated: Cell::new(false) };
        let mut stack = make_stack(&gate, &hide, &net);
        assert!(ensure_state(&mut stack, StackState::Midway));
        assert!(!ensure_state(&mut stack, StackState::Unloaded));
        assert_eq!(stack.state, StackState::Midway);
    }
}
