//! `PXENV_UNDI_ISR` sub-opcode pump: receive/transmit-completion
//! emulation over a poll of the network device (§4.5).
//!
//! Exempt from the dispatcher's normal readiness assertion (it may run
//! from a hardware interrupt where blocking a state transition would be
//! unsafe); callers hard-check `Ready` themselves before invoking this
//! module.

use alloc::vec::Vec;

use crate::env::NetDevice;
use crate::far_ptr::SegOff;

/// `UNDI_ISR`'s `FuncFlag`/sub-opcode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrOp {
    Start,
    Process,
    GetNext,
}

/// What one ISR cycle reports back to the NBP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrOutcome {
    /// `IN_START` claimed the interrupt.
    Ours,
    /// `IN_START` observed the interrupt was not ours. Never produced by
    /// this implementation's `IN_START` (see Design Notes: it
    /// unconditionally claims), kept as a variant so the type still models
    /// the full PXE-specified answer space.
    NotOurs,
    /// A frame is ready; see [`Reception`] for its fields.
    Receive(Reception),
    /// One outstanding transmit has completed.
    Transmit,
    /// Nothing outstanding this cycle.
    Done,
    /// The sub-opcode was not one of START/PROCESS/GET_NEXT.
    InvalidParameter,
    /// `UNDI_ISR` was called while the stack was not `Ready`.
    InvalidState,
    /// A nested hardware interrupt re-entered the pump while a cycle was
    /// already in progress (§5's reentry guard). Never observed under
    /// the cooperative, run-to-completion model this core assumes
    /// everywhere else; only a genuine nested IRQ hits this path.
    Busy,
}

impl IsrOutcome {
    /// The PXENV status word this outcome maps to, for callers that surface
    /// `UNDI_ISR`'s result as a wire status. `api_call` does not cover this
    /// opcode (see [`crate::dispatch::undi_isr`]), so this is the pump's own
    /// fold point, kept separate from [`crate::error::CoreError::status`].
    pub const fn status(self) -> crate::status::Status {
        match self {
            IsrOutcome::Ours
            | IsrOutcome::NotOurs
            | IsrOutcome::Receive(_)
            | IsrOutcome::Transmit
            | IsrOutcome::Done => crate::status::Status::Success,
            IsrOutcome::InvalidParameter => crate::status::Status::UndiInvalidParameter,
            IsrOutcome::InvalidState => crate::status::Status::UndiInvalidState,
            IsrOutcome::Busy => crate::status::Status::Failure,
        }
    }
}

/// Link-layer-agnostic protocol classification of a received frame's
/// payload, reported in `ProtType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtType {
    Ip,
    Arp,
    Rarp,
    Unknown,
}

/// Fields `OUT_RECEIVE` fills in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reception {
    pub buffer_length: u16,
    pub frame_length: u16,
    pub frame_header_length: u16,
    pub frame: SegOff,
    pub prot_type: ProtType,
}

/// Ethernet header length, used both to size `FrameHeaderLength` and to
/// classify `ProtType` from the EtherType field.
const ETH_HEADER_LEN: usize = 14;

fn classify(ethertype: u16) -> ProtType {
    match ethertype {
        0x0800 => ProtType::Ip,
        0x0806 => ProtType::Arp,
        0x8035 => ProtType::Rarp,
        _ => ProtType::Unknown,
    }
}

/// Whether `frame` is an ARP packet whose sender hardware address is our
/// own MAC -- a self-addressed loopback echo of a broadcast we ourselves
/// sent. §8 scenario 3: such a packet must never reach the NBP.
fn is_arp_self_loopback(frame: &[u8], own_mac: [u8; 6]) -> bool {
    if frame.len() < ETH_HEADER_LEN + 8 + 6 {
        return false;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != 0x0806 {
        return false;
    }
    let sender_off = ETH_HEADER_LEN + 8; // past hw/proto type+size+opcode
    frame[sender_off..sender_off + 6] == own_mac
}

/// Per-`Stack` ISR bookkeeping: the outstanding-TX counter and the bounce
/// buffer a received frame is copied into for the NBP to read out of.
pub struct IsrState {
    outstanding_tx: u32,
    bounce: Vec<u8>,
    bounce_addr: SegOff,
    bounce_cap: usize,
}

impl IsrState {
    pub fn new(bounce_addr: SegOff, bounce_cap: usize) -> Self {
        Self { outstanding_tx: 0, bounce: Vec::new(), bounce_addr, bounce_cap }
    }

    pub fn outstanding_tx(&self) -> u32 {
        self.outstanding_tx
    }

    /// Called by `UNDI_TRANSMIT` on every transmit that passed validation.
    pub fn note_transmit_queued(&mut self) {
        self.outstanding_tx += 1;
    }

    /// Called by `UNDI_CLOSE` or any transition to `<= Midway`: resets the
    /// outstanding count, per §4.5's cancellation rule.
    pub fn reset(&mut self) {
        self.outstanding_tx = 0;
    }

    /// The most recently copied frame, for tests/diagnostics.
    pub fn last_frame(&self) -> &[u8] {
        &self.bounce
    }

    fn copy_into_bounce(&mut self, frame: &[u8]) -> u16 {
        let len = frame.len().min(self.bounce_cap);
        self.bounce.clear();
        self.bounce.extend_from_slice(&frame[..len]);
        len as u16
    }
}

/// The contract the two build-time ISR strategies named in the Design
/// Notes (§9) both satisfy: something external drives exactly this one
/// call whenever the device's interrupt line fires. Under the default
/// build that something is the dispatcher reacting to the NBP's own
/// `PXENV_UNDI_ISR(IN_START)` call; under the `nontrivial-isr` feature it
/// is a real hardware interrupt handler (see
/// [`hardware_irq_entry`]) installed by a platform backend. Either way,
/// the observable outcome for a given `Stack` is identical.
pub fn isr_triggered(stack: &mut crate::Stack) -> IsrOutcome {
    crate::dispatch::undi_isr(stack, IsrOp::Start)
}

/// Only meaningful under the `nontrivial-isr` feature: the entry point a
/// platform backend wires directly into the hardware IRQ vector, so the
/// interrupt is claimed and acknowledged the instant it fires rather than
/// waiting for the NBP's next `PXENV_UNDI_ISR` call. Installing this into
/// a real IDT is platform bring-up (§1, out of scope for this crate); this
/// function is the contract that installation calls into.
#[cfg(feature = "nontrivial-isr")]
pub fn hardware_irq_entry(stack: &mut crate::Stack) {
    let _ = isr_triggered(stack);
}

/// Run one `UNDI_ISR` sub-opcode cycle.
pub fn isr_cycle(
    state: &mut IsrState,
    net: &dyn NetDevice,
    op: IsrOp,
) -> IsrOutcome {
    match op {
        IsrOp::Start => {
            // Acknowledge the device interrupt and enqueue any received
            // packet; disable the IRQ to avoid a storm. Always claims the
            // interrupt (§4.5 Design Notes / Open Question 3).
            net.poll();
            net.irq_enable(false);
            IsrOutcome::Ours
        }
        IsrOp::Process | IsrOp::GetNext => process_or_get_next(state, net),
    }
}

fn process_or_get_next(state: &mut IsrState, net: &dyn NetDevice) -> IsrOutcome {
    let poll = net.poll();

    if state.outstanding_tx > 0 && poll.tx_queue_empty {
        state.outstanding_tx -= 1;
        return IsrOutcome::Transmit;
    }

    let frame = match net.recv() {
        Some(f) => f,
        None => {
            net.irq_enable(true);
            return IsrOutcome::Done;
        }
    };

    if is_arp_self_loopback(&frame, net.mac()) {
        net.irq_enable(true);
        return IsrOutcome::Done;
    }

    let ethertype = if frame.len() >= ETH_HEADER_LEN {
        u16::from_be_bytes([frame[12], frame[13]])
    } else {
        0
    };
    let buffer_length = state.copy_into_bounce(&frame);
    IsrOutcome::Receive(Reception {
        buffer_length,
        frame_length: frame.len() as u16,
        frame_header_length: ETH_HEADER_LEN as u16,
        frame: state.bounce_addr,
        prot_type: classify(ethertype),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};

    struct FakeNet {
        mac: [u8; 6],
        queue: RefCell<Vec<Vec<u8>>>,
        tx_empty: Cell<bool>,
        irq_enabled: Cell<bool>,
    }

    impl NetDevice for FakeNet {
        fn mac(&self) -> [u8; 6] { self.mac }
        fn mtu(&self) -> u16 { 1500 }
        fn io_base(&self) -> u32 { 0 }
        fn irq(&self) -> u8 { 11 }
        fn probe(&self, _s: crate::env::PciSelector) -> bool { true }
        fn deactivate(&self) {}
        fn poll(&self) -> crate::env::PollResult {
            crate::env::PollResult {
                tx_queue_empty: self.tx_empty.get(),
                packet_available: !self.queue.borrow().is_empty(),
            }
        }
        fn irq_enable(&self, enable: bool) { self.irq_enabled.set(enable); }
        fn recv(&self) -> Option<Vec<u8>> { self.queue.borrow_mut().pop() }
        fn tx(&self, _frame: &[u8]) -> bool { true }
    }

    fn eth_frame(ethertype: u16, sender_mac: Option<[u8; 6]>) -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(&[0xFFu8; 6]); // dst
        f.extend_from_slice(&[0x11u8; 6]); // src
        f.extend_from_slice(&ethertype.to_be_bytes());
        f.extend_from_slice(&[0u8; 8]); // hw/proto type+size+opcode
        if let Some(mac) = sender_mac {
            f.extend_from_slice(&mac);
        } else {
            f.extend_from_slice(&[0u8; 6]);
        }
        f
    }

    #[test]
    fn start_always_claims_and_disables_irq() {
        let net = FakeNet {
            mac: [1; 6], queue: RefCell::new(Vec::new()),
            tx_empty: Cell::new(true), irq_enabled: Cell::new(true),
        };
        let mut state = IsrState::new(SegOff::NULL, 1500);
        let outcome = isr_cycle(&mut state, &net, IsrOp::Start);
        assert_eq!(outcome, IsrOutcome::Ours);
        assert!(!net.irq_enabled.get());
    }

    #[test]
    fn transmit_completion_reported_before_rx_drains_counter() {
        let net = FakeNet {
            mac: [1; 6], queue: RefCell::new(Vec::new()),
            tx_empty: Cell::new(true), irq_enabled: Cell::new(false),
        };
        let mut state = IsrState::new(SegOff::NULL, 1500);
        state.note_transmit_queued();
        assert_eq!(state.outstanding_tx(), 1);
        let outcome = isr_cycle(&mut state, &net, IsrOp::Process);
        assert_eq!(outcome, IsrOutcome::Transmit);
        assert_eq!(state.outstanding_tx(), 0);
    }

    #[test]
    fn no_packet_returns_done_and_reenables_irq() {
        let net = FakeNet {
            mac: [1; 6], queue: RefCell::new(Vec::new()),
            tx_empty: Cell::new(true), irq_enabled: Cell::new(false),
        };
        let mut state = IsrState::new(SegOff::NULL, 1500);
        let outcome = isr_cycle(&mut state, &net, IsrOp::Process);
        assert_eq!(outcome, IsrOutcome::Done);
        assert!(net.irq_enabled.get());
    }

    #[test]
    fn received_packet_is_reported() {
        let frame = eth_frame(0x0806, Some([2; 6]));
        let net = FakeNet {
            mac: [1; 6], queue: RefCell::new(alloc::vec![frame.clone()]),
            tx_empty: Cell::new(true), irq_enabled: Cell::new(false),
        };
        let mut state = IsrState::new(SegOff::new(0x2000, 0x10), 1500);
        let outcome = isr_cycle(&mut state, &net, IsrOp::Process);
        match outcome {
            IsrOutcome::Receive(r) => {
                assert_eq!(r.prot_type, ProtType::Arp);
                assert_eq!(r.frame_length as usize, frame.len());
            }
            other => panic!("expected Receive, got {other:?}"),
        }
    }

    #[test]
    fn arp_self_loopback_is_dropped() {
        // §8 scenario 3: ARP reply whose sender matches our own MAC must
        // never surface as OUT_RECEIVE.
        let own_mac = [9u8; 6];
        let frame = eth_frame(0x0806, Some(own_mac));
        let net = FakeNet {
            mac: own_mac, queue: RefCell::new(alloc::vec![frame]),
            tx_empty: Cell::new(true), irq_enabled: Cell::new(false),
        };
        let mut state = IsrState::new(SegOff::NULL, 1500);
        let outcome = isr_cycle(&mut state, &net, IsrOp::Process);
        assert_eq!(outcome, IsrOutcome::Done);
    }

    #[test]
    fn reset_clears_outstanding_count() {
        let mut state = IsrState::new(SegOff::NULL, 1500);
        state.note_transmit_queued();
        state.note_transmit_queued();
        state.reset();
        assert_eq!(state.outstanding_tx(), 0);
    }
}
