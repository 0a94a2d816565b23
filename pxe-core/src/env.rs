//! The seam between this crate and everything it does not implement.
//!
//! Per the scoping rules this core follows, the NBP's boot image, the NIC
//! media-access driver, TFTP/UDP/ARP, and platform bring-up are all
//! external collaborators. This module is the complete list of doors the
//! core uses to reach them -- nothing below calls into a BIOS, a real NIC,
//! or a real interrupt controller directly.

use crate::far_ptr::SegOff;

/// A PCI bus:device:function selector plus the vendor/device IDs the
/// scanner matches option-ROM headers against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PciSelector {
    pub bus: u8,
    pub devfn: u8,
    pub vendor: u16,
    pub device: u16,
}

/// Result of one `UNDI_ISR`-cycle poll of the network device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollResult {
    /// Whether the device's transmit queue has fully drained since the
    /// last poll.
    pub tx_queue_empty: bool,
    /// Whether a received packet is now available via [`NetDevice::recv`].
    pub packet_available: bool,
}

/// Outcome of one call through the UNDI real-mode entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallResult {
    /// Whether the call itself completed (the far call returned, as
    /// opposed to crashing or never returning).
    pub completed: bool,
    /// The vendor status the UNDI driver wrote into the parameter block,
    /// when `completed` is true.
    pub vendor_status: u16,
}

/// The UNDI real-mode call convention: an opcode and a far pointer to a
/// parameter structure, invoked through `lcall` to the driver's entry
/// point. One implementation exists per target ISA (see
/// `backends::real_mode` for the x86 backend built on the `cpu` crate);
/// tests use an in-memory fake.
pub trait CallGate {
    /// Invoke the UNDI entry point. The A20 gate is *not* this trait's
    /// responsibility to restore -- callers wrap every invocation in
    /// [`crate::undi_call::a20_guarded`], which calls
    /// [`CallGate::a20_enable`] unconditionally on every exit path.
    fn call(&self, entry: SegOff, opcode: u16, params: SegOff) -> CallResult;

    /// Install `handler` as the INT 1Ah vector, returning the previously
    /// installed vector so it can be restored later. Returns `None` if the
    /// vector could not be hooked.
    fn hook_int1a(&self, handler: SegOff) -> Option<SegOff>;

    /// Restore `saved` as the INT 1Ah vector. Returns `false` if the
    /// vector could not be restored (e.g. something else silently
    /// overwrote the live vector in the meantime).
    fn unhook_int1a(&self, saved: SegOff) -> bool;

    /// Unconditionally re-enable the A20 gate. Some UNDI drivers disable
    /// A20 and never restore it.
    fn a20_enable(&self);
}

/// The NIC media-access driver contract this core consumes. Concrete
/// drivers (e1000-style ring buffers, a loaded UNDI ROM, ...) live outside
/// this crate; the core only ever calls these methods.
pub trait NetDevice {
    /// The device's link-layer (MAC) address.
    fn mac(&self) -> [u8; 6];

    /// Maximum transmission unit, in bytes, excluding the link-layer
    /// header.
    fn mtu(&self) -> u16;

    /// The I/O base address reported by `UNDI_GET_INFORMATION`.
    fn io_base(&self) -> u32;

    /// The IRQ line currently assigned to the device.
    fn irq(&self) -> u8;

    /// Probe for and attach to a device matching `selector`. Returns
    /// `false` if no matching device could be brought up.
    fn probe(&self, selector: PciSelector) -> bool;

    /// Whether the device is already initialised from a previous run
    /// (e.g. left in `disable = 0` state by a prior stack instance).
    fn already_up(&self) -> bool {
        false
    }

    /// Quiesce the device: disable its IRQ and stop DMA. Used when
    /// transitioning from `Ready` down to `Midway`.
    fn deactivate(&self);

    /// Acknowledge the device interrupt (if any) and enqueue any received
    /// packet, reporting whether the TX queue has drained.
    fn poll(&self) -> PollResult;

    /// Enable or disable the device's IRQ line.
    fn irq_enable(&self, enable: bool);

    /// Pop one received frame, if any is queued.
    fn recv(&self) -> Option<alloc::vec::Vec<u8>>;

    /// Hand one frame to the device for transmission. Returns `false` if
    /// the device's transmit ring is full.
    fn tx(&self, frame: &[u8]) -> bool;
}

/// A window over the bytes of conventional/ROM memory -- read by
/// [`crate::scan`], [`crate::loader`], and [`crate::tx`], written by
/// handlers that hand the NBP a copy of core-owned data (`GET_CACHED_INFO`,
/// `UDP_READ`). Kept separate from [`NetDevice`] because the scanner runs
/// before any device has been identified.
pub trait MemoryView {
    /// Read up to `len` bytes starting at the flat physical address
    /// `phys`. May return fewer bytes than requested near the top of the
    /// view; never panics on an out-of-range request.
    fn read(&self, phys: u32, len: usize) -> alloc::vec::Vec<u8>;

    /// Write `bytes` starting at the flat physical address `phys`. Returns
    /// `false` if the range could not be written (e.g. it falls outside
    /// memory the backend is willing to touch).
    fn write(&self, phys: u32, bytes: &[u8]) -> bool;
}

/// Errors a transport (TFTP/UDP/ARP) can hand back to the core. The core
/// does not interpret these beyond forwarding the [`crate::status::Status`]
/// they carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportError(pub crate::status::Status);

/// TFTP/UDP/ARP services consumed by the core but implemented elsewhere.
pub trait Transport {
    /// Read an entire file over TFTP into `dest`, returning the number of
    /// bytes written.
    fn tftp_read_file(&self, name: &str, dest: SegOff) -> Result<u32, TransportError>;

    /// Best-effort UDP datagram send.
    fn udp_write(
        &self,
        dest_ip: core::net::Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        packet: &[u8],
    ) -> Result<(), TransportError>;

    /// Poll for an inbound UDP datagram on `port`, copying up to
    /// `buf.len()` bytes into `buf`. Returns the number of bytes received.
    fn udp_read(
        &self,
        port: u16,
        buf: &mut [u8],
    ) -> Result<u32, TransportError>;

    /// Resolve the MAC address for `ip`, if known or resolvable.
    fn arp(&self, ip: core::net::Ipv4Addr) -> Option<[u8; 6]>;
}

/// Trace/diagnostic output sink. The concrete console (serial port, video
/// memory, ...) is a platform concern; this crate only ever writes
/// through this trait via the `pxe_trace!`/`pxe_warn!` macros in
/// [`crate::trace`].
pub trait Console {
    fn write_str(&self, s: &str);
}

/// The E820-mangler hook [`crate::hidemem`] installs/removes. Kept
/// separate from [`CallGate`]'s INT 1Ah hook because the two vectors
/// (INT 1Ah vs INT 15h) are owned and gated independently by the readiness
/// state machine -- hiding memory is a `Midway`-or-above concern, the PXE
/// call vector is the thing that makes `Midway` reachable in the first
/// place.
pub trait Hidemem {
    /// Install the mangler so that the byte range `[base, base + len)`
    /// (the core's own working area: runtime structures, UNDI driver
    /// segments, arena-tracked allocations) is reported as reserved/absent
    /// in any subsequent INT 15h, `E820` query. Returns `false` if the
    /// mangler could not be installed.
    fn hide(&self, base: u32, len: u32) -> bool;

    /// Remove the mangler, restoring the original INT 15h, `E820` behaviour.
    /// Returns `false` if something else (e.g. a badly-behaved UNDI loader
    /// or NBP) has since overwritten the hook, in which case it must be
    /// treated as fatal by the caller -- see [`crate::state::ensure_state`].
    fn unhide(&self) -> bool;
}

/// Platform bring-up/teardown primitives: everything this crate needs
/// from "the rest of the firmware" that isn't the NIC, the UNDI driver, or
/// a transport.
pub trait Platform {
    /// Jump to the NBP's entry point, never returning. Used by
    /// `PXENV_RESTART_TFTP` after the replacement boot sector has been
    /// fetched to `0000:7C00`.
    fn restart_nbp(&self, entry: SegOff) -> !;

    /// Busy-wait for approximately `us` microseconds.
    fn sleep_us(&self, us: u32);

    /// Perform a controlled hard reset of the boot environment. This is
    /// the Rust analogue of `longjmp(restart_etherboot)`: called only for
    /// `CoreError::Fatal` conditions the dispatcher cannot recover from.
    fn fatal_restart(&self) -> !;
}
