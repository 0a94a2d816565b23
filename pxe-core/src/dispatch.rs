//! API dispatcher: the single entry point every PXENV/UNDI opcode goes
//! through (§4.2).
//!
//! `api_call` always writes the caller's `status` field before returning,
//! per §8's "for every `api_call` return, `params.status` was written" --
//! this is the one fold point between [`CoreError`] and the wire-level
//! [`Status`]/[`Exit`] pair (§7.1).

use alloc::vec::Vec;

use crate::env::PciSelector;
use crate::error::CoreError;
use crate::far_ptr::SegOff;
use crate::loader::{self, LoaderInput};
use crate::params::*;
use crate::state::{ensure_state, StackState};
use crate::status::{Exit, Status};
use crate::tx::{self, UndiTransmitParams};
use crate::Stack;

/// PXENV/UNDI opcode numbers this dispatcher recognizes (Intel PXE 2.1).
pub mod opcode {
    pub const START_UNDI: u16 = 0x0000;
    pub const UNDI_STARTUP: u16 = 0x0001;
    pub const UNDI_CLEANUP: u16 = 0x0002;
    pub const UNDI_INITIALIZE: u16 = 0x0003;
    pub const UNDI_RESET: u16 = 0x0004;
    pub const UNDI_SHUTDOWN: u16 = 0x0005;
    pub const UNDI_OPEN: u16 = 0x0006;
    pub const UNDI_CLOSE: u16 = 0x0007;
    pub const UNDI_TRANSMIT: u16 = 0x0008;
    pub const UNDI_SET_MCAST_ADDRESS: u16 = 0x0009;
    pub const UNDI_SET_STATION_ADDRESS: u16 = 0x000A;
    pub const UNDI_SET_PACKET_FILTER: u16 = 0x000B;
    pub const UNDI_GET_INFORMATION: u16 = 0x000C;
    pub const UNDI_STATISTICS: u16 = 0x000D;
    pub const UNDI_ISR: u16 = 0x0014;
    pub const STOP_UNDI: u16 = 0x0015;
    pub const TFTP_OPEN: u16 = 0x0020;
    pub const TFTP_CLOSE: u16 = 0x0021;
    pub const TFTP_READ: u16 = 0x0022;
    pub const TFTP_READ_FILE: u16 = 0x0023;
    pub const TFTP_GET_FSIZE: u16 = 0x0025;
    pub const UDP_OPEN: u16 = 0x0030;
    pub const UDP_CLOSE: u16 = 0x0031;
    pub const UDP_WRITE: u16 = 0x0033;
    pub const UDP_READ: u16 = 0x0032;
    pub const UNLOAD_STACK: u16 = 0x0070;
    pub const GET_CACHED_INFO: u16 = 0x0071;
    pub const RESTART_TFTP: u16 = 0x0073;
    pub const START_BASE: u16 = 0x0075;
    pub const STOP_BASE: u16 = 0x0076;
    pub const UNDI_LOADER: u16 = crate::loader::UNDI_LOADER_PSEUDO_OPCODE;
}

/// One call's worth of opcode-specific parameters, passed by mutable
/// reference so `api_call` can both read the request and write the
/// response fields the same PXE parameter block carries. Each variant's
/// tag must match the `opcode` argument passed alongside it -- `api_call`
/// asserts this with [`CoreError::InvalidParameter`] rather than trusting
/// the caller.
pub enum ApiParams<'p> {
    StartUndi(&'p mut StartUndiParams),
    UndiStartup(&'p mut UndiStartupParams),
    UndiCleanup(&'p mut UndiCleanupParams),
    UndiInitialize(&'p mut UndiInitParams),
    UndiReset(&'p mut UndiResetParams),
    UndiShutdown(&'p mut UndiShutdownParams),
    UndiOpen(&'p mut UndiOpenParams),
    UndiClose(&'p mut UndiCloseParams),
    UndiTransmit(&'p mut UndiTransmitParams, &'p mut u16),
    UndiSetStationAddress(&'p mut UndiSetStationAddressParams),
    UndiGetInformation(&'p mut UndiGetInformationParams),
    StopUndi(&'p mut StopUndiParams),
    UnloadStack(&'p mut UnloadStackParams),
    GetCachedInfo(&'p mut GetCachedInfoParams),
    RestartTftp(&'p mut RestartTftpParams),
    UdpWrite(&'p mut UdpWriteParams),
    UdpRead(&'p mut UdpReadParams),
    StartBase(&'p mut u16),
    StopBase(&'p mut u16),
    UndiLoader {
        status: &'p mut u16,
        loader_entry: SegOff,
        code_size: u32,
        data_size: u32,
        pci: PciSelector,
        pnp_bios: SegOff,
    },
    Unsupported(&'p mut u16),
}

/// Drive one opcode through to completion against `stack`. Always writes a
/// status into the parameter block referenced by `params`, and always
/// returns `Exit::Success`/`Exit::Failure` to match.
pub fn api_call(stack: &mut Stack, opcode: u16, params: &mut ApiParams) -> Exit {
    let result = dispatch_one(stack, opcode, params);
    let status = match &result {
        Ok(()) => Status::Success,
        Err(CoreError::Fatal(msg)) => {
            pxe_warn!(stack, "fatal: {}", msg);
            if let Some(platform) = stack.platform() {
                platform.fatal_restart();
            }
            Status::KeepAll
        }
        Err(e) => e.status(),
    };
    write_status(params, status.code());
    if result.is_ok() { Exit::Success } else { Exit::Failure }
}

fn write_status(params: &mut ApiParams, code: u16) {
    match params {
        ApiParams::StartUndi(p) => p.status = code,
        ApiParams::UndiStartup(p) => p.status = code,
        ApiParams::UndiCleanup(p) => p.status = code,
        ApiParams::UndiInitialize(p) => p.status = code,
        ApiParams::UndiReset(p) => p.status = code,
        ApiParams::UndiShutdown(p) => p.status = code,
        ApiParams::UndiOpen(p) => p.status = code,
        ApiParams::UndiClose(p) => p.status = code,
        ApiParams::UndiTransmit(_, status) => **status = code,
        ApiParams::UndiSetStationAddress(p) => p.status = code,
        ApiParams::UndiGetInformation(p) => p.status = code,
        ApiParams::StopUndi(p) => p.status = code,
        ApiParams::UnloadStack(p) => p.status = code,
        ApiParams::GetCachedInfo(p) => p.status = code,
        ApiParams::RestartTftp(p) => p.status = code,
        ApiParams::UdpWrite(p) => p.status = code,
        ApiParams::UdpRead(p) => p.status = code,
        ApiParams::StartBase(status) => **status = code,
        ApiParams::StopBase(status) => **status = code,
        ApiParams::UndiLoader { status, .. } => **status = code,
        ApiParams::Unsupported(status) => **status = code,
    }
}

fn dispatch_one(stack: &mut Stack, opcode: u16, params: &mut ApiParams) -> Result<(), CoreError> {
    match (opcode, params) {
        (opcode::START_UNDI, ApiParams::StartUndi(p)) => {
            require(stack, StackState::Midway)?;
            stack.undi.pci = p.pci();
            Ok(())
        }
        (opcode::UNDI_STARTUP, ApiParams::UndiStartup(_)) => {
            require(stack, StackState::Midway)?;
            stack.undi.prestarted = true;
            Ok(())
        }
        (opcode::UNDI_CLEANUP, ApiParams::UndiCleanup(_)) => {
            require(stack, StackState::Midway)?;
            stack.undi.prestarted = false;
            Ok(())
        }
        (opcode::UNDI_INITIALIZE, ApiParams::UndiInitialize(_)) => {
            require(stack, StackState::Midway)?;
            stack.undi.initialized = true;
            Ok(())
        }
        (opcode::UNDI_RESET, ApiParams::UndiReset(_)) => {
            require(stack, StackState::Ready)?;
            stack.isr.reset();
            Ok(())
        }
        (opcode::UNDI_SHUTDOWN, ApiParams::UndiShutdown(_)) => {
            require(stack, StackState::Midway)?;
            stack.undi.initialized = false;
            Ok(())
        }
        (opcode::UNDI_OPEN, ApiParams::UndiOpen(_)) => {
            require(stack, StackState::Ready)?;
            stack.undi.opened = true;
            Ok(())
        }
        (opcode::UNDI_CLOSE, ApiParams::UndiClose(_)) => {
            require(stack, StackState::Ready)?;
            stack.undi.opened = false;
            stack.isr.reset();
            Ok(())
        }
        (opcode::UNDI_TRANSMIT, ApiParams::UndiTransmit(p, _)) => {
            require(stack, StackState::Ready)?;
            let mem = stack.mem().ok_or(CoreError::InvalidState)?;
            tx::transmit(mem, stack.net(), p)?;
            stack.isr.note_transmit_queued();
            Ok(())
        }
        (opcode::UNDI_SET_STATION_ADDRESS, ApiParams::UndiSetStationAddress(p)) => {
            require(stack, StackState::Ready)?;
            if p.station_address == stack.net().mac() {
                Ok(())
            } else {
                Err(CoreError::Unsupported)
            }
        }
        (opcode::UNDI_GET_INFORMATION, ApiParams::UndiGetInformation(p)) => {
            require(stack, StackState::Ready)?;
            let net = stack.net();
            p.base_io = net.io_base() as u16;
            p.int_number = net.irq() as u16;
            p.max_tran_unit = net.mtu();
            p.hw_type = HW_TYPE_ETHERNET;
            p.hw_addr_len = 6;
            p.current_node_address = [0; 16];
            p.current_node_address[..6].copy_from_slice(&net.mac());
            p.permanent_node_address = p.current_node_address;
            Ok(())
        }
        (opcode::STOP_UNDI, ApiParams::StopUndi(_)) => {
            if !ensure_state(stack, StackState::Unloaded) {
                return Err(stop_undi_unreachable());
            }
            Ok(())
        }
        (opcode::UNLOAD_STACK, ApiParams::UnloadStack(_)) => {
            if !ensure_state(stack, StackState::Unloaded) {
                return Err(CoreError::Fatal("stack could not reach Unloaded for UNLOAD_STACK"));
            }
            if let Some(platform) = stack.platform() {
                let _ = platform;
            }
            Ok(())
        }
        (opcode::GET_CACHED_INFO, ApiParams::GetCachedInfo(p)) => {
            require(stack, StackState::Ready)?;
            let ty = crate::records::CachedPacketType::from_wire(p.packet_type)
                .ok_or(CoreError::InvalidParameter("packet_type"))?;
            let buffer = p.buffer;
            if buffer.is_null() {
                // Open Question resolution: Buffer == 0 is the
                // pointer-to-cache path regardless of BufferSize.
                p.buffer = stack.cache.addr(ty);
                p.buffer_size = crate::records::BOOTP_PACKET_SIZE as u16;
            } else {
                let mem = stack.mem().ok_or(CoreError::InvalidState)?;
                let len = (p.buffer_size as usize).min(crate::records::BOOTP_PACKET_SIZE);
                let bytes = stack.cache.bytes(ty, len);
                if !mem.write(buffer.linear(), bytes) {
                    return Err(CoreError::OutOfResources);
                }
                p.buffer_size = len as u16;
            }
            Ok(())
        }
        (opcode::RESTART_TFTP, ApiParams::RestartTftp(p)) => {
            require(stack, StackState::Ready)?;
            let transport = stack.transport().ok_or(CoreError::InvalidState)?;
            let name = core::str::from_utf8(&p.file_name)
                .unwrap_or("")
                .trim_end_matches('\0');
            transport
                .tftp_read_file(name, SegOff::new(0x0000, 0x7C00))
                .map_err(|e| CoreError::Transport(e.0))?;
            stack.cache.note_restart_tftp_filename(name.as_bytes());
            if let Some(platform) = stack.platform() {
                platform.restart_nbp(SegOff::new(0x0000, 0x7C00));
            }
            Ok(())
        }
        (opcode::START_BASE, ApiParams::StartBase(_)) => Err(CoreError::Unsupported),
        (opcode::STOP_BASE, ApiParams::StopBase(_)) => Ok(()),
        (
            opcode::UNDI_LOADER,
            ApiParams::UndiLoader { loader_entry, code_size, data_size, pci, pnp_bios, .. },
        ) => {
            let mem = stack.mem.ok_or(CoreError::InvalidState)?;
            let input = LoaderInput { pci: *pci, pnp_bios: *pnp_bios };
            let loaded = loader::load_undi(
                &mut stack.arena,
                stack.gate,
                stack.hide,
                mem,
                *loader_entry,
                *code_size,
                *data_size,
                stack.hidden_region,
                input,
            )?;
            stack.undi.pxe_ptr = Some(loaded.pxe_ptr);
            stack.undi.code_region = Some(loaded.code_region);
            stack.undi.data_region = Some(loaded.data_region);
            Ok(())
        }
        (
            opcode::UNDI_SET_MCAST_ADDRESS
            | opcode::UNDI_SET_PACKET_FILTER
            | opcode::UNDI_STATISTICS,
            ApiParams::Unsupported(_),
        ) => {
            pxe_trace!(stack, "opcode {:#06x} is out of scope", opcode);
            Err(CoreError::Unsupported)
        }
        (opcode::TFTP_READ_FILE, ApiParams::Unsupported(_)) => {
            require(stack, StackState::Ready)?;
            Err(CoreError::Unsupported)
        }
        (opcode::TFTP_OPEN | opcode::TFTP_CLOSE | opcode::TFTP_READ | opcode::TFTP_GET_FSIZE,
         ApiParams::Unsupported(_)) => {
            require(stack, StackState::Ready)?;
            Ok(())
        }
        (opcode::UDP_OPEN | opcode::UDP_CLOSE, ApiParams::Unsupported(_)) => {
            require(stack, StackState::Ready)?;
            Ok(())
        }
        (opcode::UDP_WRITE, ApiParams::UdpWrite(p)) => {
            require(stack, StackState::Ready)?;
            let transport = stack.transport().ok_or(CoreError::InvalidState)?;
            let mem = stack.mem().ok_or(CoreError::InvalidState)?;
            let buffer = p.buffer;
            let len = p.buffer_size as usize;
            let packet = mem.read(buffer.linear(), len);
            if packet.len() < len {
                return Err(CoreError::InvalidParameter("buffer"));
            }
            let ip = core::net::Ipv4Addr::from(p.ip.to_be_bytes());
            transport
                .udp_write(ip, p.src_port, p.dst_port, &packet)
                .map_err(|e| CoreError::Transport(e.0))?;
            Ok(())
        }
        (opcode::UDP_READ, ApiParams::UdpRead(p)) => {
            require(stack, StackState::Ready)?;
            let transport = stack.transport().ok_or(CoreError::InvalidState)?;
            let mem = stack.mem().ok_or(CoreError::InvalidState)?;
            let buffer = p.buffer;
            let mut buf = Vec::with_capacity(p.buffer_size as usize);
            buf.resize(p.buffer_size as usize, 0);
            let n = transport
                .udp_read(p.d_port, &mut buf)
                .map_err(|e| CoreError::Transport(e.0))?;
            if !mem.write(buffer.linear(), &buf[..n as usize]) {
                return Err(CoreError::OutOfResources);
            }
            p.buffer_size = n as u16;
            Ok(())
        }
        _ => {
            pxe_trace!(stack, "unrecognised opcode {:#06x}", opcode);
            Err(CoreError::Unsupported)
        }
    }
}

fn require(stack: &mut Stack, target: StackState) -> Result<(), CoreError> {
    if ensure_state(stack, target) {
        Ok(())
    } else {
        Err(CoreError::InvalidState)
    }
}

/// `STOP_UNDI` has its own status override: `KEEP_UNDI`, not the blanket
/// `InvalidState` mapping, when `Unloaded` cannot be reached (§4.2 table).
fn stop_undi_unreachable() -> CoreError {
    CoreError::Transport(Status::KeepUndi)
}

/// Run one `UNDI_ISR` sub-opcode. Exempt from the dispatcher's normal
/// readiness gate (§4.2, §5): callers may reach this from a hardware
/// interrupt, so it hard-checks `Ready` itself rather than calling
/// `ensure_state`, which could attempt a transition from interrupt context.
pub fn undi_isr(stack: &mut Stack, op: crate::isr::IsrOp) -> crate::isr::IsrOutcome {
    if stack.state != StackState::Ready {
        return crate::isr::IsrOutcome::InvalidState;
    }
    if !stack.try_enter_isr() {
        return crate::isr::IsrOutcome::Busy;
    }
    let outcome = crate::isr::isr_cycle(&mut stack.isr, stack.net, op);
    stack.leave_isr();
    outcome
}
