//! `PXENV_*`/`UNDI_*` parameter block layouts (Intel PXE 2.1), trimmed to
//! the fields this core's handlers actually read or write.
//!
//! Every block begins with a 16-bit `status` field per the PXE calling
//! convention -- `dispatch::api_call` is the only code that writes it, per
//! `error.rs`'s "single fold point" rule; handlers below only read their
//! own input fields and set their own output fields.

use crate::env::PciSelector;
use crate::far_ptr::SegOff;

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct StartUndiParams {
    pub status: u16,
    pub ax: u16,
    pub bx: u16,
    pub dx: u16,
    pub di: u16,
    pub es: u16,
}

impl StartUndiParams {
    /// `bus:devfn` packed the way the real PXE `AX` register carries it.
    pub fn pci(&self) -> PciSelector {
        PciSelector {
            bus: (self.ax >> 8) as u8,
            devfn: (self.ax & 0xFF) as u8,
            vendor: 0,
            device: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UndiStartupParams {
    pub status: u16,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UndiCleanupParams {
    pub status: u16,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UndiInitParams {
    pub status: u16,
    pub protocol_ini: SegOff,
    pub protocol_ini_len: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UndiResetParams {
    pub status: u16,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UndiShutdownParams {
    pub status: u16,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UndiOpenParams {
    pub status: u16,
    pub open_flag: u16,
    pub pkt_filter: u16,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UndiCloseParams {
    pub status: u16,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UndiSetStationAddressParams {
    pub status: u16,
    pub station_address: [u8; 6],
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UndiGetInformationParams {
    pub status: u16,
    pub base_io: u16,
    pub int_number: u16,
    pub max_tran_unit: u16,
    pub hw_type: u16,
    pub hw_addr_len: u16,
    pub current_node_address: [u8; 16],
    pub permanent_node_address: [u8; 16],
    pub rom_addr: u16,
    pub rx_buf_ct: u16,
    pub tx_buf_ct: u16,
}

/// `HwType` value this core always reports: Ethernet (`1`), the only
/// link-layer it builds headers for (§4.6).
pub const HW_TYPE_ETHERNET: u16 = 1;

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct StopUndiParams {
    pub status: u16,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UnloadStackParams {
    pub status: u16,
}

/// `PXENV_GET_CACHED_INFO`'s parameter block. `buffer == SegOff::NULL`
/// (regardless of `buffer_size`) is treated as "give me a pointer to your
/// own copy" -- Open Question resolution (§9): `BufferSize != 0` with a
/// null `Buffer` is still the null-buffer case, not a malformed request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct GetCachedInfoParams {
    pub status: u16,
    pub packet_type: u16,
    pub buffer_size: u16,
    pub buffer: SegOff,
    pub buffer_limit: u16,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct RestartTftpParams {
    pub status: u16,
    pub file_name: [u8; 128],
    pub buffer_size: u16,
    pub buffer: SegOff,
    pub server_ip: u32,
    pub gateway_ip: u32,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UdpWriteParams {
    pub status: u16,
    pub ip: u32,
    pub gw: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub buffer_size: u16,
    pub buffer: SegOff,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct UdpReadParams {
    pub status: u16,
    pub src_ip: u32,
    pub dest_ip: u32,
    pub s_port: u16,
    pub d_port: u16,
    pub buffer_size: u16,
    pub buffer: SegOff,
}
