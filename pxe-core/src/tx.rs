//! Transmit builder: assembles an outbound frame from a TBD's immediate
//! and gather blocks, selects the network protocol, and adds a link-layer
//! header when one is required (§4.6).

use alloc::vec::Vec;

use crate::env::{MemoryView, NetDevice};
use crate::error::CoreError;
use crate::far_ptr::SegOff;
use crate::records::Tbd;

/// `UNDI_TRANSMIT`'s `Protocol` field values (Intel PXE 2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Unknown,
    Ip,
    Arp,
    Rarp,
}

impl Protocol {
    fn from_wire(v: u16) -> Option<Self> {
        match v {
            0 => Some(Protocol::Unknown),
            1 => Some(Protocol::Ip),
            2 => Some(Protocol::Arp),
            3 => Some(Protocol::Rarp),
            _ => None,
        }
    }

    /// The EtherType this protocol pushes into the link-layer header.
    /// `Unknown` never reaches this: it takes the no-header path.
    fn ethertype(self) -> u16 {
        match self {
            Protocol::Ip => 0x0800,
            Protocol::Arp => 0x0806,
            Protocol::Rarp => 0x8035,
            Protocol::Unknown => 0,
        }
    }
}

/// `XmitFlag` values: whether the caller supplied an explicit destination
/// address or wants a link-layer broadcast.
pub const XMIT_DESTADDR: u16 = 0;
pub const XMIT_BROADCAST: u16 = 1;

/// Ethernet header length and address length -- the only link-layer this
/// core builds headers for.
const LL_HEADER_LEN: usize = 14;
const LL_ADDR_LEN: usize = 6;
const LL_BROADCAST: [u8; LL_ADDR_LEN] = [0xFF; LL_ADDR_LEN];

/// The `UNDI_TRANSMIT` parameter block (Intel PXE 2.1, trimmed to the
/// fields this core's algorithm actually reads).
#[derive(Debug, Clone, Copy)]
pub struct UndiTransmitParams {
    pub protocol: u16,
    pub xmit_flag: u16,
    /// Far pointer to a `LL_ADDR_LEN`-byte destination address, valid only
    /// when `xmit_flag == XMIT_DESTADDR`.
    pub dest_addr: SegOff,
    /// Far pointer to the caller's [`Tbd`].
    pub tbd: SegOff,
}

/// Build and send one frame per §4.6's algorithm. On success, the caller
/// (the `UNDI_TRANSMIT` handler) is responsible for incrementing the
/// outstanding-TX counter -- this function only builds and hands the frame
/// to the device.
pub fn transmit(
    mem: &dyn MemoryView,
    net: &dyn NetDevice,
    params: &UndiTransmitParams,
) -> Result<(), CoreError> {
    let tbd_bytes = mem.read(params.tbd.linear(), core::mem::size_of::<Tbd>());
    let tbd = Tbd::from_bytes(&tbd_bytes)
        .ok_or(CoreError::InvalidParameter("tbd"))?;

    if tbd.data_blk_count as usize > crate::records::MAX_DATA_BLKS {
        return Err(CoreError::InvalidParameter("data_blk_count"));
    }

    let protocol = Protocol::from_wire(params.protocol)
        .ok_or(CoreError::InvalidParameter("protocol"))?;

    let needs_header = !matches!(protocol, Protocol::Unknown);
    let head_room = if needs_header { LL_HEADER_LEN } else { 0 };

    let payload_len = tbd.immed_length as usize
        + tbd.active_blocks().iter().map(|b| b.len as usize).sum::<usize>();

    let mut frame = Vec::with_capacity(head_room + payload_len);
    frame.resize(head_room, 0);

    if tbd.immed_length > 0 {
        let immed = mem.read(tbd.xmit.linear(), tbd.immed_length as usize);
        if immed.len() < tbd.immed_length as usize {
            return Err(CoreError::InvalidParameter("immed"));
        }
        frame.extend_from_slice(&immed);
    }
    for blk in tbd.active_blocks() {
        let data = mem.read(blk.ptr.linear(), blk.len as usize);
        if data.len() < blk.len as usize {
            return Err(CoreError::InvalidParameter("data_blk"));
        }
        frame.extend_from_slice(&data);
    }

    if needs_header {
        let dest = if params.xmit_flag == XMIT_DESTADDR {
            let addr = mem.read(params.dest_addr.linear(), LL_ADDR_LEN);
            if addr.len() < LL_ADDR_LEN {
                return Err(CoreError::InvalidParameter("dest_addr"));
            }
            let mut dest = [0u8; LL_ADDR_LEN];
            dest.copy_from_slice(&addr);
            dest
        } else {
            LL_BROADCAST
        };
        push_ethernet(&mut frame, dest, net.mac(), protocol.ethertype());
    }

    if !net.tx(&frame) {
        return Err(CoreError::OutOfResources);
    }

    Ok(())
}

/// Write a 14-byte Ethernet header into the head-room reserved at the
/// front of `frame`.
fn push_ethernet(frame: &mut [u8], dest: [u8; 6], src: [u8; 6], ethertype: u16) {
    frame[0..6].copy_from_slice(&dest);
    frame[6..12].copy_from_slice(&src);
    frame[12..14].copy_from_slice(&ethertype.to_be_bytes());
}
