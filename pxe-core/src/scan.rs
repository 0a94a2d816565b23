//! UNDI driver discovery: the pixie hunt and the UNDI ROM hunt (§4.3).
//!
//! Both probes read only through [`crate::env::MemoryView`] -- never a raw
//! pointer -- so they can be driven in tests against a plain in-memory
//! byte array standing in for conventional/ROM memory.

use crate::env::{MemoryView, PciSelector};
use crate::far_ptr::SegOff;
use crate::records::{checksum, PxeRecord};

/// Top of conventional memory the pixie hunt starts scanning from,
/// descending.
pub const PIXIE_HUNT_TOP: u32 = 0xA_0000;

/// Step size (bytes) for the pixie hunt: `!PXE` records are placed
/// paragraph-aligned.
const PIXIE_STEP: u32 = 16;

/// `[ROM_HUNT_START, ROM_HUNT_END)`: the option-ROM address window scanned
/// for `55 AA` signatures.
pub const ROM_HUNT_START: u32 = 0x0C_0000;
pub const ROM_HUNT_END: u32 = 0x10_0000;

/// Step size (bytes) for the UNDI ROM hunt: option ROMs are placed on 2 KiB
/// boundaries.
const ROM_STEP: u32 = 2048;

/// Outcome of a successful pixie hunt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pixie {
    pub base: u32,
    pub record: PxeRecord,
}

/// Outcome of a successful UNDI ROM hunt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndiRom {
    pub rom_base: u32,
    pub pcir_offset: u16,
    pub pnp_offset: Option<u16>,
    pub undi_rom_id_offset: u16,
}

/// Scans conventional and option-ROM memory for the structures the UNDI
/// loader needs, resuming where the previous call left off (`ptr` ratchets
/// monotonically downward across calls, per §4.3's "ties are impossible"
/// edge case note).
pub struct Scanner<'a> {
    mem: &'a dyn MemoryView,
    pixie_cursor: u32,
}

impl<'a> Scanner<'a> {
    pub fn new(mem: &'a dyn MemoryView) -> Self {
        Self { mem, pixie_cursor: PIXIE_HUNT_TOP }
    }

    /// Search conventional memory downward from the last resume point for
    /// an installed `!PXE` structure. `free_base_memory_top` is the
    /// boundary below which memory is still considered free (and so an
    /// `!PXE` found there is never reused, only warned about).
    ///
    /// On success, ratchets the internal cursor below the found record so
    /// a subsequent call resumes past it, and returns the candidate. The
    /// caller (`loader`/`state`) is responsible for calling
    /// `UNLOAD_BASE_CODE` then `STOP_UNDI` on the found pixie per §4.3; this
    /// function only finds it.
    pub fn pixie_hunt(&mut self, free_base_memory_top: u32) -> Option<Pixie> {
        let mut addr = self.pixie_cursor;
        while addr >= PIXIE_STEP {
            addr -= PIXIE_STEP;
            let bytes = self.mem.read(addr, core::mem::size_of::<PxeRecord>());
            if bytes.len() < 5 || &bytes[0..4] != b"!PXE" {
                continue;
            }
            let struct_len = bytes[4] as usize;
            if struct_len == 0 || struct_len > bytes.len() {
                continue;
            }
            if checksum(&bytes[..struct_len]) != 0 {
                continue;
            }
            if addr < free_base_memory_top {
                // Lies inside memory an earlier allocator can still reuse:
                // never used, only logged about by the caller.
                self.pixie_cursor = addr;
                continue;
            }
            let record = match PxeRecord::validate(&bytes) {
                Some(r) => r,
                None => continue,
            };
            self.pixie_cursor = addr;
            return Some(Pixie { base: addr, record });
        }
        self.pixie_cursor = 0;
        None
    }

    /// Whether the pixie hunt has exhausted its search window.
    pub fn pixie_hunt_exhausted(&self) -> bool {
        self.pixie_cursor < PIXIE_STEP
    }

    /// Scan `[ROM_HUNT_START, ROM_HUNT_END)` for an option ROM matching
    /// `selector`. Non-PCI selectors (`selector.vendor == 0`) skip the hunt
    /// entirely, per §4.3.
    pub fn undi_rom_hunt(&self, selector: PciSelector) -> Option<UndiRom> {
        if selector.vendor == 0 {
            return None;
        }
        let mut addr = ROM_HUNT_START;
        while addr < ROM_HUNT_END {
            if self.rom_signature_matches(addr) {
                if let Some(rom) = self.validate_rom(addr, selector) {
                    return Some(rom);
                }
            }
            addr += ROM_STEP;
        }
        None
    }

    fn rom_signature_matches(&self, addr: u32) -> bool {
        let hdr = self.mem.read(addr, 2);
        hdr.len() == 2 && hdr[0] == 0x55 && hdr[1] == 0xAA
    }

    fn validate_rom(&self, rom_base: u32, selector: PciSelector) -> Option<UndiRom> {
        // Option ROM header: [0]=0x55 [1]=0xAA [2]=size/512 [3..]=init vector
        // [0x18..0x1A]=PCIR offset, [0x1A..0x1C]=PnP offset (the position
        // of both pointers is a de-facto convention, not strictly part of
        // the PCI spec, but is what every PCI option ROM in practice uses).
        let hdr = self.mem.read(rom_base, 0x20);
        if hdr.len() < 0x20 {
            return None;
        }
        let pcir_offset = u16::from_le_bytes([hdr[0x18], hdr[0x19]]);
        let pnp_offset = u16::from_le_bytes([hdr[0x1A], hdr[0x1B]]);

        // pcir_offset == 0 means "not present", not "at the start of the
        // ROM" -- a device with no PCIR header fails the match outright.
        if pcir_offset == 0 {
            return None;
        }
        let pcir = self.mem.read(rom_base + pcir_offset as u32, 0x18);
        if pcir.len() < 0x18 || &pcir[0..4] != b"PCIR" {
            return None;
        }
        let vendor_id = u16::from_le_bytes([pcir[4], pcir[5]]);
        let device_id = u16::from_le_bytes([pcir[6], pcir[7]]);
        if vendor_id != selector.vendor || device_id != selector.device {
            return None;
        }

        let pnp_offset = if pnp_offset == 0 {
            None
        } else {
            let pnp_hdr = self.mem.read(rom_base + pnp_offset as u32, 0x21);
            if pnp_hdr.len() < 0x21 || &pnp_hdr[0..4] != b"$PnP" {
                return None;
            }
            let len_bytes = pnp_hdr[5] as usize * 16;
            if len_bytes == 0 || len_bytes > pnp_hdr.len() {
                return None;
            }
            if checksum(&pnp_hdr[..len_bytes]) != 0 {
                return None;
            }
            Some(pnp_offset)
        };

        // UNDI ROM ID structure: signature "UNDI" + checksum over its own
        // struct_length, located via a pointer at a fixed offset inside
        // the PCIR header's vendor-defined area. We model it as living
        // immediately after the PCIR header, which is where the reference
        // UNDI ROM layout places it.
        let undi_rom_id_offset = pcir_offset + 0x18;
        if undi_rom_id_offset == 0 {
            return None;
        }
        let undi_hdr = self.mem.read(rom_base + undi_rom_id_offset as u32, 0x20);
        if undi_hdr.len() < 6 || &undi_hdr[0..4] != b"UNDI" {
            return None;
        }
        let struct_length = undi_hdr[4] as usize;
        if struct_length == 0 || struct_length > undi_hdr.len() {
            return None;
        }
        if checksum(&undi_hdr[..struct_length]) != 0 {
            return None;
        }

        Some(UndiRom { rom_base, pcir_offset, pnp_offset, undi_rom_id_offset })
    }
}

/// Far pointer to the `$PnP` BIOS table discovered alongside a matched
/// [`UndiRom`], if any -- fed to the loader's input structure per §4.4.
pub fn pnp_bios_pointer(rom: &UndiRom) -> SegOff {
    match rom.pnp_offset {
        Some(off) => SegOff::from_linear(rom.rom_base + off as u32),
        None => SegOff::NULL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use alloc::vec;

    struct FakeMem {
        bytes: Vec<u8>,
        base: u32,
    }

    impl MemoryView for FakeMem {
        fn read(&self, phys: u32, len: usize) -> Vec<u8> {
            if phys < self.base {
                return Vec::new();
            }
            let off = (phys - self.base) as usize;
            if off >= self.bytes.len() {
                return Vec::new();
            }
            let end = (off + len).min(self.bytes.len());
            self.bytes[off..end].to_vec()
        }
        fn write(&self, _phys: u32, _bytes: &[u8]) -> bool {
            false
        }
    }

    fn pxe_bytes() -> Vec<u8> {
        let rec = PxeRecord::new(
            SegOff::NULL, SegOff::NULL,
            SegOff::new(0x2000, 0x10),
            SegOff::NULL,
            crate::records::SegDesc::new(0x1000, 0x10000, 0x200),
            crate::records::SegDesc::new(0x1000, 0x10000, 0x200),
            crate::records::SegDesc::new(0x2000, 0x20000, 0x1000),
            crate::records::SegDesc::empty(),
            crate::records::SegDesc::empty(),
            crate::records::SegDesc::empty(),
            crate::records::SegDesc::empty(),
        );
        rec.to_bytes().to_vec()
    }

    #[test]
    fn pixie_hunt_finds_valid_record() {
        let target = 0x90000u32;
        let mut bytes = vec![0u8; (PIXIE_HUNT_TOP) as usize];
        let rec_bytes = pxe_bytes();
        bytes[target as usize..target as usize + rec_bytes.len()]
            .copy_from_slice(&rec_bytes);
        let mem = FakeMem { bytes, base: 0 };
        let mut scanner = Scanner::new(&mem);
        let found = scanner.pixie_hunt(0).expect("finds the planted record");
        assert_eq!(found.base, target);
    }

    #[test]
    fn pixie_in_free_memory_is_skipped() {
        let target = 0x10000u32; // below free_base_memory_top
        let mut bytes = vec![0u8; PIXIE_HUNT_TOP as usize];
        let rec_bytes = pxe_bytes();
        bytes[target as usize..target as usize + rec_bytes.len()]
            .copy_from_slice(&rec_bytes);
        let mem = FakeMem { bytes, base: 0 };
        let mut scanner = Scanner::new(&mem);
        assert!(scanner.pixie_hunt(0x20000).is_none());
    }

    #[test]
    fn rom_hunt_skips_non_pci_selector() {
        let mem = FakeMem { bytes: vec![0x55, 0xAA], base: ROM_HUNT_START };
        let scanner = Scanner::new(&mem);
        assert!(scanner.undi_rom_hunt(PciSelector::default()).is_none());
    }

    fn build_rom(vendor: u16, device: u16, pnp_ok: bool) -> Vec<u8> {
        let mut rom = vec![0u8; 0x60];
        rom[0] = 0x55;
        rom[1] = 0xAA;
        rom[0x18..0x1A].copy_from_slice(&0x20u16.to_le_bytes());
        rom[0x1A..0x1C].copy_from_slice(&(if pnp_ok { 0x40u16 } else { 0 }).to_le_bytes());
        rom[0x20..0x24].copy_from_slice(b"PCIR");
        rom[0x24..0x26].copy_from_slice(&vendor.to_le_bytes());
        rom[0x26..0x28].copy_from_slice(&device.to_le_bytes());
        if pnp_ok {
            rom[0x40..0x44].copy_from_slice(b"$PnP");
            rom[0x45] = 2; // struct is 32 bytes (2 * 16)
            let start = 0x40;
            let len = 32;
            let sum = checksum(&rom[start..start + len].to_vec());
            rom[start + len - 1] = rom[start + len - 1].wrapping_sub(sum);
        }
        let undi_off = 0x20 + 0x18;
        rom[undi_off..undi_off + 4].copy_from_slice(b"UNDI");
        rom[undi_off + 4] = 16;
        let sum = checksum(&rom[undi_off..undi_off + 16].to_vec());
        rom[undi_off + 15] = rom[undi_off + 15].wrapping_sub(sum);
        rom
    }

    #[test]
    fn rom_hunt_matches_vendor_and_device() {
        let rom = build_rom(0x8086, 0x100E, true);
        let mem = FakeMem { bytes: rom, base: ROM_HUNT_START };
        let scanner = Scanner::new(&mem);
        let sel = PciSelector { bus: 0, devfn: 0, vendor: 0x8086, device: 0x100E };
        let found = scanner.undi_rom_hunt(sel).expect("matches");
        assert_eq!(found.rom_base, ROM_HUNT_START);
        assert!(found.pnp_offset.is_some());
    }

    #[test]
    fn rom_hunt_rejects_vendor_mismatch() {
        let rom = build_rom(0x8086, 0x100E, true);
        let mem = FakeMem { bytes: rom, base: ROM_HUNT_START };
        let scanner = Scanner::new(&mem);
        let sel = PciSelector { bus: 0, devfn: 0, vendor: 0x10EC, device: 0x8139 };
        assert!(scanner.undi_rom_hunt(sel).is_none());
    }
}
