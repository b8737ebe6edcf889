//! Memory-mapped I/O region.
//!
//! The region starting at [`MMIO_BASE`] mirrors the MC1 machine's I/O
//! fields. The core itself treats it as ordinary RAM; a presentation thread
//! reads the fields (and writes KEYEVENT/MOUSEPOS) while programs poll them.
//! Word accesses are atomic by construction of [`Ram`].

use crate::cpu::SimError;
use crate::ram::Ram;

/// Start of the memory-mapped I/O region.
pub const MMIO_BASE: u32 = 0xc000_0000;

pub const MMIO_CPUCLK: u32 = MMIO_BASE + 0x08;
pub const MMIO_VRAMSIZE: u32 = MMIO_BASE + 0x0c;
pub const MMIO_VIDWIDTH: u32 = MMIO_BASE + 0x14;
pub const MMIO_VIDHEIGHT: u32 = MMIO_BASE + 0x18;
pub const MMIO_VIDFPS: u32 = MMIO_BASE + 0x1c;
pub const MMIO_FRAMENO: u32 = MMIO_BASE + 0x20;
pub const MMIO_SWITCHES: u32 = MMIO_BASE + 0x28;
pub const MMIO_KEYEVENT: u32 = MMIO_BASE + 0x30;
pub const MMIO_MOUSEPOS: u32 = MMIO_BASE + 0x34;

/// GPU configuration registers, written by guest programs and read by the
/// presentation layer each frame.
pub const MMIO_GPU_BASE: u32 = MMIO_BASE + 0x100;
/// Start of the framebuffer memory area.
pub const MMIO_GPU_ADDR: u32 = MMIO_GPU_BASE;
/// Width of the framebuffer in pixels.
pub const MMIO_GPU_WIDTH: u32 = MMIO_GPU_BASE + 4;
/// Height of the framebuffer in pixels.
pub const MMIO_GPU_HEIGHT: u32 = MMIO_GPU_BASE + 8;
/// Number of bits per pixel.
pub const MMIO_GPU_DEPTH: u32 = MMIO_GPU_BASE + 12;
/// Current frame number.
pub const MMIO_GPU_FRAME_NO: u32 = MMIO_GPU_BASE + 32;
/// Start of the palette memory area.
pub const MMIO_GPU_PAL_ADDR: u32 = MMIO_GPU_BASE + 36;

/// Populate the machine-info fields, when the RAM reaches that far.
pub fn seed_fields(ram: &Ram) -> Result<(), SimError> {
    if !ram.valid_range(MMIO_BASE, 64) {
        return Ok(());
    }
    ram.store32(MMIO_CPUCLK, 70_000_000)?;
    ram.store32(MMIO_VRAMSIZE, 128 * 1024)?;
    ram.store32(MMIO_VIDWIDTH, 1920)?;
    ram.store32(MMIO_VIDHEIGHT, 1080)?;
    ram.store32(MMIO_VIDFPS, 60 * 65536)?;
    ram.store32(MMIO_SWITCHES, 4)?;
    Ok(())
}
