//! Binary image loader.
//!
//! The image is a flat byte stream. Unless the load address is overridden,
//! the first four bytes hold the little-endian address where the remainder
//! of the file is placed; with an override, the whole file is contents.
//! The reset PC is architectural (0x200) and independent of the load
//! address, so images normally place a start stub there.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::cpu::SimError;
use crate::ram::Ram;

/// Load a binary image into RAM. Returns `(load_addr, byte_count)`.
pub fn load_image(path: &Path, ram: &Ram, load_addr: Option<u32>) -> Result<(u32, u32), SimError> {
    let data = std::fs::read(path)?;

    let (addr, contents) = match load_addr {
        Some(addr) => (addr, &data[..]),
        None => {
            if data.len() < 4 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "binary image too short to hold a start address",
                )
                .into());
            }
            (LittleEndian::read_u32(&data[0..4]), &data[4..])
        }
    };

    ram.write_bytes(addr, contents)?;
    log::info!(
        "read {} bytes from {} into RAM @ 0x{:08x}",
        contents.len(),
        path.display(),
        addr
    );
    Ok((addr, contents.len() as u32))
}
