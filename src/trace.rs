//! Debug trace output.
//!
//! One fixed-size record is appended per retired operation (fetched
//! instructions and vector-loop replays alike):
//!
//! ```text
//! offset  field   notes
//! 0       flags   bit 0 = valid, bit 1/2/3 = src a/b/c valid
//! 4       pc
//! 8       src_a   written only when bit 1 is set, else zero
//! 12      src_b   written only when bit 2 is set, else zero
//! 16      src_c   written only when bit 3 is set, else zero
//! ```
//!
//! All fields are little-endian; 20 bytes per record.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

/// Size of one trace record in bytes.
pub const TRACE_RECORD_SIZE: usize = 20;

/// The per-retirement operand snapshot fed to the trace sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceRecord {
    pub pc: u32,
    pub src_a: u32,
    pub src_b: u32,
    pub src_c: u32,
    pub src_a_valid: bool,
    pub src_b_valid: bool,
    pub src_c_valid: bool,
}

/// Writes trace records to a file sink.
pub struct TraceWriter {
    out: BufWriter<File>,
}

impl TraceWriter {
    /// Create (truncate) the trace file.
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }

    /// Append one record.
    pub fn append(&mut self, record: &TraceRecord) -> io::Result<()> {
        let mut buf = [0u8; TRACE_RECORD_SIZE];

        let flags = 1
            | (record.src_a_valid as u32) << 1
            | (record.src_b_valid as u32) << 2
            | (record.src_c_valid as u32) << 3;
        LittleEndian::write_u32(&mut buf[0..4], flags);
        LittleEndian::write_u32(&mut buf[4..8], record.pc);
        if record.src_a_valid {
            LittleEndian::write_u32(&mut buf[8..12], record.src_a);
        }
        if record.src_b_valid {
            LittleEndian::write_u32(&mut buf[12..16], record.src_b);
        }
        if record.src_c_valid {
            LittleEndian::write_u32(&mut buf[16..20], record.src_c);
        }

        self.out.write_all(&buf)?;
        self.out.flush()
    }
}
