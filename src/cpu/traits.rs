//! The CPU capability trait and the simulator fault model.
//!
//! `Cpu` is the interface the enclosing program drives: run to completion,
//! reset, and dump stats or RAM. The concrete pipeline interpreter lives in
//! [`core`](super::core); alternative implementations (e.g. a cycle-accurate
//! pipeline model) would plug in behind the same trait.
//!
//! A fault anywhere inside a cycle aborts that cycle and `run()`, surfacing
//! as a [`CpuFault`]: the typed error plus a register dump taken at the
//! moment of the fault. The run loop never catches and resumes.

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::cpu::isa::{REG_FP, REG_LR, REG_PC, REG_SP, REG_TP, REG_VL};
use crate::cpu::state::ScalarRegisterFile;

/// Errors raised while simulating.
#[derive(Debug, Error)]
pub enum SimError {
    /// A RAM access beyond the configured size.
    #[error("out of range memory access: 0x{addr:08x} ({size} bytes)")]
    AddressOutOfRange { addr: u32, size: u32 },

    /// A 16- or 32-bit access that is not naturally aligned.
    #[error("unaligned {size}-byte memory access: 0x{addr:08x}")]
    MisalignedAccess { addr: u32, size: u32 },

    /// A decoded EX opcode with no implemented operation.
    #[error("unimplemented operation 0x{code:04x} at pc 0x{pc:08x}")]
    UnimplementedOp { code: u32, pc: u32 },

    /// An instruction word that matches no encoding.
    #[error("unrecognized instruction word 0x{iword:08x} at pc 0x{pc:08x}")]
    DecodeFault { iword: u32, pc: u32 },

    /// A syscall routine number outside the supported set.
    #[error("invalid simulator routine {routine}")]
    SyscallFault { routine: u32 },

    /// Host I/O failure (trace sink, RAM dump).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A textual snapshot of the scalar registers, rendered like the original
/// simulator's crash dump (S1..S25 followed by the named registers).
#[derive(Debug, Clone)]
pub struct RegisterDump {
    regs: [u32; 32],
}

impl RegisterDump {
    pub fn capture(regs: &ScalarRegisterFile) -> Self {
        let mut snapshot = [0u32; 32];
        for (i, slot) in snapshot.iter_mut().enumerate() {
            *slot = regs.read(i as u32);
        }
        Self { regs: snapshot }
    }
}

impl fmt::Display for RegisterDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 1..=25 {
            writeln!(f, "S{}: 0x{:08x}", i, self.regs[i])?;
        }
        writeln!(f, "FP: 0x{:08x}", self.regs[REG_FP as usize])?;
        writeln!(f, "TP: 0x{:08x}", self.regs[REG_TP as usize])?;
        writeln!(f, "SP: 0x{:08x}", self.regs[REG_SP as usize])?;
        writeln!(f, "VL: 0x{:08x}", self.regs[REG_VL as usize])?;
        writeln!(f, "LR: 0x{:08x}", self.regs[REG_LR as usize])?;
        writeln!(f, "PC: 0x{:08x}", self.regs[REG_PC as usize])
    }
}

/// A simulation fault together with the register state at the fault point.
#[derive(Debug, Error)]
#[error("{error}\n{dump}")]
pub struct CpuFault {
    #[source]
    pub error: SimError,
    pub dump: RegisterDump,
}

/// Counters from one `run()` invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    /// Instructions fetched by the IF stage.
    pub fetched_instr_count: u64,
    /// Extra ID-WB replays spent in vector loops.
    pub vector_loop_count: u64,
    /// Total simulated cycles.
    pub total_cycle_count: u64,
}

impl RunStats {
    /// Cycles per retired operation (fetched + vector replays).
    pub fn cycles_per_op(&self) -> f64 {
        let ops = self.fetched_instr_count + self.vector_loop_count;
        if ops == 0 {
            0.0
        } else {
            self.total_cycle_count as f64 / ops as f64
        }
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CPU instructions:")?;
        writeln!(f, " Fetched instructions: {}", self.fetched_instr_count)?;
        writeln!(f, " Vector loops:         {}", self.vector_loop_count)?;
        writeln!(f, " Total CPU cycles:     {}", self.total_cycle_count)?;
        write!(f, " Cycles/Operation:     {}", self.cycles_per_op())
    }
}

/// A CPU core instance.
pub trait Cpu {
    /// Reset the architectural state (registers, counters, run flags).
    fn reset(&mut self);

    /// Run from the reset PC until the program exits, the cycle budget is
    /// exhausted or termination is requested.
    ///
    /// Returns the program exit code (the argument to the EXIT syscall, or
    /// zero when the run ends for any other reason).
    fn run(&mut self) -> Result<u32, CpuFault>;

    /// Print stats from the last run to stdout.
    fn dump_stats(&self);

    /// Write the RAM bytes in `[begin, end)` to a file.
    fn dump_ram(&self, begin: u32, end: u32, path: &Path) -> Result<(), SimError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SimError::AddressOutOfRange { addr: 0x1234, size: 4 };
        assert!(e.to_string().contains("0x00001234"));

        let e = SimError::MisalignedAccess { addr: 0x13, size: 4 };
        assert!(e.to_string().contains("4-byte"));

        let e = SimError::UnimplementedOp { code: 0x7f, pc: 0x200 };
        assert!(e.to_string().contains("0x007f"));
    }

    #[test]
    fn test_register_dump_format() {
        let mut regs = ScalarRegisterFile::new();
        regs.write(1, 0xdead_beef);
        regs.set_pc(0x200);

        let dump = RegisterDump::capture(&regs).to_string();
        assert!(dump.contains("S1: 0xdeadbeef"));
        assert!(dump.contains("PC: 0x00000200"));
        assert!(dump.contains("VL: 0x00000000"));
    }

    #[test]
    fn test_stats_cycles_per_op() {
        let stats = RunStats {
            fetched_instr_count: 2,
            vector_loop_count: 6,
            total_cycle_count: 8,
        };
        assert_eq!(stats.cycles_per_op(), 1.0);
        assert_eq!(RunStats::default().cycles_per_op(), 0.0);
    }
}
