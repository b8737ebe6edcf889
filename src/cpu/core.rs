//! The sequential pipeline interpreter.
//!
//! One instruction per simulated cycle through IF, ID/RF, EX, MEM and WB,
//! executed as an in-order loop. The pipeline bundles exist only as locals
//! within a cycle; the only state carried between cycles is the register
//! files, the fetched instruction being replayed by a vector loop, and the
//! vector loop position itself.
//!
//! Vector instructions stall IF and re-issue the decoded instruction with an
//! incremented lane index until the active lane count reaches VL.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::SimConfig;
use crate::cpu::decode::{decode, BranchOp, EncodingClass};
use crate::cpu::execute::ExecUnit;
use crate::cpu::isa::{
    MemOp, VectorMode, NUM_VECTOR_ELEMENTS, REG_LR, REG_PC, REG_VL, REG_Z, RESET_PC,
    SYSCALL_PC_BASE,
};
use crate::cpu::state::{ScalarRegisterFile, VectorRegisterFile, VectorState};
use crate::cpu::traits::{Cpu, CpuFault, RegisterDump, RunStats, SimError};
use crate::ram::Ram;
use crate::syscalls::{Routine, Syscalls};
use crate::trace::{TraceRecord, TraceWriter};

/// The fetched instruction word being (re-)issued to the ID stage.
#[derive(Debug, Clone, Copy, Default)]
struct IdIn {
    pc: u32,
    instr: u32,
}

/// The simple in-order MRISC32 interpreter.
pub struct CpuSimple {
    ram: Arc<Ram>,
    regs: ScalarRegisterFile,
    vregs: VectorRegisterFile,
    syscalls: Syscalls,
    trace: Option<TraceWriter>,
    max_cycles: i64,
    terminate_requested: Arc<AtomicBool>,
    stats: RunStats,
}

impl CpuSimple {
    /// Create a core over the given RAM, configured by `config`.
    pub fn new(ram: Arc<Ram>, config: &SimConfig) -> Result<Self, SimError> {
        let trace = match &config.trace_path {
            Some(path) => Some(TraceWriter::create(path)?),
            None => None,
        };
        Ok(Self {
            syscalls: Syscalls::new(ram.clone()),
            ram,
            regs: ScalarRegisterFile::new(),
            vregs: VectorRegisterFile::new(),
            trace,
            max_cycles: config.max_cycles,
            terminate_requested: Arc::new(AtomicBool::new(false)),
            stats: RunStats::default(),
        })
    }

    /// A handle a presentation thread can use to request cooperative
    /// termination; the run loop polls it once per cycle.
    pub fn terminate_handle(&self) -> Arc<AtomicBool> {
        self.terminate_requested.clone()
    }

    /// The shared RAM (also readable from other threads).
    pub fn ram(&self) -> &Arc<Ram> {
        &self.ram
    }

    /// Counters from the last run.
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Scalar register read access for inspection.
    pub fn reg(&self, reg: u32) -> u32 {
        self.regs.read(reg)
    }

    /// Vector register lane read access for inspection.
    pub fn vreg_lane(&self, reg: u32, lane: u32) -> u32 {
        self.vregs.read_lane(reg, lane)
    }

    fn run_inner(&mut self) -> Result<u32, SimError> {
        self.syscalls.clear();
        self.regs.set_pc(RESET_PC);
        self.stats = RunStats::default();

        let mut vector = VectorState::default();
        let mut id_in = IdIn::default();

        while !self.syscalls.terminate() && !self.terminate_requested.load(Ordering::Relaxed) {
            // Simulator routine call handling: PCs in the reserved high
            // window never reach the fetch stage.
            if self.regs.pc() & 0xffff_0000 == SYSCALL_PC_BASE {
                let routine_no = (self.regs.pc() - SYSCALL_PC_BASE) >> 2;
                self.syscalls.call(routine_no, &mut self.regs)?;

                // Simulate jmp lr.
                let lr = self.regs.read(REG_LR);
                self.regs.set_pc(lr);
            }

            // IF is stalled while a vector operation is replaying.
            if !vector.active {
                let instr_pc = self.regs.pc();
                id_in.pc = instr_pc;
                id_in.instr = self.ram.load32(instr_pc)?;

                // A jump to address zero terminates the simulation.
                if instr_pc == 0 {
                    self.regs.write(1, 1);
                    self.syscalls.call(Routine::Exit as u32, &mut self.regs)?;
                }

                self.stats.fetched_instr_count += 1;
            } else {
                self.stats.vector_loop_count += 1;
            }

            // == ID/RF ==

            let instr = decode(id_in.instr, id_in.pc)?;
            let is_vector_op = instr.is_vector_op();
            let is_mem_op = instr.is_mem_op();

            // Vector state handling.
            let vector_len = self.regs.read(REG_VL) & (2 * NUM_VECTOR_ELEMENTS as u32 - 1);
            if is_vector_op {
                let vector_stride = if instr.class == EncodingClass::C {
                    instr.imm15
                } else {
                    self.regs.read(instr.reg3)
                };

                if !vector.active {
                    if vector_len == 0 {
                        // Zero-length vector operations retire as a NOP.
                        self.regs.set_pc(id_in.pc.wrapping_add(4));
                        continue;
                    }
                    vector.idx = 0;
                    vector.stride = vector_stride;
                    vector.addr_offset = 0;
                    vector.folding = instr.vector_mode == VectorMode::Folding;
                } else {
                    vector.idx += 1;
                    vector.addr_offset = vector.addr_offset.wrapping_add(vector.stride);
                }
            }

            // Will the next cycle continue this vector loop (stalling IF)?
            let continues_vector_loop = is_vector_op && vector.idx + 1 < vector_len;

            // Branch handling.
            let next_pc = match instr.branch {
                BranchOp::Cond(cond) => {
                    if cond.taken(self.regs.read(instr.reg1)) {
                        id_in.pc.wrapping_add(instr.imm21 << 2)
                    } else {
                        id_in.pc.wrapping_add(4)
                    }
                }
                BranchOp::Jump | BranchOp::JumpAndLink => {
                    self.regs.read(instr.reg1).wrapping_add(instr.imm21 << 2)
                }
                BranchOp::None => id_in.pc.wrapping_add(4),
            };

            // Source and destination register numbers (Z for none).
            let src_reg_a = if instr.is_subroutine_branch || instr.is_addpchi {
                REG_PC
            } else if instr.reg2_is_src {
                instr.reg2
            } else {
                REG_Z
            };
            let src_reg_b = if instr.reg3_is_src { instr.reg3 } else { REG_Z };
            let src_reg_c = if instr.reg1_is_src { instr.reg1 } else { REG_Z };
            let dst_reg = if instr.is_subroutine_branch {
                REG_LR
            } else if instr.reg1_is_dst {
                instr.reg1
            } else {
                REG_Z
            };

            // Which operands come from the vector file.
            let reg1_is_vector = is_vector_op;
            let reg2_is_vector = is_vector_op && !is_mem_op;
            let reg3_is_vector = matches!(
                instr.vector_mode,
                VectorMode::Folding | VectorMode::GatherScatter
            );

            // Register file read.
            let reg_a_data = if reg2_is_vector {
                self.vregs.read_lane(src_reg_a, vector.idx)
            } else {
                self.regs.read(src_reg_a)
            };
            let vector_idx_b = if vector.folding {
                vector.idx.wrapping_add(self.regs.read(REG_VL))
            } else {
                vector.idx
            };
            let reg_b_data = if reg3_is_vector {
                self.vregs.read_lane(src_reg_b, vector_idx_b)
            } else {
                self.regs.read(src_reg_b)
            };
            let reg_c_data = if reg1_is_vector {
                self.vregs.read_lane(src_reg_c, vector.idx)
            } else {
                self.regs.read(src_reg_c)
            };

            // Gather-scatter uses the B lane as the memory offset; stride
            // mode uses the accumulated offset.
            let vector_addr_offset = if instr.vector_mode == VectorMode::GatherScatter {
                reg_b_data
            } else {
                vector.addr_offset
            };

            // Operand selection.
            let src_a = reg_a_data;
            let src_b = if instr.is_subroutine_branch {
                4
            } else if is_vector_op && is_mem_op {
                vector_addr_offset
            } else if instr.class == EncodingClass::C {
                instr.imm15
            } else if instr.class == EncodingClass::D {
                instr.imm21
            } else {
                reg_b_data
            };
            let src_c = reg_c_data;

            if let Some(trace) = &mut self.trace {
                trace.append(&TraceRecord {
                    pc: id_in.pc,
                    src_a,
                    src_b,
                    src_c,
                    src_a_valid: instr.reg2_is_src,
                    src_b_valid: instr.reg3_is_src,
                    src_c_valid: instr.reg1_is_src,
                })?;
            }

            // == EX ==

            let ex_result = if is_mem_op {
                // Address generation: base + offset scaled by the T bits.
                src_a.wrapping_add(src_b.wrapping_mul(instr.packed_mode.index_scale()))
            } else {
                ExecUnit::execute(instr.ex_op, instr.packed_mode, src_a, src_b)
            };

            // == MEM ==

            let dst_data = match instr.mem_op {
                MemOp::None => ex_result,
                MemOp::Load8 => self.ram.load8s(ex_result)?,
                MemOp::LoadU8 => self.ram.load8(ex_result)?,
                MemOp::Load16 => self.ram.load16s(ex_result)?,
                MemOp::LoadU16 => self.ram.load16(ex_result)?,
                MemOp::Load32 => self.ram.load32(ex_result)?,
                MemOp::Ldea => ex_result,
                MemOp::Store8 => {
                    self.ram.store8(ex_result, src_c)?;
                    0
                }
                MemOp::Store16 => {
                    self.ram.store16(ex_result, src_c)?;
                    0
                }
                MemOp::Store32 => {
                    self.ram.store32(ex_result, src_c)?;
                    0
                }
            };

            // == WB ==

            if dst_reg != REG_Z {
                if is_vector_op {
                    self.vregs.write_lane(dst_reg, vector.idx, dst_data);
                } else if dst_reg != REG_PC {
                    self.regs.write(dst_reg, dst_data);
                }
            }

            // Update the vector loop state; PC is frozen while it continues.
            vector.active = continues_vector_loop;
            if !continues_vector_loop {
                self.regs.set_pc(next_pc);
            }

            self.stats.total_cycle_count += 1;
            if self.max_cycles >= 0 && self.stats.total_cycle_count as i64 >= self.max_cycles {
                self.terminate_requested.store(true, Ordering::Relaxed);
            }
        }

        Ok(self.syscalls.exit_code())
    }
}

impl Cpu for CpuSimple {
    fn reset(&mut self) {
        self.regs.clear();
        self.vregs.clear();
        self.syscalls.clear();
        self.terminate_requested.store(false, Ordering::Relaxed);
        self.stats = RunStats::default();
    }

    fn run(&mut self) -> Result<u32, CpuFault> {
        self.run_inner().map_err(|error| {
            log::error!("cpu fault: {}", error);
            CpuFault {
                error,
                dump: RegisterDump::capture(&self.regs),
            }
        })
    }

    fn dump_stats(&self) {
        println!("{}", self.stats);
    }

    fn dump_ram(&self, begin: u32, end: u32, path: &Path) -> Result<(), SimError> {
        let mut file = File::create(path)?;
        let bytes = self.ram.read_bytes(begin, end.wrapping_sub(begin))?;
        file.write_all(&bytes)?;
        Ok(())
    }
}
