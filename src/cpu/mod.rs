//! The MRISC32 CPU core.
//!
//! The core is organized into:
//!
//! - [`isa`]: architectural constants and operation encodings
//! - [`decode`]: instruction word classification
//! - [`execute`]: the EX dispatch (scalar, packed and FP sub-units)
//! - [`state`]: scalar/vector register files and the vector loop record
//! - [`core`]: the per-cycle IF/ID/EX/MEM/WB interpreter
//! - [`traits`]: the `Cpu` capability trait and the fault model

pub mod core;
pub mod decode;
pub mod execute;
pub mod isa;
pub mod state;
pub mod traits;

pub use self::core::CpuSimple;
pub use decode::{decode, BranchCond, BranchOp, DecodedInstr, EncodingClass};
pub use execute::ExecUnit;
pub use isa::{ExOp, MemOp, PackedMode, VectorMode};
pub use state::{ScalarRegisterFile, VectorRegisterFile, VectorState};
pub use traits::{Cpu, CpuFault, RegisterDump, RunStats, SimError};
