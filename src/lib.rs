//! The machine-specific backend for a 16-bit x86 (8086-class) target,
//! plugged into the Mica SSA compiler pipeline.
//!
//! The pipeline parses textual IR, runs target-independent optimizations,
//! and hands each function to this crate in three stages:
//!
//! 1. **ABI lowering** (`isa::x86_16::abi`) rewrites abstract parameters,
//!    call sites and returns into concrete stack operations for the
//!    segmented, register-starved, stack-only-argument convention, under
//!    one of six memory models.
//! 2. **Instruction selection** (`isa::x86_16::lower`) reshapes generic
//!    opcodes into target-shaped ones and normalizes operand references.
//! 3. **Assembly emission** (`isa::x86_16::emit`) prints the selected,
//!    register-allocated instruction stream as textual assembly, expanding
//!    everything the hardware cannot do in one instruction.
//!
//! Liveness, spilling and register allocation run between stages 2 and 3
//! in the encompassing pipeline; their write-back surface is
//! `ir::Function::assign_slot` and `ir::Function::resolve_vreg`.

pub mod cli;
pub mod ir;
pub mod isa;
pub mod result;

pub use result::{CodegenError, CodegenResult};
