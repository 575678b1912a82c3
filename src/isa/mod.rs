//! Target descriptors: the contract between the machine-independent
//! pipeline and a machine backend.

use crate::ir::{Function, MemModel, Op, Ref};
use crate::result::CodegenResult;
use std::io::Write;

pub mod x86_16;

/// Options controlling emission.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmitOpts {
    /// Treat an opcode/class pair with no emission handler as a hard error
    /// instead of emitting a placeholder comment.
    pub strict: bool,
}

/// A target backend, described as a table of data and entry points the
/// generic pipeline calls into. No algorithmic content lives here; the
/// lowering, selection and emission modules must satisfy this contract.
#[derive(Debug)]
pub struct Target {
    /// Name used for command-line selection.
    pub name: &'static str,
    /// Memory model assumed when none is requested.
    pub default_model: MemModel,
    /// Mask of globally-live registers (frame and stack pointer).
    pub rglob: u64,
    /// Caller-save registers, in allocation preference order.
    pub rsave: &'static [crate::ir::Reg],
    /// Callee-save registers, in allocation preference order.
    pub rclob: &'static [crate::ir::Reg],
    /// How many memory operands may this opcode address directly?
    pub memargs: fn(Op) -> u32,
    /// The registers a lowered call defines, decoded from its
    /// register-count tag; `counts` receives the (gp, fp) counts.
    pub retregs: fn(Ref, Option<&mut [u32; 2]>) -> u64,
    /// The registers a lowered call uses for arguments. This target passes
    /// all arguments on the stack, so the set is always empty.
    pub argregs: fn(Ref, Option<&mut [u32; 2]>) -> u64,
    /// ABI lowering entry point.
    pub abi: fn(&mut Function, MemModel) -> CodegenResult<()>,
    /// Instruction selection entry point.
    pub isel: fn(&mut Function) -> CodegenResult<()>,
    /// Assembly emission entry point.
    pub emitfn: fn(&Function, &EmitOpts, &mut dyn Write) -> CodegenResult<()>,
    /// Prefix of assembler-local labels.
    pub asloc: &'static str,
    /// Prefix of global symbols.
    pub assym: &'static str,
}

/// All targets known to this crate.
pub static TARGETS: &[&Target] = &[&x86_16::TARGET];

/// Look a target up by its command-line name.
pub fn lookup(name: &str) -> Option<&'static Target> {
    TARGETS.iter().copied().find(|t| t.name == name)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert!(lookup("i8086").is_some());
        assert!(lookup("I8086").is_none());
        assert!(lookup("amd64").is_none());
    }
}
