//! The 16-bit x86 (8086-class) backend.
//!
//! Three passes cooperate here, in pipeline order: `abi` rewrites
//! calling-convention-generic IR into concrete stack operations for the
//! cdecl-style, stack-only-argument convention; `lower` reshapes generic
//! opcodes into forms whose operand placement the target can encode; and
//! `emit` prints the register-allocated result as textual assembly,
//! expanding the operations the hardware cannot do atomically (word-pair
//! arithmetic, the 8087 operand stack). The `Target` value below is the
//! descriptor the machine-independent pipeline dispatches through.

use crate::ir::{MemModel, Op, Ref};
use crate::isa::Target;

pub mod abi;
pub mod emit;
pub mod lower;
pub mod regs;

use self::regs::{bit, AX, CALLEE_SAVE, CALLER_SAVE, DX, NCLR, NGPR, NGPS, NRGLOB, RGLOB};

/// Prefix of assembler-local labels.
pub const ASLOC: &str = ".L";
/// Prefix of global symbols, DOS/OMF convention.
pub const ASSYM: &str = "_";

// The save lists must partition the register file together with the
// globally-live pair; catch table/count drift at build time.
const _: () = assert!(NGPS + NCLR + NRGLOB == NGPR);
const _: () = assert!(CALLER_SAVE.len() == NGPS);
const _: () = assert!(CALLEE_SAVE.len() == NCLR);

/// How many memory operands may this opcode address directly? Most
/// instructions take one; markers, calls and stack bookkeeping take none.
pub fn memargs(op: Op) -> u32 {
    match op {
        Op::Add
        | Op::Sub
        | Op::Mul
        | Op::Div
        | Op::Udiv
        | Op::Rem
        | Op::Urem
        | Op::Neg
        | Op::And
        | Op::Or
        | Op::Xor
        | Op::Shl
        | Op::Shr
        | Op::Sar
        | Op::Cmp(_)
        | Op::Set(_)
        | Op::Copy
        | Op::Swap
        | Op::Addr
        | Op::Load
        | Op::SLoad8
        | Op::ULoad8
        | Op::SLoad16
        | Op::ULoad16
        | Op::Sext8
        | Op::Zext8
        | Op::Sext16
        | Op::Zext16
        | Op::Store8
        | Op::Store16
        | Op::Store32
        | Op::StoreF32
        | Op::StoreF64
        | Op::FCmp(_)
        | Op::Fpromote
        | Op::Fdemote
        | Op::FcvtFromSint
        | Op::FcvtFromUint
        | Op::FcvtToSint => 1,
        Op::Call
        | Op::CallFar
        | Op::Salloc
        | Op::Par
        | Op::ParSext8
        | Op::ParZext8
        | Op::ParSext16
        | Op::ParZext16
        | Op::Arg
        | Op::Nop => 0,
    }
}

/* Layout of a lowered call's register-count tag:
 *
 *  31     4  2  0
 *  |0...00|xx|xx|
 *         |  ` gp result registers (0..=2)  [AX or DX:AX]
 *         ` fp result registers    (0)      [none: no FPU register file]
 *
 * All arguments go on the stack, so no argument registers are encoded.
 */

/// Decode the result-register set of a lowered call or return.
pub fn retregs(r: Ref, counts: Option<&mut [u32; 2]>) -> u64 {
    let Ref::CallInfo(tag) = r else {
        panic!("retregs on non-call operand {:?}", r);
    };
    let ngp = tag & 3;
    if let Some(p) = counts {
        p[0] = ngp;
        p[1] = 0;
    }
    let mut b = 0;
    if ngp >= 1 {
        b |= bit(AX);
    }
    if ngp >= 2 {
        b |= bit(DX);
    }
    b
}

/// Decode the argument-register set of a lowered call: always empty, the
/// convention passes every argument on the stack.
pub fn argregs(r: Ref, counts: Option<&mut [u32; 2]>) -> u64 {
    debug_assert!(matches!(r, Ref::CallInfo(_)));
    if let Some(p) = counts {
        p[0] = 0;
        p[1] = 0;
    }
    0
}

/// The i8086 target descriptor.
pub static TARGET: Target = Target {
    name: "i8086",
    default_model: MemModel::Small,
    rglob: RGLOB,
    rsave: &CALLER_SAVE,
    rclob: &CALLEE_SAVE,
    memargs,
    retregs,
    argregs,
    abi: abi::lower_fn,
    isel: lower::lower_fn,
    emitfn: emit::emit_fn,
    asloc: ASLOC,
    assym: ASSYM,
};
