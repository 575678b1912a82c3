//! Instruction selection: one pass over an ABI-lowered function that
//! rewrites target-generic opcodes into target-shaped ones and normalizes
//! operand references.
//!
//! Each block is processed in reverse through an `InstBuilder`, so a
//! rewrite sees the already-rewritten tail of the block before deciding
//! what to prepend. The pass deliberately does *not* force operands into
//! the fixed registers the hardware pins (AX/DX for division, CL for shift
//! counts): the external allocator is expected to prefer the natural
//! placement, and emission inserts corrective moves when it does not.

use crate::ir::{BlockId, Function, Inst, InstBuilder, Mem, Op, Ref, VRegData};
use crate::result::{CodegenError, CodegenResult};
use log::debug;

/// Normalize one operand: physical registers and constants pass through; a
/// virtual register with an assigned frame slot becomes a slot reference;
/// a memory operand with an unsupported scale is a fatal error. Constants
/// stay immediates; the target permits them in most instruction
/// positions, so nothing is materialized into a register.
fn fixup(vregs: &[VRegData], mems: &[Mem], r: &mut Ref) -> CodegenResult<()> {
    match *r {
        Ref::Reg(reg) if reg.is_virt() => {
            if let Some(s) = vregs[reg.virt_index()].slot {
                *r = Ref::Slot(s);
            }
        }
        Ref::Mem(m) => {
            let scale = mems[m.0 as usize].scale;
            if scale > 1 {
                return Err(CodegenError::UnsupportedScale(scale));
            }
        }
        _ => {}
    }
    Ok(())
}

fn norm(i: &mut Inst, vregs: &[VRegData], mems: &[Mem]) -> CodegenResult<()> {
    fixup(vregs, mems, &mut i.args[0])?;
    fixup(vregs, mems, &mut i.args[1])
}

/// Division and remainder: only the operands are normalized here. The
/// dividend-in-AX, extend-into-DX pinning happens at emission.
fn sel_divrem(
    mut i: Inst,
    vregs: &[VRegData],
    mems: &[Mem],
    bld: &mut InstBuilder,
) -> CodegenResult<()> {
    norm(&mut i, vregs, mems)?;
    bld.push(i);
    Ok(())
}

/// Shifts: only the operands are normalized here. The count-in-CL pinning
/// (for non-immediate counts) happens at emission.
fn sel_shift(
    mut i: Inst,
    vregs: &[VRegData],
    mems: &[Mem],
    bld: &mut InstBuilder,
) -> CodegenResult<()> {
    norm(&mut i, vregs, mems)?;
    bld.push(i);
    Ok(())
}

/// Floating-point instructions, including conversions whose result is
/// integer-class: the stack-machine sequencing is an emission concern, so
/// selection only normalizes the operands.
fn sel_fpu(
    mut i: Inst,
    vregs: &[VRegData],
    mems: &[Mem],
    bld: &mut InstBuilder,
) -> CodegenResult<()> {
    norm(&mut i, vregs, mems)?;
    bld.push(i);
    Ok(())
}

fn sel(mut i: Inst, vregs: &[VRegData], mems: &[Mem], bld: &mut InstBuilder) -> CodegenResult<()> {
    match i.op {
        Op::Nop => Ok(()),
        Op::Cmp(cc) => {
            // The target compares in two steps (compare-and-set-flags,
            // set-byte-on-condition); the predicate maps directly onto the
            // Set opcode.
            i.op = Op::Set(cc);
            norm(&mut i, vregs, mems)?;
            bld.push(i);
            Ok(())
        }
        Op::Div | Op::Udiv | Op::Rem | Op::Urem => sel_divrem(i, vregs, mems, bld),
        Op::Shl | Op::Shr | Op::Sar => sel_shift(i, vregs, mems, bld),
        _ if i.cls.is_float() => sel_fpu(i, vregs, mems, bld),
        _ => {
            norm(&mut i, vregs, mems)?;
            bld.push(i);
            Ok(())
        }
    }
}

/// Instruction selection entry point.
pub fn lower_fn(f: &mut Function) -> CodegenResult<()> {
    for n in 0..f.blocks.len() {
        let bid = BlockId(n as u32);

        // Phi sources in this block's successors obey the same operand
        // rule as instruction operands.
        let (s1, s2) = {
            let b = f.block(bid);
            (b.s1, b.s2)
        };
        for succ in [s1, s2].into_iter().flatten() {
            let mut phis = std::mem::take(&mut f.block_mut(succ).phis);
            for p in &mut phis {
                for (from, r) in &mut p.args {
                    if *from == bid {
                        fixup(&f.vregs, &f.mems, r)?;
                    }
                }
            }
            f.block_mut(succ).phis = phis;
        }

        let insts = std::mem::take(&mut f.block_mut(bid).insts);
        let mut bld = InstBuilder::new();
        for i in insts.into_iter().rev() {
            sel(i, &f.vregs, &f.mems, &mut bld)?;
        }
        f.block_mut(bid).insts = bld.finish();
    }
    debug!("after instruction selection:\n{}", f);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{Class, Con, IntCC, Phi};

    #[test]
    fn compare_becomes_set() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let v0 = f.new_vreg(Class::I16);
        let v1 = f.new_vreg(Class::I16);
        let v2 = f.new_vreg(Class::I16);
        f.block_mut(b0).insts.push(Inst::new(
            Op::Cmp(IntCC::Ult),
            Class::I16,
            Ref::Reg(v2),
            Ref::Reg(v0),
            Ref::Reg(v1),
        ));
        lower_fn(&mut f).unwrap();
        assert_eq!(f.block(b0).insts[0].op, Op::Set(IntCC::Ult));
    }

    #[test]
    fn slotted_vreg_becomes_slot_ref() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let v0 = f.new_vreg(Class::I16);
        let v1 = f.new_vreg(Class::I16);
        f.assign_slot(v1, 3);
        f.block_mut(b0).insts.push(Inst::new(
            Op::Add,
            Class::I16,
            Ref::Reg(v0),
            Ref::Reg(v0),
            Ref::Reg(v1),
        ));
        lower_fn(&mut f).unwrap();
        let i = f.block(b0).insts[0];
        // The destination is left to the allocator; only uses are rewritten.
        assert_eq!(i.to, Ref::Reg(v0));
        assert_eq!(i.args[0], Ref::Reg(v0));
        assert_eq!(i.args[1], Ref::Slot(3));
    }

    #[test]
    fn constants_pass_through() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let v0 = f.new_vreg(Class::I16);
        let ten = f.con_bits(10);
        f.block_mut(b0).insts.push(Inst::new(
            Op::Add,
            Class::I16,
            Ref::Reg(v0),
            Ref::Reg(v0),
            ten,
        ));
        lower_fn(&mut f).unwrap();
        assert_eq!(f.block(b0).insts[0].args[1], ten);
    }

    #[test]
    fn nop_is_dropped() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        f.block_mut(b0).insts.push(Inst::new(
            Op::Nop,
            Class::I16,
            Ref::None,
            Ref::None,
            Ref::None,
        ));
        lower_fn(&mut f).unwrap();
        assert!(f.block(b0).insts.is_empty());
    }

    #[test]
    fn successor_phi_operands_are_fixed() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let b1 = f.add_block();
        let v0 = f.new_vreg(Class::I16);
        let v1 = f.new_vreg(Class::I16);
        f.assign_slot(v0, 0);
        f.block_mut(b0).s1 = Some(b1);
        f.block_mut(b0).jump.kind = crate::ir::JumpKind::Jmp;
        f.block_mut(b1).phis.push(Phi {
            to: Ref::Reg(v1),
            cls: Class::I16,
            args: vec![(b0, Ref::Reg(v0))],
        });
        lower_fn(&mut f).unwrap();
        assert_eq!(f.block(b1).phis[0].args[0].1, Ref::Slot(0));
    }

    #[test]
    fn bad_scale_is_fatal() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let v0 = f.new_vreg(Class::I16);
        let base = f.new_vreg(Class::I16);
        let idx = f.new_vreg(Class::I16);
        let m = f.add_mem(Mem {
            base: Ref::Reg(base),
            index: Ref::Reg(idx),
            offset: Some(Con::Bits(0)),
            scale: 4,
        });
        f.block_mut(b0).insts.push(Inst::new(
            Op::Load,
            Class::I16,
            Ref::Reg(v0),
            m,
            Ref::None,
        ));
        assert!(matches!(
            lower_fn(&mut f),
            Err(CodegenError::UnsupportedScale(4))
        ));
    }

    #[test]
    fn reselection_is_a_noop() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let v0 = f.new_vreg(Class::I16);
        let v1 = f.new_vreg(Class::I16);
        let v2 = f.new_vreg(Class::I16);
        f.assign_slot(v1, 0);
        f.block_mut(b0).insts.push(Inst::new(
            Op::Cmp(IntCC::Sge),
            Class::I16,
            Ref::Reg(v2),
            Ref::Reg(v0),
            Ref::Reg(v1),
        ));
        lower_fn(&mut f).unwrap();
        let once = format!("{}", f);
        lower_fn(&mut f).unwrap();
        assert_eq!(once, format!("{}", f));
    }
}
