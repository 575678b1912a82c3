//! ABI lowering for the 16-bit cdecl-style calling convention.
//!
//! Every argument is passed on the stack, right-to-left in address order,
//! and the caller deallocates the argument space after the call. Results
//! come back in AX, or DX:AX for a word pair. After this pass no parameter
//! or argument markers remain: parameters are loads from the negative
//! frame slots, call sites carry explicit allocate/store/call/copy/deallocate
//! bookkeeping, and returns move their value into the fixed registers.
//!
//! Stack layout after the prologue, near-call models:
//!
//! ```text
//!   [bp+6]  second parameter (slot -3)
//!   [bp+4]  first parameter  (slot -2)
//!   [bp+2]  return address (2 bytes: offset only)
//!   [bp+0]  saved BP  <-- BP points here
//!   [bp-2]  first local (slot = fn.slot - 1)
//! ```
//!
//! Far-call models put a segment:offset return address at `[bp+2]..[bp+6]`,
//! so the first parameter moves to `[bp+6]` (slot -3).

use crate::ir::{
    BlockId, Class, Con, Function, Inst, InstBuilder, Jump, JumpKind, Mem, MemModel, Op, Ref,
    RetCls,
};
use crate::isa::x86_16::regs::{AX, BP};
use crate::result::{CodegenError, CodegenResult};
use log::{debug, warn};

/// Stack bytes one argument of the given class occupies.
fn arg_bytes(cls: Class) -> i64 {
    match cls {
        Class::I16 => 2,
        Class::I32 | Class::F32 => 4,
        Class::F64 => 8,
    }
}

/// Rewrite the leading run of parameter markers in the entry block into
/// loads from the parameter slots. Destinations are preserved; trailing
/// instructions shift after the loads.
fn lower_params(f: &mut Function, model: MemModel) {
    let start = f.start;
    let npar = f
        .block(start)
        .insts
        .iter()
        .take_while(|i| i.op.is_par())
        .count();
    if npar == 0 {
        return;
    }

    let mut s: i32 = if model.is_far_call() { -3 } else { -2 };
    let mut loads = Vec::with_capacity(npar);
    for i in &f.block(start).insts[..npar] {
        let (op, adv) = match i.op {
            Op::Par => (Op::Load, i.cls.slots()),
            Op::ParSext8 => (Op::SLoad8, 1),
            Op::ParZext8 => (Op::ULoad8, 1),
            Op::ParSext16 => (Op::SLoad16, 1),
            Op::ParZext16 => (Op::ULoad16, 1),
            _ => unreachable!("non-parameter in leading run"),
        };
        loads.push(Inst::new(op, i.cls, i.to, Ref::Slot(s), Ref::None));
        s -= adv;
    }
    f.block_mut(start).insts.splice(..npar, loads);
}

/// Lower one call site. `args` is the contiguous marker run preceding the
/// call. The builder prepends, so the pieces are pushed in reverse of
/// execution order: deallocate, result copy, call, argument stores,
/// allocate.
fn lower_call(
    f: &mut Function,
    args: &[Inst],
    call: &Inst,
    model: MemModel,
    bld: &mut InstBuilder,
) -> CodegenResult<()> {
    let mut stk: i64 = 0;
    for a in args {
        if a.args[0].is_none() {
            continue; // variadic boundary marker
        }
        stk += arg_bytes(a.cls);
    }

    if stk > 0 {
        let n = f.con_bits(-stk);
        bld.push(Inst::new(Op::Salloc, Class::I16, Ref::None, n, Ref::None));
    }

    let mut tag = 0;
    if !call.to.is_none() {
        match call.cls {
            Class::I16 => {
                bld.push(Inst::new(
                    Op::Copy,
                    Class::I16,
                    call.to,
                    Ref::Reg(AX),
                    Ref::None,
                ));
                tag = 1;
            }
            Class::I32 => {
                // One pair copy; emission expands it into the AX (low) /
                // DX (high) moves.
                bld.push(Inst::new(
                    Op::Copy,
                    Class::I32,
                    call.to,
                    Ref::Reg(AX),
                    Ref::None,
                ));
                tag = 2;
            }
            Class::F32 | Class::F64 => return Err(CodegenError::FloatCallResult),
        }
    }

    let op = if model.is_far_call() {
        Op::CallFar
    } else {
        Op::Call
    };
    bld.push(Inst::new(
        op,
        Class::I16,
        Ref::None,
        call.args[0],
        Ref::CallInfo(tag),
    ));

    if stk > 0 {
        // Arguments land at [bp-stk], [bp-stk+size0], ... after the
        // allocation: BP-relative addressing, because AX cannot serve as a
        // base register on this target.
        let mut off = stk;
        for a in args {
            if a.args[0].is_none() {
                continue;
            }
            let addr = f.add_mem(Mem {
                base: Ref::Reg(BP),
                index: Ref::None,
                offset: Some(Con::Bits(-off)),
                scale: 0,
            });
            let sop = match a.cls {
                Class::I16 => Op::Store16,
                Class::I32 => Op::Store32,
                Class::F32 => Op::StoreF32,
                Class::F64 => Op::StoreF64,
            };
            bld.push(Inst::new(sop, a.cls, Ref::None, a.args[0], addr));
            off -= arg_bytes(a.cls);
        }
        let n = f.con_bits(stk);
        bld.push(Inst::new(Op::Salloc, Class::I16, Ref::None, n, Ref::None));
    }
    Ok(())
}

/// Lower a return terminator: move the value into the fixed register(s),
/// tag the jump with the returned-register count, and select the far
/// return variant under far models. Pushed into the builder before the
/// instruction scan, so the copies land at the end of the block.
fn lower_ret(f: &mut Function, bid: BlockId, model: MemModel, bld: &mut InstBuilder) {
    let far = model.is_far_call();
    let void_kind = if far {
        JumpKind::RetFar(RetCls::Void)
    } else {
        JumpKind::Ret(RetCls::Void)
    };
    let jump = f.block(bid).jump;
    match jump.kind {
        JumpKind::Ret(RetCls::Void) => {
            f.block_mut(bid).jump.kind = void_kind;
        }
        JumpKind::RetFar(_) => {}
        JumpKind::Ret(RetCls::Word) => {
            bld.push(Inst::new(
                Op::Copy,
                Class::I16,
                Ref::Reg(AX),
                jump.arg,
                Ref::None,
            ));
            f.block_mut(bid).jump = Jump {
                kind: void_kind,
                arg: Ref::CallInfo(1),
            };
        }
        JumpKind::Ret(RetCls::Long) => {
            bld.push(Inst::new(
                Op::Copy,
                Class::I32,
                Ref::Reg(AX),
                jump.arg,
                Ref::None,
            ));
            f.block_mut(bid).jump = Jump {
                kind: void_kind,
                arg: Ref::CallInfo(2),
            };
        }
        JumpKind::Ret(RetCls::Single) | JumpKind::Ret(RetCls::Double) => {
            warn!(
                "{}: floating-point return is unsupported, degrading to void",
                f.name
            );
            f.block_mut(bid).jump = Jump {
                kind: void_kind,
                arg: Ref::None,
            };
        }
        JumpKind::Jmp | JumpKind::Jnz | JumpKind::Flag(_) => {}
    }
}

fn lower_block(f: &mut Function, bid: BlockId, model: MemModel) -> CodegenResult<()> {
    let mut bld = InstBuilder::new();
    lower_ret(f, bid, model, &mut bld);

    let insts = std::mem::take(&mut f.block_mut(bid).insts);
    let mut n = insts.len();
    while n > 0 {
        n -= 1;
        let i = insts[n];
        match i.op {
            // An already-lowered call passes through untouched, so
            // re-running the pass is a no-op.
            Op::Call | Op::CallFar if matches!(i.args[1], Ref::CallInfo(_)) => bld.push(i),
            Op::Call => {
                let mut a0 = n;
                while a0 > 0 && insts[a0 - 1].op.is_arg() {
                    a0 -= 1;
                }
                lower_call(f, &insts[a0..n], &i, model, &mut bld)?;
                n = a0;
            }
            op if op.is_arg() => return Err(CodegenError::MalformedCallSite),
            _ => bld.push(i),
        }
    }
    f.block_mut(bid).insts = bld.finish();
    Ok(())
}

/// ABI lowering entry point.
pub fn lower_fn(f: &mut Function, model: MemModel) -> CodegenResult<()> {
    lower_params(f, model);
    for n in 0..f.blocks.len() {
        lower_block(f, BlockId(n as u32), model)?;
    }
    debug!("after ABI lowering:\n{}", f);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn word_param_fn(model: MemModel) -> Function {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let v0 = f.new_vreg(Class::I16);
        let v1 = f.new_vreg(Class::I16);
        let b = f.block_mut(b0);
        b.insts.push(Inst::new(
            Op::Par,
            Class::I16,
            Ref::Reg(v0),
            Ref::None,
            Ref::None,
        ));
        b.insts.push(Inst::new(
            Op::Par,
            Class::I16,
            Ref::Reg(v1),
            Ref::None,
            Ref::None,
        ));
        lower_fn(&mut f, model).unwrap();
        f
    }

    #[test]
    fn near_params_start_at_slot_minus_2() {
        let f = word_param_fn(MemModel::Small);
        let insts = &f.block(f.start).insts;
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].op, Op::Load);
        assert_eq!(insts[0].args[0], Ref::Slot(-2));
        assert_eq!(insts[1].args[0], Ref::Slot(-3));
    }

    #[test]
    fn far_params_start_at_slot_minus_3() {
        for model in [MemModel::Medium, MemModel::Compact, MemModel::Large, MemModel::Huge] {
            let f = word_param_fn(model);
            let insts = &f.block(f.start).insts;
            assert_eq!(insts[0].args[0], Ref::Slot(-3));
            assert_eq!(insts[1].args[0], Ref::Slot(-4));
        }
    }

    #[test]
    fn long_param_consumes_two_slots() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let v0 = f.new_vreg(Class::I32);
        let v1 = f.new_vreg(Class::I16);
        let b = f.block_mut(b0);
        b.insts.push(Inst::new(
            Op::Par,
            Class::I32,
            Ref::Reg(v0),
            Ref::None,
            Ref::None,
        ));
        b.insts.push(Inst::new(
            Op::Par,
            Class::I16,
            Ref::Reg(v1),
            Ref::None,
            Ref::None,
        ));
        lower_fn(&mut f, MemModel::Small).unwrap();
        let insts = &f.block(f.start).insts;
        assert_eq!(insts[0].args[0], Ref::Slot(-2));
        assert_eq!(insts[1].args[0], Ref::Slot(-4));
    }

    fn con_of(f: &Function, r: Ref) -> i64 {
        match r {
            Ref::Con(c) => match f.con(c) {
                Con::Bits(v) => *v,
                _ => panic!("address constant"),
            },
            _ => panic!("not a constant: {:?}", r),
        }
    }

    /// Build `call ext(args...)` in a fresh function and lower it.
    fn lowered_call(arg_classes: &[Option<Class>], model: MemModel) -> Function {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let ext = f.con_addr("ext", 0);
        let mut insts = vec![];
        for cls in arg_classes {
            match cls {
                Some(cls) => {
                    let v = f.new_vreg(*cls);
                    insts.push(Inst::new(Op::Arg, *cls, Ref::None, Ref::Reg(v), Ref::None));
                }
                // Variadic boundary marker.
                None => insts.push(Inst::new(
                    Op::Arg,
                    Class::I16,
                    Ref::None,
                    Ref::None,
                    Ref::None,
                )),
            }
        }
        let ret = f.new_vreg(Class::I16);
        insts.push(Inst::new(
            Op::Call,
            Class::I16,
            Ref::Reg(ret),
            ext,
            Ref::None,
        ));
        f.block_mut(b0).insts = insts;
        lower_fn(&mut f, model).unwrap();
        f
    }

    #[test]
    fn call_stack_balance() {
        for (classes, want) in [
            (vec![Some(Class::I16), Some(Class::I16)], 4i64),
            (vec![Some(Class::I32), Some(Class::F64)], 12),
            (vec![Some(Class::F32)], 4),
            (vec![Some(Class::I16), None, Some(Class::I16)], 4),
        ] {
            let f = lowered_call(&classes, MemModel::Small);
            let insts = &f.block(f.start).insts;
            let sallocs: Vec<i64> = insts
                .iter()
                .filter(|i| i.op == Op::Salloc)
                .map(|i| con_of(&f, i.args[0]))
                .collect();
            assert_eq!(sallocs.len(), 2, "classes {:?}", classes);
            assert_eq!(sallocs[0], want);
            assert_eq!(sallocs[1], -want);
        }
    }

    #[test]
    fn call_without_args_has_no_stack_traffic() {
        let f = lowered_call(&[], MemModel::Small);
        let insts = &f.block(f.start).insts;
        assert!(insts.iter().all(|i| i.op != Op::Salloc));
        // call, then result copy
        assert_eq!(insts[0].op, Op::Call);
        assert_eq!(insts[0].args[1], Ref::CallInfo(1));
        assert_eq!(insts[1].op, Op::Copy);
        assert_eq!(insts[1].args[0], Ref::Reg(AX));
    }

    #[test]
    fn call_execution_order() {
        let f = lowered_call(&[Some(Class::I16), Some(Class::I16)], MemModel::Small);
        let ops: Vec<Op> = f.block(f.start).insts.iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![
                Op::Salloc,
                Op::Store16,
                Op::Store16,
                Op::Call,
                Op::Copy,
                Op::Salloc
            ]
        );
    }

    #[test]
    fn far_model_selects_far_call() {
        let f = lowered_call(&[], MemModel::Large);
        assert_eq!(f.block(f.start).insts[0].op, Op::CallFar);
    }

    #[test]
    fn no_markers_remain() {
        let f = lowered_call(&[Some(Class::I16), None], MemModel::Small);
        assert!(f
            .block(f.start)
            .insts
            .iter()
            .all(|i| !i.op.is_arg() && !i.op.is_par()));
    }

    #[test]
    fn word_return_moves_into_ax() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let v = f.new_vreg(Class::I16);
        f.block_mut(b0).jump = Jump {
            kind: JumpKind::Ret(RetCls::Word),
            arg: Ref::Reg(v),
        };
        lower_fn(&mut f, MemModel::Small).unwrap();
        let b = f.block(b0);
        assert_eq!(b.jump.kind, JumpKind::Ret(RetCls::Void));
        assert_eq!(b.jump.arg, Ref::CallInfo(1));
        let last = b.insts.last().unwrap();
        assert_eq!(last.op, Op::Copy);
        assert_eq!(last.to, Ref::Reg(AX));
        assert_eq!(last.args[0], Ref::Reg(v));
    }

    #[test]
    fn long_return_tags_two_registers() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let v = f.new_vreg(Class::I32);
        f.block_mut(b0).jump = Jump {
            kind: JumpKind::Ret(RetCls::Long),
            arg: Ref::Reg(v),
        };
        lower_fn(&mut f, MemModel::Medium).unwrap();
        let b = f.block(b0);
        assert_eq!(b.jump.kind, JumpKind::RetFar(RetCls::Void));
        assert_eq!(b.jump.arg, Ref::CallInfo(2));
        assert_eq!(b.insts.last().unwrap().cls, Class::I32);
    }

    #[test]
    fn float_return_degrades_to_void() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let v = f.new_vreg(Class::F64);
        f.block_mut(b0).jump = Jump {
            kind: JumpKind::Ret(RetCls::Double),
            arg: Ref::Reg(v),
        };
        lower_fn(&mut f, MemModel::Small).unwrap();
        let b = f.block(b0);
        assert_eq!(b.jump.kind, JumpKind::Ret(RetCls::Void));
        assert_eq!(b.jump.arg, Ref::None);
        assert!(b.insts.is_empty());
    }

    #[test]
    fn relowering_is_a_noop() {
        let mut f = lowered_call(&[Some(Class::I16), Some(Class::I16)], MemModel::Small);
        let before = format!("{}", f);
        lower_fn(&mut f, MemModel::Small).unwrap();
        assert_eq!(before, format!("{}", f));
    }

    #[test]
    fn stray_argument_marker_is_fatal() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let v = f.new_vreg(Class::I16);
        f.block_mut(b0).insts.push(Inst::new(
            Op::Arg,
            Class::I16,
            Ref::None,
            Ref::Reg(v),
            Ref::None,
        ));
        assert!(matches!(
            lower_fn(&mut f, MemModel::Small),
            Err(CodegenError::MalformedCallSite)
        ));
    }

    #[test]
    fn float_call_result_is_fatal() {
        let mut f = Function::new("f");
        let b0 = f.add_block();
        let ext = f.con_addr("ext", 0);
        let v = f.new_vreg(Class::F32);
        f.block_mut(b0).insts.push(Inst::new(
            Op::Call,
            Class::F32,
            Ref::Reg(v),
            ext,
            Ref::None,
        ));
        assert!(matches!(
            lower_fn(&mut f, MemModel::Small),
            Err(CodegenError::FloatCallResult)
        ));
    }

    #[test]
    fn argument_stores_are_bp_relative() {
        let f = lowered_call(&[Some(Class::I16), Some(Class::I16)], MemModel::Small);
        let stores: Vec<&Inst> = f
            .block(f.start)
            .insts
            .iter()
            .filter(|i| i.op == Op::Store16)
            .collect();
        assert_eq!(stores.len(), 2);
        // Pushed in forward order through a prepending builder, so the
        // final order is second arg first; offsets are fixed per argument.
        let offs: Vec<i64> = stores
            .iter()
            .map(|i| match i.args[1] {
                Ref::Mem(m) => match f.mem(m).offset {
                    Some(Con::Bits(v)) => v,
                    _ => panic!("non-constant store offset"),
                },
                _ => panic!("store without memory operand"),
            })
            .collect();
        assert_eq!(offs, vec![-2, -4]);
        for i in &stores {
            let Ref::Mem(m) = i.args[1] else { unreachable!() };
            assert_eq!(f.mem(m).base, Ref::Reg(BP));
        }
    }
}
