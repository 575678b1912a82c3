//! Textual assembly emission for the 16-bit x86 backend.
//!
//! Every instruction is printed through an exhaustive dispatch, in priority
//! order: shifts (count pinned to CL), division (dividend pinned to AX,
//! extension into DX), word-pair expansions for the 32-bit class, 8087
//! stack sequences for the float classes, calls, stack adjustment, and
//! finally the generic one-instruction forms. The hardware has no native
//! 32-bit instructions and no float registers outside the coprocessor
//! stack, so those two groups expand into multi-instruction sequences with
//! synthetic local labels drawn from a per-function counter.

use crate::ir::{Class, Con, Function, Inst, IntCC, JumpKind, MemIdx, Op, Ref, Reg};
use crate::isa::x86_16::regs::{self, AX, CX, DX};
use crate::isa::x86_16::{ASLOC, ASSYM};
use crate::isa::EmitOpts;
use crate::result::{CodegenError, CodegenResult};
use log::debug;
use std::io::Write;

/// Assembly emission entry point. The function must be fully selected and
/// register-allocated; emission does not mutate it.
pub fn emit_fn(f: &Function, opts: &EmitOpts, out: &mut dyn Write) -> CodegenResult<()> {
    debug!("emitting:\n{}", f);
    Emitter {
        f,
        opts,
        out,
        label: 0,
    }
    .run()
}

struct Emitter<'a> {
    f: &'a Function,
    opts: &'a EmitOpts,
    out: &'a mut dyn Write,
    /// Per-function counter for synthetic local labels.
    label: u32,
}

/// Is this operand the designated AX:DX word pair?
fn is_pair_reg(r: Ref) -> bool {
    r == Ref::Reg(AX)
}

fn is_memish(r: Ref) -> bool {
    matches!(r, Ref::Slot(_) | Ref::Mem(_))
}

fn block_label(n: usize) -> String {
    format!("{}b{}", ASLOC, n)
}

fn sym_str(sym: &str, offset: i64) -> String {
    if offset != 0 {
        format!("{}{}{:+}", ASSYM, sym, offset)
    } else {
        format!("{}{}", ASSYM, sym)
    }
}

impl<'a> Emitter<'a> {
    fn run(&mut self) -> CodegenResult<()> {
        writeln!(self.out)?;
        writeln!(self.out, "{}{}:", ASSYM, self.f.name)?;
        writeln!(self.out, "\tpush bp")?;
        writeln!(self.out, "\tmov bp, sp")?;
        if self.f.slot > 0 {
            writeln!(self.out, "\tsub sp, {}", 2 * self.f.slot)?;
        }
        for (n, b) in self.f.blocks.iter().enumerate() {
            if n != self.f.start.index() {
                writeln!(self.out, "{}:", block_label(n))?;
            }
            for i in &b.insts {
                self.inst(i)?;
            }
            self.jump(n)?;
        }
        Ok(())
    }

    fn fresh_label(&mut self) -> String {
        let l = format!("{}t{}", ASLOC, self.label);
        self.label += 1;
        l
    }

    /// Resolve a frame slot to its byte offset from BP. Negative slots are
    /// parameters above the saved BP; non-negative slots are locals below.
    fn slot_off(&self, s: i32) -> i64 {
        if s < 0 {
            2 * -(s as i64)
        } else {
            -2 * (self.f.slot - s) as i64
        }
    }

    fn reg_str(&self, r: Reg) -> CodegenResult<&'static str> {
        if r.is_virt() {
            return Err(CodegenError::UnallocatedReg(format!("{:?}", r)));
        }
        Ok(regs::name(r))
    }

    fn con_str(&self, c: &Con) -> String {
        match c {
            Con::Bits(v) => v.to_string(),
            Con::Addr { sym, offset } => sym_str(sym, *offset),
        }
    }

    /// An operand in value position.
    fn ref_str(&self, r: Ref) -> CodegenResult<String> {
        match r {
            Ref::Reg(reg) => Ok(self.reg_str(reg)?.to_string()),
            Ref::Con(c) => Ok(self.con_str(self.f.con(c))),
            Ref::Slot(s) => Ok(format!("[bp{:+}]", self.slot_off(s))),
            Ref::Mem(m) => Ok(format!("word ptr {}", self.mem_str(m, 0)?)),
            Ref::None | Ref::CallInfo(_) => Err(CodegenError::InvalidIr(
                "sentinel operand in value position",
            )),
        }
    }

    /// An operand in register-or-memory destination position: memory forms
    /// get an explicit size so immediates stay unambiguous.
    fn dst_str(&self, r: Ref) -> CodegenResult<String> {
        match r {
            Ref::Reg(reg) => Ok(self.reg_str(reg)?.to_string()),
            Ref::Slot(s) => Ok(format!("word ptr [bp{:+}]", self.slot_off(s))),
            Ref::Mem(m) => Ok(format!("word ptr {}", self.mem_str(m, 0)?)),
            _ => Err(CodegenError::InvalidIr("bad destination operand")),
        }
    }

    /// An operand in memory-address position, shifted by `extra` bytes.
    fn addr_str(&self, r: Ref, extra: i64) -> CodegenResult<String> {
        match r {
            Ref::Mem(m) => self.mem_str(m, extra),
            Ref::Slot(s) => Ok(format!("[bp{:+}]", self.slot_off(s) + extra)),
            Ref::Reg(reg) => {
                if extra == 0 {
                    Ok(format!("[{}]", self.reg_str(reg)?))
                } else {
                    Ok(format!("[{}+{}]", self.reg_str(reg)?, extra))
                }
            }
            Ref::Con(c) => match self.f.con(c) {
                Con::Addr { sym, offset } => Ok(format!("[{}]", sym_str(sym, offset + extra))),
                Con::Bits(v) => Ok(format!("[{}]", v + extra)),
            },
            _ => Err(CodegenError::InvalidIr("bad memory operand")),
        }
    }

    fn word_addr(&self, r: Ref, extra: i64) -> CodegenResult<String> {
        Ok(format!("word ptr {}", self.addr_str(r, extra)?))
    }

    fn mem_str(&self, midx: MemIdx, extra: i64) -> CodegenResult<String> {
        let m = self.f.mem(midx);
        if m.scale > 1 {
            return Err(CodegenError::UnsupportedScale(m.scale));
        }
        let mut s = String::from("[");
        let mut any = false;
        match m.base {
            Ref::Reg(r) => {
                s.push_str(self.reg_str(r)?);
                any = true;
            }
            Ref::Slot(sl) => {
                s.push_str(&format!("bp{:+}", self.slot_off(sl)));
                any = true;
            }
            Ref::None => {}
            _ => return Err(CodegenError::InvalidIr("bad memory base")),
        }
        match m.index {
            Ref::Reg(r) => {
                if any {
                    s.push('+');
                }
                s.push_str(self.reg_str(r)?);
                any = true;
            }
            Ref::None => {}
            _ => return Err(CodegenError::InvalidIr("bad memory index")),
        }
        match &m.offset {
            Some(Con::Bits(v)) => {
                let v = v + extra;
                if any {
                    s.push_str(&format!("{:+}", v));
                } else {
                    s.push_str(&v.to_string());
                }
            }
            Some(Con::Addr { sym, offset }) => {
                if any {
                    s.push('+');
                }
                s.push_str(&sym_str(sym, offset + extra));
            }
            None => {
                if extra != 0 {
                    s.push_str(&format!("{:+}", extra));
                } else if !any {
                    s.push('0');
                }
            }
        }
        s.push(']');
        Ok(s)
    }

    /// The 8-bit name of a register operand; only AX..BX have byte halves.
    fn byte_reg(&self, r: Ref) -> CodegenResult<&'static str> {
        if let Ref::Reg(reg) = r {
            if reg.is_phys() {
                if let Some(n) = regs::name8(reg) {
                    return Ok(n);
                }
            }
        }
        Err(CodegenError::NoByteHalf(format!("{}", r)))
    }

    /// One half of a word-pair operand. A register pair is always AX (low)
    /// with DX (high); immediates split into their low and high words.
    fn pair_ref(&self, r: Ref, hi: bool) -> CodegenResult<String> {
        match r {
            Ref::Slot(s) => {
                let off = self.slot_off(s) + if hi { 2 } else { 0 };
                Ok(format!("word ptr [bp{:+}]", off))
            }
            Ref::Mem(m) => Ok(format!(
                "word ptr {}",
                self.mem_str(m, if hi { 2 } else { 0 })?
            )),
            Ref::Con(c) => match self.f.con(c) {
                Con::Bits(v) => {
                    let w = if hi { (v >> 16) & 0xffff } else { v & 0xffff };
                    Ok(w.to_string())
                }
                Con::Addr { .. } => Err(CodegenError::InvalidIr(
                    "address constant in word-pair position",
                )),
            },
            Ref::Reg(reg) if reg == AX => Ok(if hi { "dx" } else { "ax" }.to_string()),
            Ref::Reg(reg) if reg.is_virt() => {
                Err(CodegenError::UnallocatedReg(format!("{:?}", reg)))
            }
            _ => Err(CodegenError::InvalidIr(
                "32-bit value in a single word register",
            )),
        }
    }

    //=========================================================================
    // Instruction dispatch

    fn inst(&mut self, i: &Inst) -> CodegenResult<()> {
        match i.op {
            Op::Shl | Op::Shr | Op::Sar if i.cls == Class::I16 => return self.shift16(i),
            Op::Div | Op::Udiv | Op::Rem | Op::Urem if i.cls == Class::I16 => {
                return self.divrem16(i)
            }
            _ => {}
        }
        if i.cls.is_float() {
            return self.fpu(i);
        }
        if i.cls == Class::I32 {
            return self.pair_op(i);
        }
        match i.op {
            Op::Call | Op::CallFar => self.call(i),
            Op::Salloc => self.salloc(i),
            _ => self.table16(i),
        }
    }

    /// Shifts: the count must be in CL unless it is an immediate.
    fn shift16(&mut self, i: &Inst) -> CodegenResult<()> {
        let mnem = match i.op {
            Op::Shl => "shl",
            Op::Shr => "shr",
            _ => "sar",
        };
        let count = i.args[1];
        match count {
            Ref::Reg(r) if r != CX => {
                writeln!(self.out, "\tmov cx, {}", self.reg_str(r)?)?;
            }
            Ref::Slot(s) => {
                writeln!(self.out, "\tmov cx, [bp{:+}]", self.slot_off(s))?;
            }
            _ => {}
        }
        let mut val = i.args[0];
        if let (Ref::Reg(to), Ref::Reg(v)) = (i.to, i.args[0]) {
            if to != v {
                writeln!(self.out, "\tmov {}, {}", self.reg_str(to)?, self.reg_str(v)?)?;
                val = i.to;
            }
        }
        let dst = self.dst_str(val)?;
        let cnt = match count {
            Ref::Con(c) => match self.f.con(c) {
                Con::Bits(v) => v.to_string(),
                Con::Addr { .. } => {
                    return Err(CodegenError::InvalidIr("address constant as shift count"))
                }
            },
            _ => "cl".to_string(),
        };
        writeln!(self.out, "\t{} {}, {}", mnem, dst, cnt)?;
        Ok(())
    }

    /// Division pins the dividend to AX, extends into DX, and reads the
    /// quotient from AX or the remainder from DX.
    fn divrem16(&mut self, i: &Inst) -> CodegenResult<()> {
        let signed = matches!(i.op, Op::Div | Op::Rem);
        if i.args[0] != Ref::Reg(AX) {
            writeln!(self.out, "\tmov ax, {}", self.ref_str(i.args[0])?)?;
        }
        if signed {
            writeln!(self.out, "\tcwd")?;
        } else {
            writeln!(self.out, "\txor dx, dx")?;
        }
        let divisor = match i.args[1] {
            // The hardware divides only by a register or memory operand.
            Ref::Con(c) => {
                writeln!(self.out, "\tmov cx, {}", self.con_str(self.f.con(c)))?;
                "cx".to_string()
            }
            Ref::Reg(r) => self.reg_str(r)?.to_string(),
            Ref::Slot(s) => format!("word ptr [bp{:+}]", self.slot_off(s)),
            Ref::Mem(m) => format!("word ptr {}", self.mem_str(m, 0)?),
            _ => return Err(CodegenError::InvalidIr("bad divisor operand")),
        };
        writeln!(self.out, "\t{} {}", if signed { "idiv" } else { "div" }, divisor)?;
        let fixed = if matches!(i.op, Op::Div | Op::Udiv) {
            AX
        } else {
            DX
        };
        if !i.to.is_none() && i.to != Ref::Reg(fixed) {
            writeln!(
                self.out,
                "\tmov {}, {}",
                self.dst_str(i.to)?,
                regs::name(fixed)
            )?;
        }
        Ok(())
    }

    fn call(&mut self, i: &Inst) -> CodegenResult<()> {
        let far = i.op == Op::CallFar;
        match i.args[0] {
            Ref::Reg(r) => {
                if far {
                    return Err(CodegenError::FarIndirectCall);
                }
                writeln!(self.out, "\tcall {}", self.reg_str(r)?)?;
                Ok(())
            }
            Ref::Con(c) => match self.f.con(c) {
                Con::Addr { sym, offset } => {
                    let name = sym_str(sym, *offset);
                    if far {
                        writeln!(self.out, "\tcall far ptr {}", name)?;
                    } else {
                        writeln!(self.out, "\tcall {}", name)?;
                    }
                    Ok(())
                }
                Con::Bits(_) => Err(CodegenError::BadCallTarget),
            },
            _ => Err(CodegenError::BadCallTarget),
        }
    }

    /// Stack adjustment: a non-negative size allocates (sub from SP), a
    /// negative one deallocates. An optional destination receives the
    /// adjusted stack pointer.
    fn salloc(&mut self, i: &Inst) -> CodegenResult<()> {
        let v = match i.args[0] {
            Ref::Con(c) => match self.f.con(c) {
                Con::Bits(v) => *v,
                Con::Addr { .. } => return Err(CodegenError::NonConstStackAdjust),
            },
            _ => return Err(CodegenError::NonConstStackAdjust),
        };
        if v < 0 {
            writeln!(self.out, "\tadd sp, {}", -v)?;
        } else {
            writeln!(self.out, "\tsub sp, {}", v)?;
        }
        if let Ref::Reg(r) = i.to {
            writeln!(self.out, "\tmov {}, sp", self.reg_str(r)?)?;
        }
        Ok(())
    }

    //=========================================================================
    // Generic 16-bit forms

    /// A two-address read-modify-write instruction. The allocator arranges
    /// for the destination to coincide with the first operand; when it does
    /// not, a move repairs the difference first.
    fn rmw(&mut self, mnem: &str, i: &Inst) -> CodegenResult<()> {
        let d = self.dst_str(i.to)?;
        if i.to != i.args[0] {
            writeln!(self.out, "\tmov {}, {}", d, self.ref_str(i.args[0])?)?;
        }
        writeln!(self.out, "\t{} {}, {}", mnem, d, self.ref_str(i.args[1])?)?;
        Ok(())
    }

    fn table16(&mut self, i: &Inst) -> CodegenResult<()> {
        match i.op {
            Op::Add => self.rmw("add", i),
            Op::Sub => self.rmw("sub", i),
            Op::Mul => self.rmw("imul", i),
            Op::And => self.rmw("and", i),
            Op::Or => self.rmw("or", i),
            Op::Xor => self.rmw("xor", i),
            Op::Neg => {
                let d = self.dst_str(i.to)?;
                if i.to != i.args[0] {
                    writeln!(self.out, "\tmov {}, {}", d, self.ref_str(i.args[0])?)?;
                }
                writeln!(self.out, "\tneg {}", d)?;
                Ok(())
            }
            Op::Copy => {
                if i.to != i.args[0] {
                    writeln!(
                        self.out,
                        "\tmov {}, {}",
                        self.dst_str(i.to)?,
                        self.ref_str(i.args[0])?
                    )?;
                }
                Ok(())
            }
            Op::Swap => {
                writeln!(
                    self.out,
                    "\txchg {}, {}",
                    self.dst_str(i.to)?,
                    self.ref_str(i.args[0])?
                )?;
                Ok(())
            }
            Op::Addr => {
                writeln!(
                    self.out,
                    "\tlea {}, {}",
                    self.dst_str(i.to)?,
                    self.addr_str(i.args[0], 0)?
                )?;
                Ok(())
            }
            Op::Load | Op::SLoad16 | Op::ULoad16 => {
                writeln!(
                    self.out,
                    "\tmov {}, {}",
                    self.dst_str(i.to)?,
                    self.word_addr(i.args[0], 0)?
                )?;
                Ok(())
            }
            Op::SLoad8 => {
                writeln!(
                    self.out,
                    "\tmovsx {}, byte ptr {}",
                    self.dst_str(i.to)?,
                    self.addr_str(i.args[0], 0)?
                )?;
                Ok(())
            }
            Op::ULoad8 => {
                writeln!(
                    self.out,
                    "\tmovzx {}, byte ptr {}",
                    self.dst_str(i.to)?,
                    self.addr_str(i.args[0], 0)?
                )?;
                Ok(())
            }
            Op::Sext8 => {
                let b = self.byte_reg(i.args[0])?;
                writeln!(self.out, "\tmovsx {}, {}", self.dst_str(i.to)?, b)?;
                Ok(())
            }
            Op::Zext8 => {
                let b = self.byte_reg(i.args[0])?;
                writeln!(self.out, "\tmovzx {}, {}", self.dst_str(i.to)?, b)?;
                Ok(())
            }
            // Width no-ops at word class.
            Op::Sext16 | Op::Zext16 => {
                if i.to != i.args[0] {
                    writeln!(
                        self.out,
                        "\tmov {}, {}",
                        self.dst_str(i.to)?,
                        self.ref_str(i.args[0])?
                    )?;
                }
                Ok(())
            }
            Op::Store8 => {
                let v = match i.args[0] {
                    Ref::Con(_) => self.ref_str(i.args[0])?,
                    _ => self.byte_reg(i.args[0])?.to_string(),
                };
                writeln!(
                    self.out,
                    "\tmov byte ptr {}, {}",
                    self.addr_str(i.args[1], 0)?,
                    v
                )?;
                Ok(())
            }
            Op::Store16 => {
                writeln!(
                    self.out,
                    "\tmov {}, {}",
                    self.word_addr(i.args[1], 0)?,
                    self.ref_str(i.args[0])?
                )?;
                Ok(())
            }
            Op::Set(cc) => {
                writeln!(
                    self.out,
                    "\tcmp {}, {}",
                    self.dst_str(i.args[0])?,
                    self.ref_str(i.args[1])?
                )?;
                let b = self.byte_reg(i.to)?;
                writeln!(self.out, "\tset{} {}", cc.suffix(), b)?;
                writeln!(self.out, "\tmovzx {}, {}", self.ref_str(i.to)?, b)?;
                Ok(())
            }
            Op::Cmp(_) | Op::FCmp(_) => Err(CodegenError::InvalidIr(
                "unselected comparison reached emission",
            )),
            Op::Par | Op::ParSext8 | Op::ParZext8 | Op::ParSext16 | Op::ParZext16 | Op::Arg => {
                Err(CodegenError::InvalidIr("ABI marker reached emission"))
            }
            Op::Nop => Ok(()),
            // Routed by class; landing here means the class tag is wrong.
            Op::Store32
            | Op::StoreF32
            | Op::StoreF64
            | Op::Fpromote
            | Op::Fdemote
            | Op::FcvtFromSint
            | Op::FcvtFromUint
            | Op::FcvtToSint => self.unhandled(i),
            Op::Call | Op::CallFar | Op::Salloc => unreachable!("dispatched before table lookup"),
            Op::Div | Op::Udiv | Op::Rem | Op::Urem | Op::Shl | Op::Shr | Op::Sar => {
                unreachable!("dispatched before table lookup")
            }
        }
    }

    //=========================================================================
    // Word-pair (32-bit) expansions

    fn pair_op(&mut self, i: &Inst) -> CodegenResult<()> {
        match i.op {
            Op::Add | Op::Sub | Op::And | Op::Or | Op::Xor => self.pair_alu(i),
            Op::Mul => self.pair_mul(i),
            Op::Shl | Op::Shr | Op::Sar => self.pair_shift(i),
            Op::Copy => self.move_pair(i.to, i.args[0]),
            Op::Sext16 => self.pair_ext(i, true),
            Op::Zext16 => self.pair_ext(i, false),
            Op::Load => self.pair_load(i),
            Op::Store32 => self.pair_store(i),
            Op::Set(cc) => self.pair_set(i, cc),
            _ => self.unhandled(i),
        }
    }

    /// Copy a word pair. Immediates move directly; memory-to-memory stages
    /// through AX.
    fn move_pair(&mut self, to: Ref, from: Ref) -> CodegenResult<()> {
        if to == from {
            return Ok(());
        }
        let to_lo = self.pair_ref(to, false)?;
        let to_hi = self.pair_ref(to, true)?;
        if matches!(from, Ref::Con(_)) || is_pair_reg(from) || is_pair_reg(to) {
            writeln!(self.out, "\tmov {}, {}", to_lo, self.pair_ref(from, false)?)?;
            writeln!(self.out, "\tmov {}, {}", to_hi, self.pair_ref(from, true)?)?;
        } else {
            writeln!(self.out, "\tmov ax, {}", self.pair_ref(from, false)?)?;
            writeln!(self.out, "\tmov {}, ax", to_lo)?;
            writeln!(self.out, "\tmov ax, {}", self.pair_ref(from, true)?)?;
            writeln!(self.out, "\tmov {}, ax", to_hi)?;
        }
        Ok(())
    }

    /// Pairwise arithmetic: the low words combine first, then the high
    /// words pick up the carry through the adc/sbb forms. Moves between
    /// the words do not disturb the carry flag.
    fn pair_alu(&mut self, i: &Inst) -> CodegenResult<()> {
        let (m_lo, m_hi) = match i.op {
            Op::Add => ("add", "adc"),
            Op::Sub => ("sub", "sbb"),
            Op::And => ("and", "and"),
            Op::Or => ("or", "or"),
            _ => ("xor", "xor"),
        };
        if i.to != i.args[0] {
            self.move_pair(i.to, i.args[0])?;
        }
        let b = i.args[1];
        let to_lo = self.pair_ref(i.to, false)?;
        let to_hi = self.pair_ref(i.to, true)?;
        if is_pair_reg(i.to) || is_pair_reg(b) || matches!(b, Ref::Con(_)) {
            writeln!(self.out, "\t{} {}, {}", m_lo, to_lo, self.pair_ref(b, false)?)?;
            writeln!(self.out, "\t{} {}, {}", m_hi, to_hi, self.pair_ref(b, true)?)?;
        } else {
            writeln!(self.out, "\tmov ax, {}", self.pair_ref(b, false)?)?;
            writeln!(self.out, "\t{} {}, ax", m_lo, to_lo)?;
            writeln!(self.out, "\tmov ax, {}", self.pair_ref(b, true)?)?;
            writeln!(self.out, "\t{} {}, ax", m_hi, to_hi)?;
        }
        Ok(())
    }

    /// Single-precision multiply of the low words: DX:AX receives the full
    /// 32-bit product, correct whenever both operands fit in one word.
    fn pair_mul(&mut self, i: &Inst) -> CodegenResult<()> {
        let (ax_side, other) = if is_pair_reg(i.args[1]) && !is_pair_reg(i.args[0]) {
            (i.args[1], i.args[0])
        } else {
            (i.args[0], i.args[1])
        };
        if !is_pair_reg(ax_side) {
            writeln!(self.out, "\tmov ax, {}", self.pair_ref(ax_side, false)?)?;
        }
        match other {
            Ref::Con(_) => {
                writeln!(self.out, "\tmov cx, {}", self.pair_ref(other, false)?)?;
                writeln!(self.out, "\timul cx")?;
            }
            _ if is_pair_reg(other) => {
                writeln!(self.out, "\timul ax")?;
            }
            _ => {
                writeln!(self.out, "\timul {}", self.pair_ref(other, false)?)?;
            }
        }
        if !is_pair_reg(i.to) {
            writeln!(self.out, "\tmov {}, ax", self.pair_ref(i.to, false)?)?;
            writeln!(self.out, "\tmov {}, dx", self.pair_ref(i.to, true)?)?;
        }
        Ok(())
    }

    fn pair_shift_step(&mut self, op: Op, lo: &str, hi: &str) -> CodegenResult<()> {
        match op {
            Op::Shl => {
                writeln!(self.out, "\tshl {}, 1", lo)?;
                writeln!(self.out, "\trcl {}, 1", hi)?;
            }
            Op::Shr => {
                writeln!(self.out, "\tshr {}, 1", hi)?;
                writeln!(self.out, "\trcr {}, 1", lo)?;
            }
            _ => {
                writeln!(self.out, "\tsar {}, 1", hi)?;
                writeln!(self.out, "\trcr {}, 1", lo)?;
            }
        }
        Ok(())
    }

    /// Word-pair shifts. An immediate count of 16 or more moves one word
    /// across and zero/sign-fills the vacated word; smaller and dynamic
    /// counts run a one-bit-per-iteration loop chained through the carry
    /// rotate forms.
    fn pair_shift(&mut self, i: &Inst) -> CodegenResult<()> {
        if i.to != i.args[0] {
            self.move_pair(i.to, i.args[0])?;
        }
        let lo = self.pair_ref(i.to, false)?;
        let hi = self.pair_ref(i.to, true)?;
        let con = match i.args[1] {
            Ref::Con(c) => match self.f.con(c) {
                Con::Bits(v) => Some(*v),
                Con::Addr { .. } => {
                    return Err(CodegenError::InvalidIr("address constant as shift count"))
                }
            },
            _ => None,
        };
        if let Some(n) = con {
            let n = n & 31;
            if n == 0 {
                return Ok(());
            }
            if n >= 16 {
                let rest = n - 16;
                match i.op {
                    Op::Shl => {
                        writeln!(self.out, "\tmov ax, {}", lo)?;
                        if rest > 0 {
                            writeln!(self.out, "\tmov cl, {}", rest)?;
                            writeln!(self.out, "\tshl ax, cl")?;
                        }
                        writeln!(self.out, "\tmov {}, ax", hi)?;
                        writeln!(self.out, "\tmov {}, 0", lo)?;
                    }
                    Op::Shr => {
                        writeln!(self.out, "\tmov ax, {}", hi)?;
                        if rest > 0 {
                            writeln!(self.out, "\tmov cl, {}", rest)?;
                            writeln!(self.out, "\tshr ax, cl")?;
                        }
                        writeln!(self.out, "\tmov {}, ax", lo)?;
                        writeln!(self.out, "\tmov {}, 0", hi)?;
                    }
                    _ => {
                        writeln!(self.out, "\tmov ax, {}", hi)?;
                        if rest > 0 {
                            writeln!(self.out, "\tmov cl, {}", rest)?;
                            writeln!(self.out, "\tsar ax, cl")?;
                        }
                        writeln!(self.out, "\tmov {}, ax", lo)?;
                        writeln!(self.out, "\tcwd")?;
                        writeln!(self.out, "\tmov {}, dx", hi)?;
                    }
                }
            } else {
                writeln!(self.out, "\tmov cx, {}", n)?;
                let top = self.fresh_label();
                writeln!(self.out, "{}:", top)?;
                self.pair_shift_step(i.op, &lo, &hi)?;
                writeln!(self.out, "\tloop {}", top)?;
            }
        } else {
            match i.args[1] {
                Ref::Reg(r) if r == CX => {}
                Ref::Reg(r) => writeln!(self.out, "\tmov cx, {}", self.reg_str(r)?)?,
                Ref::Slot(s) => writeln!(self.out, "\tmov cx, [bp{:+}]", self.slot_off(s))?,
                Ref::Mem(m) => {
                    writeln!(self.out, "\tmov cx, word ptr {}", self.mem_str(m, 0)?)?
                }
                _ => return Err(CodegenError::InvalidIr("bad shift count")),
            }
            let top = self.fresh_label();
            let done = self.fresh_label();
            writeln!(self.out, "\tjcxz {}", done)?;
            writeln!(self.out, "{}:", top)?;
            self.pair_shift_step(i.op, &lo, &hi)?;
            writeln!(self.out, "\tloop {}", top)?;
            writeln!(self.out, "{}:", done)?;
        }
        Ok(())
    }

    /// Compare one half of two word pairs, staging through AX only when
    /// neither side can serve as the register operand.
    fn pair_cmp(&mut self, a: Ref, b: Ref, hi: bool) -> CodegenResult<()> {
        let a_s = self.pair_ref(a, hi)?;
        let b_s = self.pair_ref(b, hi)?;
        if matches!(a, Ref::Con(_)) || (is_memish(a) && is_memish(b)) {
            writeln!(self.out, "\tmov ax, {}", a_s)?;
            writeln!(self.out, "\tcmp ax, {}", b_s)?;
        } else {
            writeln!(self.out, "\tcmp {}, {}", a_s, b_s)?;
        }
        Ok(())
    }

    /// Word-pair comparison: compare the high words; only if they are equal
    /// compare the low words (unsigned); branch to a local true/false label
    /// pair and materialize 0/1.
    fn pair_set(&mut self, i: &Inst, cc: IntCC) -> CodegenResult<()> {
        let t = self.fresh_label();
        let fl = self.fresh_label();
        let d = self.fresh_label();
        self.pair_cmp(i.args[0], i.args[1], true)?;
        match cc {
            IntCC::Eq => writeln!(self.out, "\tjne {}", fl)?,
            IntCC::Ne => writeln!(self.out, "\tjne {}", t)?,
            _ => {
                let (strict, inv) = match cc {
                    IntCC::Slt | IntCC::Sle => ("l", "g"),
                    IntCC::Sgt | IntCC::Sge => ("g", "l"),
                    IntCC::Ult | IntCC::Ule => ("b", "a"),
                    _ => ("a", "b"),
                };
                writeln!(self.out, "\tj{} {}", strict, t)?;
                writeln!(self.out, "\tj{} {}", inv, fl)?;
            }
        }
        self.pair_cmp(i.args[0], i.args[1], false)?;
        match cc {
            IntCC::Eq => writeln!(self.out, "\tje {}", t)?,
            IntCC::Ne => writeln!(self.out, "\tjne {}", t)?,
            _ => writeln!(self.out, "\tj{} {}", cc.unsigned().suffix(), t)?,
        }
        let dst = self.dst_str(i.to)?;
        writeln!(self.out, "{}:", fl)?;
        writeln!(self.out, "\tmov {}, 0", dst)?;
        writeln!(self.out, "\tjmp {}", d)?;
        writeln!(self.out, "{}:", t)?;
        writeln!(self.out, "\tmov {}, 1", dst)?;
        writeln!(self.out, "{}:", d)?;
        Ok(())
    }

    /// 32-bit load: two consecutive word transfers.
    fn pair_load(&mut self, i: &Inst) -> CodegenResult<()> {
        let s_lo = self.word_addr(i.args[0], 0)?;
        let s_hi = self.word_addr(i.args[0], 2)?;
        if is_pair_reg(i.to) {
            writeln!(self.out, "\tmov ax, {}", s_lo)?;
            writeln!(self.out, "\tmov dx, {}", s_hi)?;
        } else {
            writeln!(self.out, "\tmov ax, {}", s_lo)?;
            writeln!(self.out, "\tmov {}, ax", self.pair_ref(i.to, false)?)?;
            writeln!(self.out, "\tmov ax, {}", s_hi)?;
            writeln!(self.out, "\tmov {}, ax", self.pair_ref(i.to, true)?)?;
        }
        Ok(())
    }

    /// 32-bit store: two consecutive word transfers.
    fn pair_store(&mut self, i: &Inst) -> CodegenResult<()> {
        let d_lo = self.word_addr(i.args[1], 0)?;
        let d_hi = self.word_addr(i.args[1], 2)?;
        match i.args[0] {
            Ref::Con(_) => {
                writeln!(self.out, "\tmov {}, {}", d_lo, self.pair_ref(i.args[0], false)?)?;
                writeln!(self.out, "\tmov {}, {}", d_hi, self.pair_ref(i.args[0], true)?)?;
            }
            v if is_pair_reg(v) => {
                writeln!(self.out, "\tmov {}, ax", d_lo)?;
                writeln!(self.out, "\tmov {}, dx", d_hi)?;
            }
            v => {
                writeln!(self.out, "\tmov ax, {}", self.pair_ref(v, false)?)?;
                writeln!(self.out, "\tmov {}, ax", d_lo)?;
                writeln!(self.out, "\tmov ax, {}", self.pair_ref(v, true)?)?;
                writeln!(self.out, "\tmov {}, ax", d_hi)?;
            }
        }
        Ok(())
    }

    /// Widen a word into a pair: sign-extension through cwd, or a zeroed
    /// high word.
    fn pair_ext(&mut self, i: &Inst, signed: bool) -> CodegenResult<()> {
        if i.args[0] != Ref::Reg(AX) {
            writeln!(self.out, "\tmov ax, {}", self.ref_str(i.args[0])?)?;
        }
        if signed {
            writeln!(self.out, "\tcwd")?;
            if !is_pair_reg(i.to) {
                writeln!(self.out, "\tmov {}, ax", self.pair_ref(i.to, false)?)?;
                writeln!(self.out, "\tmov {}, dx", self.pair_ref(i.to, true)?)?;
            }
        } else if is_pair_reg(i.to) {
            writeln!(self.out, "\txor dx, dx")?;
        } else {
            writeln!(self.out, "\tmov {}, ax", self.pair_ref(i.to, false)?)?;
            writeln!(self.out, "\tmov {}, 0", self.pair_ref(i.to, true)?)?;
        }
        Ok(())
    }

    //=========================================================================
    // 8087 sequences

    fn fsize(&self, cls: Class) -> CodegenResult<&'static str> {
        match cls {
            Class::F32 => Ok("dword"),
            Class::F64 => Ok("qword"),
            _ => Err(CodegenError::InvalidIr("float handler on integer class")),
        }
    }

    fn float_addr(&self, r: Ref) -> CodegenResult<String> {
        match r {
            Ref::Slot(_) | Ref::Mem(_) => self.addr_str(r, 0),
            Ref::Con(c) => match self.f.con(c) {
                Con::Addr { sym, offset } => Ok(format!("[{}]", sym_str(sym, *offset))),
                Con::Bits(_) => Err(CodegenError::InvalidIr(
                    "floating-point operand must reside in memory",
                )),
            },
            _ => Err(CodegenError::InvalidIr(
                "floating-point operand must reside in memory",
            )),
        }
    }

    fn fld(&mut self, sz: &str, r: Ref) -> CodegenResult<()> {
        let a = self.float_addr(r)?;
        writeln!(self.out, "\tfld {} ptr {}", sz, a)?;
        Ok(())
    }

    fn fstp(&mut self, sz: &str, r: Ref) -> CodegenResult<()> {
        let a = self.float_addr(r)?;
        writeln!(self.out, "\tfstp {} ptr {}", sz, a)?;
        Ok(())
    }

    /// Every floating-point value passes through the coprocessor stack,
    /// even for a plain copy.
    fn fpu(&mut self, i: &Inst) -> CodegenResult<()> {
        let sz = self.fsize(i.cls)?;
        match i.op {
            Op::Add | Op::Sub | Op::Mul | Op::Div => {
                // Left loaded first: the reverse-popping combine computes
                // ST(1) op ST(0), i.e. left op right.
                self.fld(sz, i.args[0])?;
                self.fld(sz, i.args[1])?;
                let mnem = match i.op {
                    Op::Add => "faddp",
                    Op::Sub => "fsubp",
                    Op::Mul => "fmulp",
                    _ => "fdivp",
                };
                writeln!(self.out, "\t{}", mnem)?;
                self.fstp(sz, i.to)
            }
            Op::Neg => {
                self.fld(sz, i.args[0])?;
                writeln!(self.out, "\tfchs")?;
                self.fstp(sz, i.to)
            }
            Op::Copy | Op::Load => {
                self.fld(sz, i.args[0])?;
                self.fstp(sz, i.to)
            }
            Op::StoreF32 | Op::StoreF64 => {
                self.fld(sz, i.args[0])?;
                self.fstp(sz, i.args[1])
            }
            Op::FCmp(cc) => {
                // Right loaded first so the popping compare reads the
                // flags as left ? right.
                self.fld(sz, i.args[1])?;
                self.fld(sz, i.args[0])?;
                writeln!(self.out, "\tfcompp")?;
                writeln!(self.out, "\tfstsw ax")?;
                writeln!(self.out, "\tsahf")?;
                let b = self.byte_reg(i.to)?;
                writeln!(self.out, "\tset{} {}", cc.suffix(), b)?;
                writeln!(self.out, "\tmovzx {}, {}", self.ref_str(i.to)?, b)?;
                Ok(())
            }
            Op::Fpromote => {
                self.fld("dword", i.args[0])?;
                self.fstp("qword", i.to)
            }
            Op::Fdemote => {
                self.fld("qword", i.args[0])?;
                self.fstp("dword", i.to)
            }
            Op::FcvtFromSint => {
                match i.args[0] {
                    Ref::Slot(_) | Ref::Mem(_) => {
                        writeln!(
                            self.out,
                            "\tfild word ptr {}",
                            self.addr_str(i.args[0], 0)?
                        )?;
                    }
                    Ref::Reg(r) => {
                        // The coprocessor loads integers from memory only.
                        writeln!(self.out, "\tpush {}", self.reg_str(r)?)?;
                        writeln!(self.out, "\tmov bx, sp")?;
                        writeln!(self.out, "\tfild word ptr [bx]")?;
                        writeln!(self.out, "\tadd sp, 2")?;
                    }
                    _ => return Err(CodegenError::InvalidIr("bad integer-conversion operand")),
                }
                self.fstp(sz, i.to)
            }
            Op::FcvtFromUint => {
                // The coprocessor only loads signed integers; zero-extend
                // the word to 32 bits on the stack before the load.
                let zero = if i.args[0] == Ref::Reg(DX) { "ax" } else { "dx" };
                writeln!(self.out, "\txor {}, {}", zero, zero)?;
                writeln!(self.out, "\tpush {}", zero)?;
                match i.args[0] {
                    Ref::Reg(r) => writeln!(self.out, "\tpush {}", self.reg_str(r)?)?,
                    Ref::Slot(_) | Ref::Mem(_) => {
                        writeln!(self.out, "\tpush {}", self.word_addr(i.args[0], 0)?)?
                    }
                    Ref::Con(c) => {
                        writeln!(self.out, "\tmov ax, {}", self.con_str(self.f.con(c)))?;
                        writeln!(self.out, "\tpush ax")?;
                    }
                    _ => return Err(CodegenError::InvalidIr("bad integer-conversion operand")),
                }
                writeln!(self.out, "\tmov bx, sp")?;
                writeln!(self.out, "\tfild dword ptr [bx]")?;
                writeln!(self.out, "\tadd sp, 4")?;
                self.fstp(sz, i.to)
            }
            Op::FcvtToSint => {
                // The class tag is the operand's; the result is a word.
                self.fld(sz, i.args[0])?;
                match i.to {
                    Ref::Slot(_) | Ref::Mem(_) => {
                        writeln!(self.out, "\tfistp word ptr {}", self.addr_str(i.to, 0)?)?;
                        Ok(())
                    }
                    Ref::Reg(r) => {
                        writeln!(self.out, "\tsub sp, 2")?;
                        writeln!(self.out, "\tmov bx, sp")?;
                        writeln!(self.out, "\tfistp word ptr [bx]")?;
                        writeln!(self.out, "\tpop {}", self.reg_str(r)?)?;
                        Ok(())
                    }
                    _ => Err(CodegenError::InvalidIr("bad integer-conversion result")),
                }
            }
            _ => self.unhandled(i),
        }
    }

    //=========================================================================
    // Terminators

    fn jump(&mut self, n: usize) -> CodegenResult<()> {
        let b = &self.f.blocks[n];
        let next = if n + 1 < self.f.blocks.len() {
            Some(crate::ir::BlockId((n + 1) as u32))
        } else {
            None
        };
        match b.jump.kind {
            JumpKind::Ret(_) => {
                writeln!(self.out, "\tmov sp, bp")?;
                writeln!(self.out, "\tpop bp")?;
                writeln!(self.out, "\tret")?;
                Ok(())
            }
            JumpKind::RetFar(_) => {
                writeln!(self.out, "\tmov sp, bp")?;
                writeln!(self.out, "\tpop bp")?;
                writeln!(self.out, "\tretf")?;
                Ok(())
            }
            JumpKind::Jmp => {
                let s1 = b.s1.ok_or(CodegenError::InvalidIr("jump without successor"))?;
                if Some(s1) != next {
                    writeln!(self.out, "\tjmp {}", block_label(s1.index()))?;
                }
                Ok(())
            }
            JumpKind::Jnz => {
                let s1 = b.s1.ok_or(CodegenError::InvalidIr("jump without successor"))?;
                let s2 = b.s2.ok_or(CodegenError::InvalidIr("jump without successor"))?;
                match b.jump.arg {
                    Ref::Reg(r) => {
                        let r = self.reg_str(r)?;
                        writeln!(self.out, "\ttest {}, {}", r, r)?;
                    }
                    Ref::Slot(s) => {
                        writeln!(
                            self.out,
                            "\tcmp word ptr [bp{:+}], 0",
                            self.slot_off(s)
                        )?;
                    }
                    _ => return Err(CodegenError::InvalidIr("bad branch operand")),
                }
                writeln!(self.out, "\tjnz {}", block_label(s1.index()))?;
                if Some(s2) != next {
                    writeln!(self.out, "\tjmp {}", block_label(s2.index()))?;
                }
                Ok(())
            }
            JumpKind::Flag(cc) => {
                let s1 = b.s1.ok_or(CodegenError::InvalidIr("jump without successor"))?;
                let s2 = b.s2.ok_or(CodegenError::InvalidIr("jump without successor"))?;
                writeln!(self.out, "\tj{} {}", cc.suffix(), block_label(s1.index()))?;
                if Some(s2) != next {
                    writeln!(self.out, "\tjmp {}", block_label(s2.index()))?;
                }
                Ok(())
            }
        }
    }

    //=========================================================================
    // Fallback

    /// An opcode/class pair with no handler: a placeholder comment by
    /// default, a hard error in strict mode.
    fn unhandled(&mut self, i: &Inst) -> CodegenResult<()> {
        if self.opts.strict {
            return Err(CodegenError::Unhandled {
                op: format!("{:?}", i.op),
                cls: format!("{:?}", i.cls),
            });
        }
        writeln!(self.out, "\t; unimplemented: {:?} {:?}", i.op, i.cls)?;
        Ok(())
    }
}
