//! Expression representation: instructions, the resolved linear IR, and its
//! lowering to Cranelift SSA.
//!
//! The types in this module follow the expression through its life cycle:
//!
//! - [`Instr`]: one validated instruction of a parsed expression. The parser
//!   produces a stack-balanced sequence of these; clip references are still
//!   symbolic (clip index + pixel offset / property name).
//! - [`Expression`]: an immutable, stack-balanced instruction sequence plus
//!   the maximum stack depth reached while simulating it.
//! - [`KernelOp`] / [`ResolvedExpr`]: the linear IR after reference
//!   resolution. Every input reference has been bound to an *input slot* —
//!   an index into the per-row staging block the execution engine fills —
//!   so the IR is position-independent and ready for constant folding and
//!   code generation.
//!
//! Code generation walks the linear ops once, mirroring their effect on a
//! compile-time stack of SSA values. Stack manipulation ops (`dup`, `swap`,
//! `drop`) therefore emit no machine code at all; everything else lowers to
//! straight-line vector (or scalar) instructions. Transcendental operators
//! and shifts call the crate's `extern "C"` math symbols, one lane at a time
//! in the vector body.

use cranelift::prelude::*;
use cranelift_codegen::ir::condcodes::FloatCC;
use cranelift_codegen::ir::Value;
use cranelift_module::Module;

use crate::errors::BuilderError;
use crate::operators;

/// Operators consuming one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKind {
    Neg,
    Abs,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    /// Logical not: 1.0 if the operand is zero, else 0.0
    Not,
    /// Bitwise complement of the saturated integer value
    BitNot,
    Floor,
    Ceil,
    Trunc,
    /// Round half to even
    Round,
}

/// Operators consuming two values. Comparisons return 0.0/1.0; the logical
/// operators treat any nonzero operand (including NaN) as true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
    /// Truncated modulo: `a - trunc(a/b) * b`
    Mod,
    Pow,
    Min,
    Max,
    Lt,
    Gt,
    Eq,
    Le,
    Ge,
    And,
    Or,
    Xor,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

/// Operators consuming three values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TernaryKind {
    /// `cond then else ?` — thenVal if the condition is nonzero, else elseVal
    Select,
    /// `v lo hi clamp` — `min(max(v, lo), hi)`
    Clamp,
}

/// A symbolic reference to one pixel of an input clip, with a static
/// spatial offset. The plane is chosen when the expression is specialized
/// for an output plane; offsets are clamped to the plane edges at gather
/// time, never wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRef {
    pub clip: usize,
    pub dx: i32,
    pub dy: i32,
}

/// A symbolic reference to a named per-frame property of an input clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropRef {
    pub clip: usize,
    pub name: String,
}

/// One instruction of a parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Push a literal constant
    PushConstant(f32),
    /// Push one input sample (clip + spatial offset)
    PushInput(InputRef),
    /// Push a per-frame property value, captured once per evaluation call
    PushProperty(PropRef),
    /// Push the current column index as a float
    PushCoordX,
    /// Push the current row index as a float
    PushCoordY,
    Unary(UnaryKind),
    Binary(BinaryKind),
    Ternary(TernaryKind),
    /// Push a copy of the value `n` below the top (`dup` is `Dup(0)`)
    Dup(usize),
    /// Exchange the top with the value `n` below it (`swap` is `Swap(1)`)
    Swap(usize),
    /// Pop `n` values (`drop` is `Drop(1)`)
    Drop(usize),
}

impl Instr {
    /// Stack discipline of this instruction: the depth it requires and the
    /// net depth change it causes. The parser folds this over the sequence
    /// to reject underflow and imbalance before anything is compiled.
    pub(crate) fn stack_effect(&self) -> (usize, isize) {
        match self {
            Instr::PushConstant(_)
            | Instr::PushInput(_)
            | Instr::PushProperty(_)
            | Instr::PushCoordX
            | Instr::PushCoordY => (0, 1),
            Instr::Unary(_) => (1, 0),
            Instr::Binary(_) => (2, -1),
            Instr::Ternary(_) => (3, -2),
            Instr::Dup(n) => (n + 1, 1),
            Instr::Swap(n) => (n + 1, 0),
            Instr::Drop(n) => (*n, -(*n as isize)),
        }
    }
}

/// An immutable, validated instruction sequence.
///
/// Invariant: simulating the sequence with a virtual stack never underflows
/// and ends with exactly one value — the parser guarantees this before an
/// `Expression` is constructed, so downstream stages treat violations as
/// internal defects rather than reportable errors.
#[derive(Debug, Clone)]
pub struct Expression {
    pub(crate) instrs: Vec<Instr>,
    pub(crate) max_depth: usize,
    pub(crate) source: String,
}

impl Expression {
    /// The validated instruction sequence.
    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Maximum virtual stack depth reached while evaluating the expression.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Where an input slot gets its per-pixel value from.
///
/// The resolver deduplicates references, so each distinct source appears
/// exactly once in a kernel's slot table. The execution engine fills pixel
/// slots row by row, property slots once per call, and coordinate slots
/// once per row/chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SlotSource {
    Pixel {
        clip: usize,
        plane: usize,
        dx: i32,
        dy: i32,
    },
    Property {
        clip: usize,
        name: String,
    },
    CoordX,
    CoordY,
}

/// Linear operation of the resolved IR, ready for folding and codegen.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum KernelOp {
    /// Load a constant value
    LoadConst(f32),
    /// Load the current pixel's value of an input slot
    LoadSlot(usize),
    Unary(UnaryKind),
    Binary(BinaryKind),
    Ternary(TernaryKind),
    Dup(usize),
    Swap(usize),
    Drop(usize),
}

impl KernelOp {
    /// Stack discipline, mirroring [`Instr::stack_effect`] on the resolved IR.
    pub(crate) fn stack_effect(&self) -> (usize, isize) {
        match self {
            KernelOp::LoadConst(_) | KernelOp::LoadSlot(_) => (0, 1),
            KernelOp::Unary(_) => (1, 0),
            KernelOp::Binary(_) => (2, -1),
            KernelOp::Ternary(_) => (3, -2),
            KernelOp::Dup(n) => (n + 1, 1),
            KernelOp::Swap(n) => (n + 1, 0),
            KernelOp::Drop(n) => (*n, -(*n as isize)),
        }
    }
}

/// A reference-resolved expression for one concrete output plane.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedExpr {
    pub(crate) ops: Vec<KernelOp>,
    pub(crate) slots: Vec<SlotSource>,
    pub(crate) max_depth: usize,
}

impl ResolvedExpr {
    /// Generates straight-line code evaluating the expression for `lanes`
    /// adjacent pixels, returning the final SSA value (`F32` for one lane,
    /// `F32X4` for four).
    ///
    /// `input_ptr` points at the staging block already advanced to the
    /// current pixel position; `stride_bytes` is the byte distance between
    /// consecutive slots in the block. The IR is stack-balanced by
    /// construction, so the value stack here can be popped unchecked.
    pub(crate) fn codegen(
        &self,
        builder: &mut FunctionBuilder,
        module: &mut dyn Module,
        lanes: u8,
        input_ptr: Value,
        stride_bytes: Value,
    ) -> Result<Value, BuilderError> {
        let fty = float_ty(lanes);
        let ity = int_ty(lanes);
        let mut stack: Vec<Value> = Vec::with_capacity(self.max_depth);

        for op in &self.ops {
            match op {
                KernelOp::LoadConst(c) => {
                    stack.push(const_val(builder, lanes, *c));
                }

                KernelOp::LoadSlot(slot) => {
                    let off = builder.ins().imul_imm(stride_bytes, *slot as i64);
                    let addr = builder.ins().iadd(input_ptr, off);
                    stack.push(builder.ins().load(fty, MemFlags::new(), addr, 0));
                }

                KernelOp::Unary(kind) => {
                    let v = stack.pop().unwrap();
                    let r = match kind {
                        UnaryKind::Neg => builder.ins().fneg(v),
                        UnaryKind::Abs => builder.ins().fabs(v),
                        UnaryKind::Sqrt => builder.ins().sqrt(v),
                        UnaryKind::Floor => builder.ins().floor(v),
                        UnaryKind::Ceil => builder.ins().ceil(v),
                        UnaryKind::Trunc => builder.ins().trunc(v),
                        UnaryKind::Round => builder.ins().nearest(v),
                        UnaryKind::Exp => {
                            let fid = operators::exp::link_exp(module)?;
                            call_lanewise_unary(builder, module, lanes, v, |b, m, x| {
                                operators::exp::call_exp(b, m, fid, x)
                            })
                        }
                        UnaryKind::Log => {
                            let fid = operators::log::link_log(module)?;
                            call_lanewise_unary(builder, module, lanes, v, |b, m, x| {
                                operators::log::call_log(b, m, fid, x)
                            })
                        }
                        UnaryKind::Sin => {
                            let fid = operators::trigonometric::link_sin(module)?;
                            call_lanewise_unary(builder, module, lanes, v, |b, m, x| {
                                operators::trigonometric::call_trig(b, m, fid, x)
                            })
                        }
                        UnaryKind::Cos => {
                            let fid = operators::trigonometric::link_cos(module)?;
                            call_lanewise_unary(builder, module, lanes, v, |b, m, x| {
                                operators::trigonometric::call_trig(b, m, fid, x)
                            })
                        }
                        UnaryKind::Not => {
                            let zero = const_val(builder, lanes, 0.0);
                            let mask = builder.ins().fcmp(FloatCC::Equal, v, zero);
                            bools_from_mask(builder, lanes, mask)
                        }
                        UnaryKind::BitNot => {
                            let iv = builder.ins().fcvt_to_sint_sat(ity, v);
                            let nv = builder.ins().bnot(iv);
                            builder.ins().fcvt_from_sint(fty, nv)
                        }
                    };
                    stack.push(r);
                }

                KernelOp::Binary(kind) => {
                    let rhs = stack.pop().unwrap();
                    let lhs = stack.pop().unwrap();
                    let r = match kind {
                        BinaryKind::Add => builder.ins().fadd(lhs, rhs),
                        BinaryKind::Sub => builder.ins().fsub(lhs, rhs),
                        BinaryKind::Mul => builder.ins().fmul(lhs, rhs),
                        BinaryKind::Div => builder.ins().fdiv(lhs, rhs),
                        BinaryKind::Min => builder.ins().fmin(lhs, rhs),
                        BinaryKind::Max => builder.ins().fmax(lhs, rhs),
                        BinaryKind::Mod => {
                            // lhs - trunc(lhs/rhs) * rhs, the shared modulo contract
                            let q = builder.ins().fdiv(lhs, rhs);
                            let t = builder.ins().trunc(q);
                            let m = builder.ins().fmul(t, rhs);
                            builder.ins().fsub(lhs, m)
                        }
                        BinaryKind::Pow => {
                            let fid = operators::pow::link_pow(module)?;
                            call_lanewise_binary(builder, module, lanes, lhs, rhs, |b, m, p, q| {
                                operators::pow::call_pow(b, m, fid, p, q)
                            })
                        }
                        BinaryKind::Shl => {
                            let fid = operators::bits::link_shl(module)?;
                            call_lanewise_binary(builder, module, lanes, lhs, rhs, |b, m, p, q| {
                                operators::bits::call_shift(b, m, fid, p, q)
                            })
                        }
                        BinaryKind::Shr => {
                            let fid = operators::bits::link_shr(module)?;
                            call_lanewise_binary(builder, module, lanes, lhs, rhs, |b, m, p, q| {
                                operators::bits::call_shift(b, m, fid, p, q)
                            })
                        }
                        BinaryKind::Lt
                        | BinaryKind::Gt
                        | BinaryKind::Eq
                        | BinaryKind::Le
                        | BinaryKind::Ge => {
                            let cc = match kind {
                                BinaryKind::Lt => FloatCC::LessThan,
                                BinaryKind::Gt => FloatCC::GreaterThan,
                                BinaryKind::Eq => FloatCC::Equal,
                                BinaryKind::Le => FloatCC::LessThanOrEqual,
                                _ => FloatCC::GreaterThanOrEqual,
                            };
                            let mask = builder.ins().fcmp(cc, lhs, rhs);
                            bools_from_mask(builder, lanes, mask)
                        }
                        BinaryKind::And | BinaryKind::Or | BinaryKind::Xor => {
                            let ma = truthy_mask(builder, lanes, lhs);
                            let mb = truthy_mask(builder, lanes, rhs);
                            let combined = match kind {
                                BinaryKind::And => builder.ins().band(ma, mb),
                                BinaryKind::Or => builder.ins().bor(ma, mb),
                                _ => builder.ins().bxor(ma, mb),
                            };
                            bools_from_mask(builder, lanes, combined)
                        }
                        BinaryKind::BitAnd | BinaryKind::BitOr | BinaryKind::BitXor => {
                            let ia = builder.ins().fcvt_to_sint_sat(ity, lhs);
                            let ib = builder.ins().fcvt_to_sint_sat(ity, rhs);
                            let iv = match kind {
                                BinaryKind::BitAnd => builder.ins().band(ia, ib),
                                BinaryKind::BitOr => builder.ins().bor(ia, ib),
                                _ => builder.ins().bxor(ia, ib),
                            };
                            builder.ins().fcvt_from_sint(fty, iv)
                        }
                    };
                    stack.push(r);
                }

                KernelOp::Ternary(kind) => {
                    let c = stack.pop().unwrap();
                    let b = stack.pop().unwrap();
                    let a = stack.pop().unwrap();
                    let r = match kind {
                        TernaryKind::Select => {
                            // a = condition, b = thenVal, c = elseVal
                            let mask = truthy_mask(builder, lanes, a);
                            if lanes == 1 {
                                builder.ins().select(mask, b, c)
                            } else {
                                bitselect_float(builder, mask, b, c)
                            }
                        }
                        TernaryKind::Clamp => {
                            // a = value, b = low, c = high
                            let lo = builder.ins().fmax(a, b);
                            builder.ins().fmin(lo, c)
                        }
                    };
                    stack.push(r);
                }

                KernelOp::Dup(n) => {
                    let v = stack[stack.len() - 1 - n];
                    stack.push(v);
                }
                KernelOp::Swap(n) => {
                    let len = stack.len();
                    stack.swap(len - 1, len - 1 - n);
                }
                KernelOp::Drop(n) => {
                    let keep = stack.len() - n;
                    stack.truncate(keep);
                }
            }
        }

        Ok(stack.pop().unwrap())
    }
}

fn float_ty(lanes: u8) -> Type {
    if lanes == 1 {
        types::F32
    } else {
        types::F32X4
    }
}

fn int_ty(lanes: u8) -> Type {
    if lanes == 1 {
        types::I32
    } else {
        types::I32X4
    }
}

/// Materializes a constant, splatted across all lanes in the vector body.
fn const_val(builder: &mut FunctionBuilder, lanes: u8, c: f32) -> Value {
    let lit = builder.ins().f32const(c);
    if lanes == 1 {
        lit
    } else {
        builder.ins().splat(types::F32X4, lit)
    }
}

/// Comparison mask for "operand is nonzero". `NotEqual` is an unordered
/// condition, so NaN operands count as true.
fn truthy_mask(builder: &mut FunctionBuilder, lanes: u8, v: Value) -> Value {
    let zero = const_val(builder, lanes, 0.0);
    builder.ins().fcmp(FloatCC::NotEqual, v, zero)
}

/// Turns a comparison mask into 0.0/1.0 values.
fn bools_from_mask(builder: &mut FunctionBuilder, lanes: u8, mask: Value) -> Value {
    let one = const_val(builder, lanes, 1.0);
    let zero = const_val(builder, lanes, 0.0);
    if lanes == 1 {
        builder.ins().select(mask, one, zero)
    } else {
        bitselect_float(builder, mask, one, zero)
    }
}

/// Lane-masked select between two `F32X4` values. `bitselect` operates on
/// integer vectors, so the float operands are round-tripped through
/// `I32X4` bitcasts; comparison masks are all-ones/all-zeros per lane, so
/// the bitwise select is an exact lane select.
fn bitselect_float(
    builder: &mut FunctionBuilder,
    mask: Value,
    if_true: Value,
    if_false: Value,
) -> Value {
    let tb = builder.ins().bitcast(types::I32X4, MemFlags::new(), if_true);
    let fb = builder
        .ins()
        .bitcast(types::I32X4, MemFlags::new(), if_false);
    let sel = builder.ins().bitselect(mask, tb, fb);
    builder.ins().bitcast(types::F32X4, MemFlags::new(), sel)
}

/// Applies a scalar `f32 -> f32` external call across all lanes. `emit`
/// generates one scalar call (an `operators::*::call_*` helper partially
/// applied with its function id).
fn call_lanewise_unary(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    lanes: u8,
    v: Value,
    mut emit: impl FnMut(&mut FunctionBuilder, &mut dyn Module, Value) -> Value,
) -> Value {
    if lanes == 1 {
        return emit(builder, module, v);
    }
    let mut out = v;
    for lane in 0..lanes {
        let x = builder.ins().extractlane(v, lane);
        let r = emit(builder, module, x);
        out = if lane == 0 {
            builder.ins().splat(types::F32X4, r)
        } else {
            builder.ins().insertlane(out, r, lane)
        };
    }
    out
}

/// Applies a scalar `(f32, f32) -> f32` external call across all lanes.
fn call_lanewise_binary(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    lanes: u8,
    a: Value,
    b: Value,
    mut emit: impl FnMut(&mut FunctionBuilder, &mut dyn Module, Value, Value) -> Value,
) -> Value {
    if lanes == 1 {
        return emit(builder, module, a, b);
    }
    let mut out = a;
    for lane in 0..lanes {
        let xa = builder.ins().extractlane(a, lane);
        let xb = builder.ins().extractlane(b, lane);
        let r = emit(builder, module, xa, xb);
        out = if lane == 0 {
            builder.ins().splat(types::F32X4, r)
        } else {
            builder.ins().insertlane(out, r, lane)
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_effects() {
        assert_eq!(Instr::PushConstant(1.0).stack_effect(), (0, 1));
        assert_eq!(Instr::Unary(UnaryKind::Sqrt).stack_effect(), (1, 0));
        assert_eq!(Instr::Binary(BinaryKind::Add).stack_effect(), (2, -1));
        assert_eq!(Instr::Ternary(TernaryKind::Select).stack_effect(), (3, -2));
        assert_eq!(Instr::Dup(0).stack_effect(), (1, 1));
        assert_eq!(Instr::Swap(1).stack_effect(), (2, 0));
        assert_eq!(Instr::Drop(2).stack_effect(), (2, -2));
    }

    #[test]
    fn test_expression_display() {
        let expr = Expression {
            instrs: vec![
                Instr::PushInput(InputRef {
                    clip: 0,
                    dx: 0,
                    dy: 0,
                }),
                Instr::Unary(UnaryKind::Exp),
            ],
            max_depth: 1,
            source: "x exp".to_string(),
        };
        assert_eq!(expr.to_string(), "x exp");
    }
}
