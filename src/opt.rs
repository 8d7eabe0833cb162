//! Constant folder for the resolved linear IR.
//!
//! Pass pipeline
//! -------------
//!  1. **fold_consts** – constant propagation over the op stream, plus
//!     elimination of `drop`ped pure subexpressions.
//!  2. **compact_slots** – drop input slots that folding left without a
//!     single remaining load, so the execution engine never gathers samples
//!     nobody reads.
//!
//! Folding uses the exact numeric semantics of [`crate::math`] — the same
//! functions the compiled kernels call — so `"0 exp"` folds to the literal
//! `1.0`, `"0 log"` folds to `-inf`, and a folded result is always
//! bit-identical to what the kernel would have computed. `"x log"` is not
//! folded because `x` is runtime data.
//!
//! The walk mirrors the op stream's effect on an auxiliary stack. Each stack
//! entry tracks its compile-time value (if known) *and* the range of output
//! ops that produced it, because this IR has stack-manipulation ops: a
//! `swap` reorders values relative to their producers, after which erasing
//! "the last two ops" would no longer erase the right producers. Folding
//! therefore only rewrites history for entries whose producer range is
//! intact; `swap` marks the affected entries' ranges unknown.
//!
//! The module is pure Rust with no Cranelift dependencies, which keeps its
//! unit tests fast.

use crate::expr::{BinaryKind, KernelOp, ResolvedExpr, SlotSource, TernaryKind, UnaryKind};
use crate::math;

/// Runs all passes over a resolved expression.
pub(crate) fn optimize(expr: ResolvedExpr) -> ResolvedExpr {
    let ops = fold_consts(expr.ops);
    let (ops, slots) = compact_slots(ops, expr.slots);
    let max_depth = simulate_max_depth(&ops);
    ResolvedExpr {
        ops,
        slots,
        max_depth,
    }
}

/// One value of the folding stack: its compile-time constant (if known) and
/// the index in the output stream where its producing ops begin (if that
/// range is still intact). Clean entries tile the tail of the output stream
/// in stack order, so truncating to an operand's start erases exactly the
/// ops that produced the operands being folded.
#[derive(Clone, Copy)]
struct Entry {
    value: Option<f32>,
    start: Option<usize>,
}

fn fold_consts(ops: Vec<KernelOp>) -> Vec<KernelOp> {
    let mut out: Vec<KernelOp> = Vec::with_capacity(ops.len());
    let mut stack: Vec<Entry> = Vec::with_capacity(8);

    let push_const = |c: f32, out: &mut Vec<KernelOp>, stack: &mut Vec<Entry>| {
        out.push(KernelOp::LoadConst(c));
        stack.push(Entry {
            value: Some(c),
            start: Some(out.len() - 1),
        });
    };

    for op in ops {
        match op {
            KernelOp::LoadConst(c) => push_const(c, &mut out, &mut stack),

            KernelOp::LoadSlot(s) => {
                out.push(KernelOp::LoadSlot(s));
                stack.push(Entry {
                    value: None,
                    start: Some(out.len() - 1),
                });
            }

            KernelOp::Unary(kind) => {
                let e = stack.pop().unwrap();
                match (e.value, e.start) {
                    (Some(v), Some(start)) => {
                        out.truncate(start);
                        push_const(apply_unary(kind, v), &mut out, &mut stack);
                    }
                    _ => {
                        out.push(KernelOp::Unary(kind));
                        stack.push(Entry {
                            value: None,
                            start: e.start,
                        });
                    }
                }
            }

            KernelOp::Binary(kind) => {
                let rhs = stack.pop().unwrap();
                let lhs = stack.pop().unwrap();
                match (lhs.value, rhs.value, lhs.start, rhs.start) {
                    (Some(a), Some(b), Some(start), Some(_)) => {
                        out.truncate(start);
                        push_const(apply_binary(kind, a, b), &mut out, &mut stack);
                    }
                    _ => {
                        out.push(KernelOp::Binary(kind));
                        let intact = rhs.start.is_some();
                        stack.push(Entry {
                            value: None,
                            start: if intact { lhs.start } else { None },
                        });
                    }
                }
            }

            KernelOp::Ternary(kind) => {
                let c = stack.pop().unwrap();
                let b = stack.pop().unwrap();
                let a = stack.pop().unwrap();
                match (a.value, b.value, c.value, a.start, b.start, c.start) {
                    (Some(x), Some(y), Some(z), Some(start), Some(_), Some(_)) => {
                        out.truncate(start);
                        push_const(apply_ternary(kind, x, y, z), &mut out, &mut stack);
                    }
                    _ => {
                        out.push(KernelOp::Ternary(kind));
                        let intact = b.start.is_some() && c.start.is_some();
                        stack.push(Entry {
                            value: None,
                            start: if intact { a.start } else { None },
                        });
                    }
                }
            }

            KernelOp::Dup(n) => {
                let source = stack[stack.len() - 1 - n];
                out.push(KernelOp::Dup(n));
                stack.push(Entry {
                    value: source.value,
                    start: Some(out.len() - 1),
                });
            }

            KernelOp::Swap(n) => {
                if n == 0 {
                    continue;
                }
                let len = stack.len();
                stack.swap(len - 1, len - 1 - n);
                // Producer ranges no longer match stack order.
                stack[len - 1].start = None;
                stack[len - 1 - n].start = None;
                out.push(KernelOp::Swap(n));
            }

            KernelOp::Drop(n) => {
                if n == 0 {
                    continue;
                }
                let keep = stack.len() - n;
                let dropped_intact = stack[keep..].iter().all(|e| e.start.is_some());
                if dropped_intact {
                    // All dropped values are pure and their producers sit at
                    // the tail of the stream: delete them outright.
                    let start = stack[keep].start.unwrap();
                    out.truncate(start);
                } else {
                    out.push(KernelOp::Drop(n));
                }
                stack.truncate(keep);
            }
        }
    }

    out
}

fn apply_unary(kind: UnaryKind, v: f32) -> f32 {
    match kind {
        UnaryKind::Neg => -v,
        UnaryKind::Abs => v.abs(),
        UnaryKind::Sqrt => v.sqrt(),
        UnaryKind::Exp => math::exp(v),
        UnaryKind::Log => math::log(v),
        UnaryKind::Sin => math::sin(v),
        UnaryKind::Cos => math::cos(v),
        UnaryKind::Not => {
            if math::truthy(v) {
                0.0
            } else {
                1.0
            }
        }
        UnaryKind::BitNot => (!math::to_int_sat(v)) as f32,
        UnaryKind::Floor => v.floor(),
        UnaryKind::Ceil => v.ceil(),
        UnaryKind::Trunc => v.trunc(),
        UnaryKind::Round => math::round_half_even(v),
    }
}

fn apply_binary(kind: BinaryKind, a: f32, b: f32) -> f32 {
    match kind {
        BinaryKind::Add => a + b,
        BinaryKind::Sub => a - b,
        BinaryKind::Mul => a * b,
        // IEEE division folds unconditionally; x/0 is inf at run time too.
        BinaryKind::Div => a / b,
        BinaryKind::Mod => math::modulo(a, b),
        BinaryKind::Pow => math::pow(a, b),
        BinaryKind::Min => math::min(a, b),
        BinaryKind::Max => math::max(a, b),
        BinaryKind::Lt => (a < b) as u32 as f32,
        BinaryKind::Gt => (a > b) as u32 as f32,
        BinaryKind::Eq => (a == b) as u32 as f32,
        BinaryKind::Le => (a <= b) as u32 as f32,
        BinaryKind::Ge => (a >= b) as u32 as f32,
        BinaryKind::And => (math::truthy(a) && math::truthy(b)) as u32 as f32,
        BinaryKind::Or => (math::truthy(a) || math::truthy(b)) as u32 as f32,
        BinaryKind::Xor => (math::truthy(a) ^ math::truthy(b)) as u32 as f32,
        BinaryKind::BitAnd => (math::to_int_sat(a) & math::to_int_sat(b)) as f32,
        BinaryKind::BitOr => (math::to_int_sat(a) | math::to_int_sat(b)) as f32,
        BinaryKind::BitXor => (math::to_int_sat(a) ^ math::to_int_sat(b)) as f32,
        BinaryKind::Shl => math::expr_shl(a, b),
        BinaryKind::Shr => math::expr_shr(a, b),
    }
}

fn apply_ternary(kind: TernaryKind, a: f32, b: f32, c: f32) -> f32 {
    match kind {
        TernaryKind::Select => {
            if math::truthy(a) {
                b
            } else {
                c
            }
        }
        TernaryKind::Clamp => math::min(math::max(a, b), c),
    }
}

/// Removes slots folding left unreferenced and renumbers the loads.
fn compact_slots(
    ops: Vec<KernelOp>,
    slots: Vec<SlotSource>,
) -> (Vec<KernelOp>, Vec<SlotSource>) {
    let mut used = vec![false; slots.len()];
    for op in &ops {
        if let KernelOp::LoadSlot(s) = op {
            used[*s] = true;
        }
    }
    if used.iter().all(|&u| u) {
        return (ops, slots);
    }

    let mut remap = vec![usize::MAX; slots.len()];
    let mut kept = Vec::new();
    for (i, slot) in slots.into_iter().enumerate() {
        if used[i] {
            remap[i] = kept.len();
            kept.push(slot);
        }
    }
    let ops = ops
        .into_iter()
        .map(|op| match op {
            KernelOp::LoadSlot(s) => KernelOp::LoadSlot(remap[s]),
            other => other,
        })
        .collect();
    (ops, kept)
}

/// Maximum stack depth of the folded stream, sizing the codegen stack.
fn simulate_max_depth(ops: &[KernelOp]) -> usize {
    let mut depth: isize = 0;
    let mut max: isize = 0;
    for op in ops {
        let (_, net) = op.stack_effect();
        depth += net;
        max = max.max(depth);
    }
    max as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ClipFormat, SampleKind};
    use crate::parser::parse;
    use crate::resolve::resolve;

    fn optimized(src: &str) -> ResolvedExpr {
        let expr = parse(src).unwrap();
        let clips = [ClipFormat::new(SampleKind::U8, 1); 2];
        optimize(resolve(&expr, &clips, 0).unwrap())
    }

    #[test]
    fn test_binary_fold() {
        assert_eq!(optimized("2 3 +").ops, vec![KernelOp::LoadConst(5.0)]);
        assert_eq!(optimized("1 0 /").ops, vec![KernelOp::LoadConst(f32::INFINITY)]);
    }

    #[test]
    fn test_transcendental_fold_uses_contract_semantics() {
        assert_eq!(optimized("0 exp").ops, vec![KernelOp::LoadConst(1.0)]);
        assert_eq!(
            optimized("0 log").ops,
            vec![KernelOp::LoadConst(f32::NEG_INFINITY)]
        );
        assert_eq!(optimized("1 log").ops, vec![KernelOp::LoadConst(0.0)]);
    }

    #[test]
    fn test_runtime_data_is_not_folded() {
        let r = optimized("x log");
        assert_eq!(
            r.ops,
            vec![
                KernelOp::LoadSlot(0),
                KernelOp::Unary(UnaryKind::Log)
            ]
        );
    }

    #[test]
    fn test_fold_across_dup() {
        assert_eq!(optimized("2 dup *").ops, vec![KernelOp::LoadConst(4.0)]);
    }

    #[test]
    fn test_fold_across_swap_is_safe() {
        // 2 3 swap - computes 3 - 2; the producer ranges are reordered, so
        // the fold must not rewrite history. The result still has to be 1
        // at run time — here we only check no bogus constant was produced.
        let r = optimized("2 3 swap -");
        assert_eq!(
            r.ops,
            vec![
                KernelOp::LoadConst(2.0),
                KernelOp::LoadConst(3.0),
                KernelOp::Swap(1),
                KernelOp::Binary(BinaryKind::Sub),
            ]
        );
    }

    #[test]
    fn test_dropped_subexpression_is_deleted() {
        let r = optimized("x 1 2 drop2");
        assert_eq!(r.ops, vec![KernelOp::LoadSlot(0)]);
    }

    #[test]
    fn test_partial_fold() {
        let r = optimized("x 2 3 + +");
        assert_eq!(
            r.ops,
            vec![
                KernelOp::LoadSlot(0),
                KernelOp::LoadConst(5.0),
                KernelOp::Binary(BinaryKind::Add),
            ]
        );
    }

    #[test]
    fn test_select_fold() {
        assert_eq!(optimized("1 7 9 ?").ops, vec![KernelOp::LoadConst(7.0)]);
        assert_eq!(optimized("0 7 9 ?").ops, vec![KernelOp::LoadConst(9.0)]);
        assert_eq!(optimized("x 7 9 ?").ops.len(), 4);
    }

    #[test]
    fn test_clamp_fold() {
        assert_eq!(optimized("5 0 3 clamp").ops, vec![KernelOp::LoadConst(3.0)]);
    }

    #[test]
    fn test_slot_compaction() {
        // The y load is dropped, so its slot must disappear and the
        // remaining load renumbered.
        let r = optimized("y x drop 5 +");
        assert_eq!(r.slots.len(), 1);
        assert_eq!(
            r.slots[0],
            SlotSource::Pixel {
                clip: 1,
                plane: 0,
                dx: 0,
                dy: 0
            }
        );
        assert_eq!(
            r.ops,
            vec![
                KernelOp::LoadSlot(0),
                KernelOp::LoadConst(5.0),
                KernelOp::Binary(BinaryKind::Add),
            ]
        );
    }

    #[test]
    fn test_depth_recomputed_after_fold() {
        let r = optimized("2 3 + 4 5 + *");
        assert_eq!(r.ops, vec![KernelOp::LoadConst(45.0)]);
        assert_eq!(r.max_depth, 1);
    }
}
