//! Reference resolver: binds the symbolic clip references of a parsed
//! expression to concrete input slots for one output plane.
//!
//! Resolution is a pure validation + annotation pass. For every `PushInput`
//! the clip index is checked against the supplied clip list and the target
//! plane against that clip's declared format; for every `PushProperty` the
//! clip index is checked. Valid references are interned into a slot table —
//! identical references share a slot — and the instruction stream is
//! rewritten into the slot-based linear IR that the optimizer and the code
//! generator consume.
//!
//! A clip letter mapping past the supplied clip list is *this* stage's
//! error, not the parser's: `"y"` is a perfectly well-formed expression that
//! simply cannot be bound when only one clip was given.

use crate::errors::ResolveError;
use crate::expr::{Expression, Instr, KernelOp, ResolvedExpr, SlotSource};
use crate::frame::ClipFormat;

/// Resolves an expression against the supplied clip formats for one output
/// plane.
///
/// # Arguments
/// * `expr` - The parsed, stack-balanced expression
/// * `clips` - Declared formats of the supplied input clips, in clip order
/// * `plane` - The output plane this expression is being specialized for;
///   pixel references read the same plane index of their clip
///
/// # Errors
/// Returns a [`ResolveError`] if any reference names a clip or plane that
/// does not exist.
pub(crate) fn resolve(
    expr: &Expression,
    clips: &[ClipFormat],
    plane: usize,
) -> Result<ResolvedExpr, ResolveError> {
    let mut slots: Vec<SlotSource> = Vec::new();
    let mut ops = Vec::with_capacity(expr.instrs.len());

    for instr in expr.instrs() {
        let op = match instr {
            Instr::PushConstant(c) => KernelOp::LoadConst(*c),

            Instr::PushInput(r) => {
                check_clip(r.clip, clips)?;
                let planes = clips[r.clip].planes;
                if plane >= planes {
                    return Err(ResolveError::UnboundPlane {
                        clip: r.clip,
                        plane,
                        planes,
                    });
                }
                let source = SlotSource::Pixel {
                    clip: r.clip,
                    plane,
                    dx: r.dx,
                    dy: r.dy,
                };
                KernelOp::LoadSlot(intern(&mut slots, source))
            }

            Instr::PushProperty(p) => {
                check_clip(p.clip, clips)?;
                let source = SlotSource::Property {
                    clip: p.clip,
                    name: p.name.clone(),
                };
                KernelOp::LoadSlot(intern(&mut slots, source))
            }

            Instr::PushCoordX => KernelOp::LoadSlot(intern(&mut slots, SlotSource::CoordX)),
            Instr::PushCoordY => KernelOp::LoadSlot(intern(&mut slots, SlotSource::CoordY)),

            Instr::Unary(k) => KernelOp::Unary(*k),
            Instr::Binary(k) => KernelOp::Binary(*k),
            Instr::Ternary(k) => KernelOp::Ternary(*k),
            Instr::Dup(n) => KernelOp::Dup(*n),
            Instr::Swap(n) => KernelOp::Swap(*n),
            Instr::Drop(n) => KernelOp::Drop(*n),
        };
        ops.push(op);
    }

    Ok(ResolvedExpr {
        ops,
        slots,
        max_depth: expr.max_depth,
    })
}

fn check_clip(clip: usize, clips: &[ClipFormat]) -> Result<(), ResolveError> {
    if clip >= clips.len() {
        return Err(ResolveError::UnboundClip {
            clip,
            supplied: clips.len(),
        });
    }
    Ok(())
}

/// Returns the slot index of `source`, appending it if not seen before.
fn intern(slots: &mut Vec<SlotSource>, source: SlotSource) -> usize {
    if let Some(idx) = slots.iter().position(|s| *s == source) {
        return idx;
    }
    slots.push(source);
    slots.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SampleKind;
    use crate::parser::parse;

    fn gray8() -> ClipFormat {
        ClipFormat::new(SampleKind::U8, 1)
    }

    #[test]
    fn test_slot_dedup() {
        let expr = parse("x x * x +").unwrap();
        let resolved = resolve(&expr, &[gray8()], 0).unwrap();
        assert_eq!(resolved.slots.len(), 1);
        assert_eq!(
            resolved.ops,
            vec![
                KernelOp::LoadSlot(0),
                KernelOp::LoadSlot(0),
                KernelOp::Binary(crate::expr::BinaryKind::Mul),
                KernelOp::LoadSlot(0),
                KernelOp::Binary(crate::expr::BinaryKind::Add),
            ]
        );
    }

    #[test]
    fn test_distinct_offsets_get_distinct_slots() {
        let expr = parse("x x[1,0] x[0,1] + +").unwrap();
        let resolved = resolve(&expr, &[gray8()], 0).unwrap();
        assert_eq!(resolved.slots.len(), 3);
    }

    #[test]
    fn test_unbound_clip() {
        let expr = parse("x y +").unwrap();
        let err = resolve(&expr, &[gray8()], 0).unwrap_err();
        assert_eq!(err, ResolveError::UnboundClip { clip: 1, supplied: 1 });
    }

    #[test]
    fn test_unbound_plane() {
        let expr = parse("x").unwrap();
        let err = resolve(&expr, &[gray8()], 1).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnboundPlane {
                clip: 0,
                plane: 1,
                planes: 1
            }
        );
    }

    #[test]
    fn test_property_clip_validated() {
        let expr = parse("y.Gain").unwrap();
        let err = resolve(&expr, &[gray8()], 0).unwrap_err();
        assert_eq!(err, ResolveError::UnboundClip { clip: 1, supplied: 1 });
    }

    #[test]
    fn test_property_and_coords_share_slots() {
        let expr = parse("x.Gain x.Gain X X + + +").unwrap();
        let resolved = resolve(&expr, &[gray8()], 0).unwrap();
        assert_eq!(resolved.slots.len(), 2);
    }

    #[test]
    fn test_plane_specialization() {
        let expr = parse("x").unwrap();
        let fmt = ClipFormat::new(SampleKind::U8, 3);
        let resolved = resolve(&expr, &[fmt], 2).unwrap();
        assert_eq!(
            resolved.slots,
            vec![SlotSource::Pixel {
                clip: 0,
                plane: 2,
                dx: 0,
                dy: 0
            }]
        );
    }
}
