//! RPN lexer/parser: turns an expression string into a validated,
//! stack-balanced instruction sequence.
//!
//! Tokens split on ASCII whitespace and are classified in one pass:
//!
//! - numeric literals in decimal or scientific notation (`2`, `-1.5`, `3e-2`)
//! - clip references: the single letters `x`, `y`, `z` name clips 0, 1, 2,
//!   then `a` through `w` continue at index 3 (case-significant, 26 clips)
//! - relative pixel access `x[dx,dy]` and frame properties `x.PropName`
//! - the pixel coordinates `X` and `Y`
//! - unary, binary and ternary operators, plus the stack manipulators
//!   `dup`/`swap`/`drop` and their indexed forms `dupN`/`swapN`/`dropN`
//!
//! Parsing maintains a simulated stack-depth counter — no backtracking, no
//! tree building. A token that is not recognized fails with
//! [`ParseError::Syntax`]; an operator meeting too shallow a stack fails with
//! [`ParseError::Arity`]; a sequence not leaving exactly one value fails with
//! [`ParseError::StackImbalance`]. Clip letters are mapped to indices blindly
//! here — whether the clip actually exists is the resolver's concern.

use crate::errors::ParseError;
use crate::expr::{BinaryKind, Expression, InputRef, Instr, PropRef, TernaryKind, UnaryKind};

/// Parses an RPN expression string into a validated [`Expression`].
///
/// # Arguments
/// * `source` - The expression text, e.g. `"x y + 2 /"`
///
/// # Example
/// ```
/// # use pixelexpr_jit::parser::parse;
/// let expr = parse("x 2 * 0.5 +").unwrap();
/// assert_eq!(expr.max_depth(), 2);
/// ```
///
/// # Errors
/// Returns a [`ParseError`] if a token is unknown or the sequence is not
/// stack-balanced.
pub fn parse(source: &str) -> Result<Expression, ParseError> {
    let mut instrs = Vec::new();
    let mut depth: usize = 0;
    let mut max_depth: usize = 0;

    for (position, token) in source.split_ascii_whitespace().enumerate() {
        let instr = lex_token(token).ok_or_else(|| ParseError::Syntax {
            token: token.to_string(),
            position,
        })?;

        let (needs, net) = instr.stack_effect();
        if depth < needs {
            return Err(ParseError::Arity {
                token: token.to_string(),
                position,
                needs,
                depth,
            });
        }
        depth = (depth as isize + net) as usize;
        max_depth = max_depth.max(depth);
        instrs.push(instr);
    }

    if depth != 1 {
        return Err(ParseError::StackImbalance { depth });
    }

    Ok(Expression {
        instrs,
        max_depth,
        source: source.to_string(),
    })
}

/// Classifies a single token. Returns `None` for unknown tokens.
fn lex_token(token: &str) -> Option<Instr> {
    // Fixed operator spellings first; everything here is an exact match,
    // so a clip letter can never shadow an operator or vice versa.
    let instr = match token {
        "+" => Some(Instr::Binary(BinaryKind::Add)),
        "-" => Some(Instr::Binary(BinaryKind::Sub)),
        "*" => Some(Instr::Binary(BinaryKind::Mul)),
        "/" => Some(Instr::Binary(BinaryKind::Div)),
        "%" => Some(Instr::Binary(BinaryKind::Mod)),
        "pow" => Some(Instr::Binary(BinaryKind::Pow)),
        "min" => Some(Instr::Binary(BinaryKind::Min)),
        "max" => Some(Instr::Binary(BinaryKind::Max)),
        "<" => Some(Instr::Binary(BinaryKind::Lt)),
        ">" => Some(Instr::Binary(BinaryKind::Gt)),
        "=" => Some(Instr::Binary(BinaryKind::Eq)),
        "<=" => Some(Instr::Binary(BinaryKind::Le)),
        ">=" => Some(Instr::Binary(BinaryKind::Ge)),
        "and" => Some(Instr::Binary(BinaryKind::And)),
        "or" => Some(Instr::Binary(BinaryKind::Or)),
        "xor" => Some(Instr::Binary(BinaryKind::Xor)),
        "bitand" => Some(Instr::Binary(BinaryKind::BitAnd)),
        "bitor" => Some(Instr::Binary(BinaryKind::BitOr)),
        "bitxor" => Some(Instr::Binary(BinaryKind::BitXor)),
        "shl" => Some(Instr::Binary(BinaryKind::Shl)),
        "shr" => Some(Instr::Binary(BinaryKind::Shr)),
        "neg" => Some(Instr::Unary(UnaryKind::Neg)),
        "abs" => Some(Instr::Unary(UnaryKind::Abs)),
        "sqrt" => Some(Instr::Unary(UnaryKind::Sqrt)),
        "exp" => Some(Instr::Unary(UnaryKind::Exp)),
        "log" => Some(Instr::Unary(UnaryKind::Log)),
        "sin" => Some(Instr::Unary(UnaryKind::Sin)),
        "cos" => Some(Instr::Unary(UnaryKind::Cos)),
        "not" => Some(Instr::Unary(UnaryKind::Not)),
        "bitnot" => Some(Instr::Unary(UnaryKind::BitNot)),
        "floor" => Some(Instr::Unary(UnaryKind::Floor)),
        "ceil" => Some(Instr::Unary(UnaryKind::Ceil)),
        "trunc" => Some(Instr::Unary(UnaryKind::Trunc)),
        "round" => Some(Instr::Unary(UnaryKind::Round)),
        "?" => Some(Instr::Ternary(TernaryKind::Select)),
        "clamp" => Some(Instr::Ternary(TernaryKind::Clamp)),
        "dup" => Some(Instr::Dup(0)),
        "swap" => Some(Instr::Swap(1)),
        "drop" => Some(Instr::Drop(1)),
        "X" => Some(Instr::PushCoordX),
        "Y" => Some(Instr::PushCoordY),
        _ => None,
    };
    if instr.is_some() {
        return instr;
    }

    if let Some(n) = indexed_stack_op(token, "dup") {
        return Some(Instr::Dup(n));
    }
    if let Some(n) = indexed_stack_op(token, "swap") {
        return Some(Instr::Swap(n));
    }
    if let Some(n) = indexed_stack_op(token, "drop") {
        return Some(Instr::Drop(n));
    }

    if let Some(value) = parse_number(token) {
        return Some(Instr::PushConstant(value));
    }

    clip_reference(token)
}

/// Parses `dupN`/`swapN`/`dropN` suffixes. `dup3` copies the value three
/// below the top; the digits must make up the entire remainder of the token.
fn indexed_stack_op(token: &str, prefix: &str) -> Option<usize> {
    let rest = token.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Parses a numeric literal. The character filter keeps `f32::from_str`'s
/// extras (`inf`, `NaN`) from being accepted as literals.
fn parse_number(token: &str) -> Option<f32> {
    let valid = token
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E'));
    if !valid {
        return None;
    }
    token.parse().ok()
}

/// Maps a clip letter to its positional index: `x y z` then `a` through `w`.
fn clip_letter(c: char) -> Option<usize> {
    match c {
        'x' => Some(0),
        'y' => Some(1),
        'z' => Some(2),
        'a'..='w' => Some(c as usize - 'a' as usize + 3),
        _ => None,
    }
}

/// Parses the clip-reference token forms: a bare letter, a relative access
/// `x[dx,dy]`, or a frame property `x.PropName`.
fn clip_reference(token: &str) -> Option<Instr> {
    let mut chars = token.chars();
    let clip = clip_letter(chars.next()?)?;
    let rest = chars.as_str();

    if rest.is_empty() {
        return Some(Instr::PushInput(InputRef { clip, dx: 0, dy: 0 }));
    }

    if let Some(name) = rest.strip_prefix('.') {
        let mut name_chars = name.chars();
        let head_ok = name_chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let tail_ok = name_chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if head_ok && tail_ok {
            return Some(Instr::PushProperty(PropRef {
                clip,
                name: name.to_string(),
            }));
        }
        return None;
    }

    let inner = rest.strip_prefix('[')?.strip_suffix(']')?;
    let (dx, dy) = inner.split_once(',')?;
    let dx: i32 = dx.parse().ok()?;
    let dy: i32 = dy.parse().ok()?;
    Some(Instr::PushInput(InputRef { clip, dx, dy }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_expression() {
        let expr = parse("x y +").unwrap();
        assert_eq!(
            expr.instrs(),
            &[
                Instr::PushInput(InputRef {
                    clip: 0,
                    dx: 0,
                    dy: 0
                }),
                Instr::PushInput(InputRef {
                    clip: 1,
                    dx: 0,
                    dy: 0
                }),
                Instr::Binary(BinaryKind::Add),
            ]
        );
        assert_eq!(expr.max_depth(), 2);
    }

    #[test]
    fn test_numeric_literals() {
        let expr = parse("-1.5 3e-2 + +0.25 +").unwrap();
        assert_eq!(expr.instrs()[0], Instr::PushConstant(-1.5));
        assert_eq!(expr.instrs()[1], Instr::PushConstant(3e-2));
        assert_eq!(expr.instrs()[3], Instr::PushConstant(0.25));
    }

    #[test]
    fn test_inf_is_not_a_literal() {
        assert!(matches!(
            parse("inf"),
            Err(ParseError::Syntax { ref token, .. }) if token == "inf"
        ));
    }

    #[test]
    fn test_clip_letter_order() {
        let expr = parse("z a w max max").unwrap();
        assert_eq!(
            expr.instrs()[0],
            Instr::PushInput(InputRef {
                clip: 2,
                dx: 0,
                dy: 0
            })
        );
        assert_eq!(
            expr.instrs()[1],
            Instr::PushInput(InputRef {
                clip: 3,
                dx: 0,
                dy: 0
            })
        );
        assert_eq!(
            expr.instrs()[2],
            Instr::PushInput(InputRef {
                clip: 25,
                dx: 0,
                dy: 0
            })
        );
    }

    #[test]
    fn test_relative_pixel_access() {
        let expr = parse("y[-1,2]").unwrap();
        assert_eq!(
            expr.instrs()[0],
            Instr::PushInput(InputRef {
                clip: 1,
                dx: -1,
                dy: 2
            })
        );
        assert!(parse("x[1]").is_err());
        assert!(parse("x[1,2").is_err());
    }

    #[test]
    fn test_frame_property() {
        let expr = parse("x.PlaneStatsAverage").unwrap();
        assert_eq!(
            expr.instrs()[0],
            Instr::PushProperty(PropRef {
                clip: 0,
                name: "PlaneStatsAverage".to_string()
            })
        );
        assert!(parse("x.").is_err());
        assert!(parse("x.1bad").is_err());
    }

    #[test]
    fn test_coordinates() {
        let expr = parse("X Y +").unwrap();
        assert_eq!(expr.instrs()[0], Instr::PushCoordX);
        assert_eq!(expr.instrs()[1], Instr::PushCoordY);
    }

    #[test]
    fn test_indexed_stack_ops() {
        let expr = parse("1 2 3 dup2 swap2 drop2 +").unwrap();
        assert_eq!(expr.instrs()[3], Instr::Dup(2));
        assert_eq!(expr.instrs()[4], Instr::Swap(2));
        assert_eq!(expr.instrs()[5], Instr::Drop(2));
        assert!(parse("dupx").is_err());
    }

    #[test]
    fn test_unknown_token() {
        let err = parse("x foo +").unwrap_err();
        assert_eq!(
            err,
            ParseError::Syntax {
                token: "foo".to_string(),
                position: 1
            }
        );
    }

    #[test]
    fn test_arity_underflow() {
        let err = parse("x +").unwrap_err();
        assert_eq!(
            err,
            ParseError::Arity {
                token: "+".to_string(),
                position: 1,
                needs: 2,
                depth: 1
            }
        );
        assert!(matches!(parse("sqrt"), Err(ParseError::Arity { .. })));
        assert!(matches!(parse("1 2 ?"), Err(ParseError::Arity { .. })));
        assert!(matches!(parse("1 swap3"), Err(ParseError::Arity { .. })));
    }

    #[test]
    fn test_stack_imbalance() {
        assert_eq!(
            parse("x x").unwrap_err(),
            ParseError::StackImbalance { depth: 2 }
        );
        assert_eq!(
            parse("").unwrap_err(),
            ParseError::StackImbalance { depth: 0 }
        );
        assert_eq!(
            parse("1 2 3 drop3").unwrap_err(),
            ParseError::StackImbalance { depth: 0 }
        );
    }

    #[test]
    fn test_max_depth_tracking() {
        let expr = parse("1 2 3 ? ").unwrap();
        assert_eq!(expr.max_depth(), 3);
        let expr = parse("x dup dup * +").unwrap();
        assert_eq!(expr.max_depth(), 3);
    }

    #[test]
    fn test_case_significance() {
        // Uppercase letters other than the coordinate tokens are unknown.
        assert!(parse("A").is_err());
        assert!(parse("x").is_ok());
    }
}
