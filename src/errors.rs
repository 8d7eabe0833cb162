//! Error types for the pixelexpr-jit crate.
//!
//! This module defines the various error types that can occur while turning an
//! expression string into a compiled per-plane kernel. The main error types are:
//!
//! - `ParseError`: Errors while lexing/validating the RPN expression string
//! - `ResolveError`: Errors while binding clip/plane references to the supplied clips
//! - `BuilderError`: Errors during JIT compilation with Cranelift
//! - `ExprError`: High-level errors when constructing an evaluator
//!
//! Every error is raised at construction time, before any frame is processed.
//! Per-pixel numeric conditions (`inf`, `-inf`, `NaN`) are ordinary values, not
//! errors, and internal inconsistencies discovered during kernel execution are
//! treated as fatal defects rather than reported conditions.

use cranelift_codegen::CodegenError;
use cranelift_module::ModuleError;
use thiserror::Error;

/// Errors that can occur while parsing an RPN expression string.
///
/// Parsing is a single left-to-right scan over whitespace-separated tokens
/// that simulates the evaluation stack depth. A sequence that would underflow
/// the stack, or that does not leave exactly one value behind, is rejected
/// here — before any reference resolution or compilation happens.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// A token that is neither a literal, a reference nor a known operator
    #[error("unknown token '{token}' (position {position})")]
    Syntax { token: String, position: usize },
    /// An operator was applied with fewer values on the stack than it consumes
    #[error("'{token}' (position {position}) needs {needs} stack values, only {depth} available")]
    Arity {
        token: String,
        position: usize,
        needs: usize,
        depth: usize,
    },
    /// The expression finished with a stack depth other than one
    #[error("expression leaves {depth} values on the stack, expected exactly 1")]
    StackImbalance { depth: usize },
}

/// Errors that can occur while resolving clip and plane references.
///
/// Resolution is a pure validation pass: every `PushInput`/`PushProperty`
/// instruction must name a clip that was actually supplied, and pixel
/// references must name a plane that exists in that clip's declared format.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// A clip letter maps to an index beyond the supplied clip list
    #[error("expression references clip {clip}, but only {supplied} clip(s) were supplied")]
    UnboundClip { clip: usize, supplied: usize },
    /// The requested plane does not exist in the referenced clip's format
    #[error("clip {clip} declares {planes} plane(s), plane {plane} does not exist")]
    UnboundPlane {
        clip: usize,
        plane: usize,
        planes: usize,
    },
    /// No input clips were supplied at all
    #[error("at least one input clip is required")]
    NoInputClips,
}

/// Errors that can occur during JIT compilation of kernels.
///
/// This enum represents the failure modes of lowering the linear IR into
/// native machine code using Cranelift as the JIT compiler backend.
#[derive(Error, Debug)]
pub enum BuilderError {
    /// Error when the target machine architecture is not supported
    #[error("host machine is not supported: {0}")]
    HostMachineNotSupported(String),
    /// Error during Cranelift code generation
    #[error("codegen error: {0}")]
    CodegenError(CodegenError),
    /// Error in the Cranelift JIT module
    #[error("module error: {0}")]
    ModuleError(ModuleError),
    /// Error when defining a JIT function
    #[error("function error: {0}")]
    FunctionError(String),
    /// Error when declaring a JIT function or symbol
    #[error("declaration error: {0}")]
    DeclarationError(String),
}

/// High-level errors that can occur when constructing an evaluator.
///
/// This enum wraps the lower-level errors from the parsing, resolution and
/// compilation stages. Construction fails outright on the first error; the
/// caller must supply a corrected expression.
#[derive(Debug, Error)]
pub enum ExprError {
    /// Error while parsing an expression string
    #[error("failed to parse expression")]
    ParseError(#[from] ParseError),
    /// Error while binding clip/plane references
    #[error("failed to resolve expression references")]
    ResolveError(#[from] ResolveError),
    /// Error while JIT compiling a kernel
    #[error("failed to build kernel")]
    BuildError(#[from] BuilderError),
}
