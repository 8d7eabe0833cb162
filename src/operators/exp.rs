//! Functions for linking and calling the exponential function in JIT-compiled code.
//!
//! This module provides functionality to:
//! - Link the crate's exponential contract function into JIT-compiled code
//! - Generate IR instructions to call it within compiled kernels
//!
//! The function operates on 32-bit floating point numbers, the engine's
//! working precision, and guarantees `exp(0) == 1.0` exactly.

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F32;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_module::{FuncId, Linkage, Module};

use crate::errors::BuilderError;

/// Links the exponential function to make it available for JIT compilation.
///
/// Declares the external symbol registered by the kernel builder, with the
/// signature `f32 -> f32`. Redeclaring under the same name returns the same
/// id, so per-operator linking during codegen is cheap.
///
/// # Arguments
/// * `module` - The Cranelift module to declare the function in
///
/// # Errors
/// Returns a [`BuilderError::DeclarationError`] if declaration fails.
pub(crate) fn link_exp(module: &mut dyn Module) -> Result<FuncId, BuilderError> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F32));
    sig.returns.push(AbiParam::new(F32));

    module
        .declare_function("pixelexpr_exp", Linkage::Import, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))
}

/// Generates IR instructions to call the exponential function.
///
/// # Arguments
/// * `builder` - The function builder being used to construct the kernel
/// * `module` - The module containing the declaration from [`link_exp`]
/// * `func_id` - The function id returned by [`link_exp`]
/// * `arg` - The IR value to pass as the argument
///
/// # Returns
/// The IR value containing the result of the call.
pub(crate) fn call_exp(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    builder.inst_results(call)[0]
}
