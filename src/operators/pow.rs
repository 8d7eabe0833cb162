//! Functions for linking and calling the power function in JIT-compiled code.
//!
//! The linked function is the crate's contract `pow`: an
//! `exp2(y * log2(x))` pipeline for non-negative finite bases (matching the
//! vectorized-engine behavior near a zero base) that defers to IEEE `powf`
//! for negative or non-finite inputs.

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F32;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_module::{FuncId, Linkage, Module};

use crate::errors::BuilderError;

/// Links the power function to make it available for JIT compilation, with
/// the signature `(f32, f32) -> f32`.
///
/// # Errors
/// Returns a [`BuilderError::DeclarationError`] if declaration fails.
pub(crate) fn link_pow(module: &mut dyn Module) -> Result<FuncId, BuilderError> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F32)); // base
    sig.params.push(AbiParam::new(F32)); // exponent
    sig.returns.push(AbiParam::new(F32));

    module
        .declare_function("pixelexpr_pow", Linkage::Import, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))
}

/// Generates IR instructions to call the power function.
///
/// # Arguments
/// * `builder` - The function builder being used to construct the kernel
/// * `module` - The module containing the declaration from [`link_pow`]
/// * `func_id` - The function id returned by [`link_pow`]
/// * `base` - The IR value for the base
/// * `exponent` - The IR value for the exponent
pub(crate) fn call_pow(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    base: Value,
    exponent: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[base, exponent]);
    builder.inst_results(call)[0]
}
