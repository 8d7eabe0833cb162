//! Functions for linking and calling the natural logarithm in JIT-compiled code.
//!
//! The linked function follows the engine's numeric contract exactly:
//! `log(0) == -inf` (never a finite clamp), `log(1) == 0.0` exactly, and
//! `log(negative) == NaN`.

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F32;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_module::{FuncId, Linkage, Module};

use crate::errors::BuilderError;

/// Links the natural logarithm function to make it available for JIT
/// compilation, with the signature `f32 -> f32`.
///
/// # Errors
/// Returns a [`BuilderError::DeclarationError`] if declaration fails.
pub(crate) fn link_log(module: &mut dyn Module) -> Result<FuncId, BuilderError> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F32));
    sig.returns.push(AbiParam::new(F32));

    module
        .declare_function("pixelexpr_log", Linkage::Import, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))
}

/// Generates IR instructions to call the natural logarithm.
pub(crate) fn call_log(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    builder.inst_results(call)[0]
}
