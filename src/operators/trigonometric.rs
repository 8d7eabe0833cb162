//! Functions for linking and calling trigonometric functions in JIT-compiled code.
//!
//! Sine and cosine operate on 32-bit floats (arguments in radians) and match
//! the canonical library results at single-precision accuracy.

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F32;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_module::{FuncId, Linkage, Module};

use crate::errors::BuilderError;

fn link_unary(module: &mut dyn Module, name: &str) -> Result<FuncId, BuilderError> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F32));
    sig.returns.push(AbiParam::new(F32));

    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))
}

/// Links the sine function, with the signature `f32 -> f32`.
pub(crate) fn link_sin(module: &mut dyn Module) -> Result<FuncId, BuilderError> {
    link_unary(module, "pixelexpr_sin")
}

/// Links the cosine function, with the signature `f32 -> f32`.
pub(crate) fn link_cos(module: &mut dyn Module) -> Result<FuncId, BuilderError> {
    link_unary(module, "pixelexpr_cos")
}

/// Generates IR instructions to call a linked trigonometric function.
pub(crate) fn call_trig(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    builder.inst_results(call)[0]
}
