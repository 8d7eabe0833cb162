//! Functions for linking and calling the shift operators in JIT-compiled code.
//!
//! Shift amounts vary per pixel, and the SIMD baseline has no per-lane
//! variable shifts, so both shifts go through scalar calls. The linked
//! functions convert their operands with saturating `i32` truncation, mask
//! the amount to 0..=31, and shift (`shr` arithmetically).

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F32;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_module::{FuncId, Linkage, Module};

use crate::errors::BuilderError;

fn link_binary(module: &mut dyn Module, name: &str) -> Result<FuncId, BuilderError> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F32));
    sig.params.push(AbiParam::new(F32));
    sig.returns.push(AbiParam::new(F32));

    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))
}

/// Links the left-shift function, with the signature `(f32, f32) -> f32`.
pub(crate) fn link_shl(module: &mut dyn Module) -> Result<FuncId, BuilderError> {
    link_binary(module, "pixelexpr_shl")
}

/// Links the right-shift function, with the signature `(f32, f32) -> f32`.
pub(crate) fn link_shr(module: &mut dyn Module) -> Result<FuncId, BuilderError> {
    link_binary(module, "pixelexpr_shr")
}

/// Generates IR instructions to call a linked shift function.
pub(crate) fn call_shift(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    lhs: Value,
    rhs: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[lhs, rhs]);
    builder.inst_results(call)[0]
}
