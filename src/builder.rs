//! This module provides functionality for JIT compilation of per-plane pixel
//! kernels. It uses Cranelift as the backend compiler to generate native
//! machine code.
//!
//! The main entry point is [`compile_kernel`], which lowers a resolved,
//! optimized expression into two functions inside one JIT module:
//!
//! - a vector body evaluating [`LANES`] adjacent pixels per call with
//!   `F32X4` instructions
//! - a scalar body evaluating a single pixel, used for row remainders
//!
//! Both share the signature `extern "C" fn(inputs, output, stride)` over a
//! slot-major `f32` staging block (see [`crate::types::KernelFn`]) and, by
//! construction, compute identical results for identical pixel values. The
//! crate's math contract functions are registered as symbols on the module,
//! so compiled kernels and the constant folder share one set of semantics.

use std::sync::Arc;

use cranelift::prelude::*;
use cranelift_codegen::Context;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use isa::TargetIsa;

use crate::errors::BuilderError;
use crate::expr::{ResolvedExpr, SlotSource};
use crate::math;
use crate::types::{KernelFn, LANES};

/// A compiled, reusable kernel bound to one expression and one concrete
/// format signature.
///
/// Immutable after compilation and safely shared (read-only) across
/// concurrently executing frame evaluations: the function pointers target
/// finalized executable memory and the slot table is never mutated.
#[derive(Debug, Clone)]
pub(crate) struct Kernel {
    vector_fn: KernelFn,
    scalar_fn: KernelFn,
    slots: Vec<SlotSource>,
}

impl Kernel {
    /// The input slots the execution engine must stage, in slot order.
    pub(crate) fn slots(&self) -> &[SlotSource] {
        &self.slots
    }

    /// The vector body, writing [`LANES`] results per call.
    pub(crate) fn vector_fn(&self) -> KernelFn {
        self.vector_fn
    }

    /// The scalar body, writing one result per call.
    pub(crate) fn scalar_fn(&self) -> KernelFn {
        self.scalar_fn
    }
}

/// Creates an Instruction Set Architecture (ISA) target for code generation.
///
/// Detects the host machine architecture and configures compilation flags
/// for optimized kernel code: speed-oriented codegen, SIMD enabled, and the
/// IR verifier active only in debug builds.
///
/// # Errors
/// Returns a [`BuilderError`] if the host architecture is not supported or
/// flag configuration fails.
pub(crate) fn create_isa() -> Result<Arc<dyn TargetIsa>, BuilderError> {
    let mut flag_builder = settings::builder();

    // Get target triple to detect architecture
    let target_triple = target_lexicon::Triple::host();
    let is_x86 = matches!(
        target_triple.architecture,
        target_lexicon::Architecture::X86_64
    );

    // Set flags based on architecture
    if is_x86 {
        flag_builder.set("use_colocated_libcalls", "true").unwrap();
        flag_builder.set("is_pic", "false").unwrap();
    } else {
        flag_builder.set("use_colocated_libcalls", "false").unwrap();
        flag_builder.set("is_pic", "false").unwrap();
    }

    flag_builder.set("opt_level", "speed").unwrap();
    // Tolerate the flag being absent on Cranelift versions where SIMD is
    // unconditional.
    let _ = flag_builder.set("enable_simd", "true");

    #[cfg(debug_assertions)]
    {
        flag_builder.set("enable_verifier", "true").unwrap();
        flag_builder.set("enable_alias_analysis", "true").unwrap();
    }
    #[cfg(not(debug_assertions))]
    {
        flag_builder.set("enable_verifier", "false").unwrap();
        flag_builder.set("enable_alias_analysis", "false").unwrap();
    }

    let isa_builder = cranelift_native::builder()
        .map_err(|msg| BuilderError::HostMachineNotSupported(msg.to_string()))?;

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(BuilderError::CodegenError)
}

/// Creates a new JIT module and function context.
///
/// The module is initialized with the crate's math contract functions
/// (`exp`, `log`, `sin`, `cos`, `pow`, `shl`, `shr`) registered as callable
/// symbols, so kernels can link them by name during code generation.
///
/// # Arguments
/// * `isa` - The target instruction set architecture to compile for
pub(crate) fn create_module_and_context(isa: Arc<dyn TargetIsa>) -> (JITModule, Context) {
    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());

    builder.symbol("pixelexpr_exp", math::expr_exp as *const u8);
    builder.symbol("pixelexpr_log", math::expr_log as *const u8);
    builder.symbol("pixelexpr_sin", math::expr_sin as *const u8);
    builder.symbol("pixelexpr_cos", math::expr_cos as *const u8);
    builder.symbol("pixelexpr_pow", math::expr_pow as *const u8);
    builder.symbol("pixelexpr_shl", math::expr_shl as *const u8);
    builder.symbol("pixelexpr_shr", math::expr_shr as *const u8);

    let module = JITModule::new(builder);
    let ctx = module.make_context();

    (module, ctx)
}

/// Compiles a resolved expression into a reusable [`Kernel`].
///
/// Builds the vector and scalar bodies into one module, finalizes it, and
/// extracts the function pointers.
///
/// # Errors
/// Returns a [`BuilderError`] if declaration, definition or finalization
/// fails. A malformed IR reaching this stage indicates an upstream
/// validation gap, not a user-facing recoverable condition.
pub(crate) fn compile_kernel(expr: &ResolvedExpr) -> Result<Kernel, BuilderError> {
    let isa = create_isa()?;
    let (mut module, mut ctx) = create_module_and_context(isa);
    let mut builder_ctx = FunctionBuilderContext::new();

    let vector_id = build_kernel_fn(
        &mut module,
        &mut ctx,
        &mut builder_ctx,
        expr,
        "kernel_vector",
        LANES as u8,
    )?;
    let scalar_id = build_kernel_fn(
        &mut module,
        &mut ctx,
        &mut builder_ctx,
        expr,
        "kernel_scalar",
        1,
    )?;

    module
        .finalize_definitions()
        .map_err(BuilderError::ModuleError)?;

    // SAFETY: Both functions were compiled with the KernelFn signature
    // (inputs ptr, output ptr, stride). The JITModule is dropped here
    // without calling free_memory, so the finalized executable memory stays
    // valid for the life of the process and the pointers never dangle.
    let vector_fn = unsafe {
        std::mem::transmute::<*const u8, KernelFn>(module.get_finalized_function(vector_id))
    };
    let scalar_fn = unsafe {
        std::mem::transmute::<*const u8, KernelFn>(module.get_finalized_function(scalar_id))
    };

    Ok(Kernel {
        vector_fn,
        scalar_fn,
        slots: expr.slots.clone(),
    })
}

/// Builds one kernel body (vector or scalar) into the module.
///
/// The body is a single straight-line block: load the three parameters,
/// evaluate the expression via [`ResolvedExpr::codegen`], store the final
/// stack value to the output pointer and return.
fn build_kernel_fn(
    module: &mut JITModule,
    ctx: &mut Context,
    builder_ctx: &mut FunctionBuilderContext,
    expr: &ResolvedExpr,
    name: &str,
    lanes: u8,
) -> Result<FuncId, BuilderError> {
    // Pointers are passed as I64: kernels only target 64-bit hosts, and the
    // slot offsets they are added to are 64-bit values.
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(types::I64)); // inputs
    sig.params.push(AbiParam::new(types::I64)); // output
    sig.params.push(AbiParam::new(types::I64)); // stride in elements
    ctx.func.signature = sig.clone();

    let func_id = module
        .declare_function(name, Linkage::Local, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))?;

    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, builder_ctx);
        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        builder.seal_block(entry_block);

        let input_ptr = builder.block_params(entry_block)[0];
        let output_ptr = builder.block_params(entry_block)[1];
        let stride = builder.block_params(entry_block)[2];
        let stride_bytes = builder.ins().ishl_imm(stride, 2);

        let result = expr.codegen(&mut builder, module, lanes, input_ptr, stride_bytes)?;
        builder.ins().store(MemFlags::new(), result, output_ptr, 0);
        builder.ins().return_(&[]);
        builder.finalize();
    }

    module
        .define_function(func_id, ctx)
        .map_err(|msg| BuilderError::FunctionError(msg.to_string()))?;
    module.clear_context(ctx);

    Ok(func_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ClipFormat, SampleKind};
    use crate::opt::optimize;
    use crate::parser::parse;
    use crate::resolve::resolve;

    fn kernel_for(src: &str) -> Kernel {
        let expr = parse(src).unwrap();
        let resolved = resolve(&expr, &[ClipFormat::new(SampleKind::F32, 1)], 0).unwrap();
        compile_kernel(&optimize(resolved)).unwrap()
    }

    /// Runs a kernel over a single staged row: vector body for the bulk,
    /// scalar body for the remainder — the same sweep the engine performs.
    fn run_row(kernel: &Kernel, inputs: &[f32], width: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; width];
        let stride = width as i64;
        let mut x = 0;
        unsafe {
            while x + LANES <= width {
                (kernel.vector_fn())(inputs.as_ptr().add(x), out.as_mut_ptr().add(x), stride);
                x += LANES;
            }
            while x < width {
                (kernel.scalar_fn())(inputs.as_ptr().add(x), out.as_mut_ptr().add(x), stride);
                x += 1;
            }
        }
        out
    }

    #[test]
    fn test_arithmetic_kernel() {
        let kernel = kernel_for("x 2 * 1 +");
        let inputs: Vec<f32> = (0..7).map(|i| i as f32).collect();
        let out = run_row(&kernel, &inputs, 7);
        assert_eq!(out, vec![1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0]);
    }

    #[test]
    fn test_constant_kernel_loads_nothing() {
        let kernel = kernel_for("0 exp");
        assert!(kernel.slots().is_empty());
        // One dummy staging row keeps the pointer sweep in bounds even
        // though the kernel never loads from it.
        let staging = vec![0.0f32; 5];
        let out = run_row(&kernel, &staging, 5);
        assert_eq!(out, vec![1.0; 5]);
    }

    #[test]
    fn test_vector_and_scalar_bodies_agree() {
        let kernel = kernel_for("x exp x sin + x 0.5 pow max");
        let inputs: Vec<f32> = vec![0.0, 0.5, 1.0, 2.0, 3.0, 4.5, 7.25];
        let vector_out = run_row(&kernel, &inputs, 7);
        // Force everything through the scalar body for comparison.
        let mut scalar_out = vec![0.0f32; 7];
        unsafe {
            for x in 0..7 {
                (kernel.scalar_fn())(
                    inputs.as_ptr().add(x),
                    scalar_out.as_mut_ptr().add(x),
                    7,
                );
            }
        }
        for (v, s) in vector_out.iter().zip(&scalar_out) {
            assert_eq!(v.to_bits(), s.to_bits());
        }
    }

    #[test]
    fn test_select_and_compare_kernel() {
        let kernel = kernel_for("x 2 > 10 20 ?");
        let inputs: Vec<f32> = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let out = run_row(&kernel, &inputs, 5);
        assert_eq!(out, vec![20.0, 20.0, 20.0, 10.0, 10.0]);
    }

    #[test]
    fn test_two_slot_kernel() {
        let expr = parse("x y -").unwrap();
        let clips = [ClipFormat::new(SampleKind::F32, 1); 2];
        let resolved = resolve(&expr, &clips, 0).unwrap();
        let kernel = compile_kernel(&optimize(resolved)).unwrap();
        // Slot-major staging: slot 0 row then slot 1 row, stride 4.
        let inputs: Vec<f32> = vec![
            10.0, 20.0, 30.0, 40.0, // x
            1.0, 2.0, 3.0, 4.0, // y
        ];
        let out = run_row(&kernel, &inputs, 4);
        assert_eq!(out, vec![9.0, 18.0, 27.0, 36.0]);
    }
}
