/// Number of pixels evaluated per invocation of a vector kernel body.
///
/// Kernels are generated for Cranelift's `F32X4` type, the 128-bit SIMD
/// baseline available on both x86_64 (SSE) and aarch64 (NEON). Rows whose
/// width is not a multiple of this are finished by the scalar kernel.
pub const LANES: usize = 4;

/// Type alias for a JIT-compiled kernel function.
///
/// This represents a function that:
/// - Takes a pointer to the slot-major `f32` staging block for the current
///   pixel position (slot `s`, pixel `i` lives at `inputs[s * stride + i]`)
/// - Takes a pointer to the output position to write
/// - Takes the staging stride in elements (one full row width)
/// - Writes either `LANES` results (vector body) or 1 result (scalar body)
///
/// The pointed-to code is immutable after compilation, so the pointer is
/// safely shared across concurrently executing frame evaluations.
pub type KernelFn = unsafe extern "C" fn(*const f32, *mut f32, i64);
