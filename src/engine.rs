//! Execution engine: eager expression compilation and per-frame evaluation.
//!
//! This module provides the core [`Evaluator`] type, the filter-construction
//! entry point the host framework calls. Construction runs the whole
//! pipeline — parse, resolve, constant-fold, JIT-compile — once per output
//! plane, so every user-facing error surfaces before the first frame and the
//! per-frame path is nothing but gather → kernel → store.
//!
//! # Features
//!
//! - One expression per output plane; if fewer expressions than planes are
//!   supplied the last one is repeated, and an empty expression selects a
//!   pass-through copy of the first clip's plane
//! - Frame properties captured once per evaluation call, never per pixel
//! - Output rows partitioned across worker threads with rayon; no pixel's
//!   evaluation reads any other pixel's output, so no synchronization is
//!   needed inside a call
//! - Deterministic results: evaluating the same request twice produces
//!   bit-identical buffers
//!
//! # Example
//!
//! ```
//! use pixelexpr_jit::{ClipFormat, ClipFrame, EvaluationRequest, Evaluator, FrameView, SampleKind};
//!
//! let format = ClipFormat::new(SampleKind::U8, 1);
//! let evaluator = Evaluator::new(
//!     &["x 2 *"],
//!     &[format],
//!     ClipFormat::new(SampleKind::U8, 1),
//! ).unwrap();
//!
//! let data = vec![1u8, 2, 3, 4];
//! let request = EvaluationRequest {
//!     frame_index: 0,
//!     inputs: vec![ClipFrame::new(vec![FrameView::from_u8(&data, 4, 1, 4)])],
//! };
//! let planes = evaluator.evaluate(&request);
//! assert_eq!(planes[0].as_u8(), &[2, 4, 6, 8]);
//! ```

use colored::Colorize;
use itertools::Itertools;
use rayon::prelude::*;

use crate::builder::{compile_kernel, Kernel};
use crate::convert::{self, Sample};
use crate::errors::{ExprError, ResolveError};
use crate::expr::SlotSource;
use crate::frame::{
    ClipFormat, EvaluationRequest, FrameView, OutputBuffer, PlaneData, SampleKind,
};
use crate::opt::optimize;
use crate::parser::parse;
use crate::resolve::resolve;
use crate::types::LANES;

/// How one output plane is produced.
enum PlaneProgram {
    /// Pass-through copy of the first clip's plane, format-converted
    Copy,
    /// A compiled kernel evaluating the plane's expression per pixel
    Compute(Kernel),
}

/// A reusable per-pixel expression evaluator bound to concrete input and
/// output formats.
///
/// All validation and compilation happens in [`Evaluator::new`]; afterwards
/// the evaluator is immutable and can evaluate any number of frames, from
/// any number of threads, in any order. Construction is a pure function of
/// its inputs — there is no hidden global state — so hosts wanting a kernel
/// cache can key one externally on (expressions, formats).
pub struct Evaluator {
    expressions: Vec<String>,
    clips: Vec<ClipFormat>,
    output: ClipFormat,
    planes: Vec<PlaneProgram>,
}

impl Evaluator {
    /// Parses, resolves, optimizes and JIT-compiles the given expressions
    /// for every output plane.
    ///
    /// # Arguments
    /// * `expressions` - One RPN expression per output plane. With fewer
    ///   expressions than planes, the last is repeated. An empty (or
    ///   all-whitespace) expression copies the first clip's plane instead
    ///   of computing.
    /// * `clips` - Declared formats of the input clips, in the order clip
    ///   letters bind to (`x` is `clips[0]`)
    /// * `output` - The target output format
    ///
    /// # Errors
    /// Returns an [`ExprError`] if any expression fails to parse, references
    /// a clip or plane that does not exist, or fails to compile. All errors
    /// are raised here, before any frame is processed.
    ///
    /// # Panics
    /// Panics if `expressions` is empty.
    pub fn new(
        expressions: &[&str],
        clips: &[ClipFormat],
        output: ClipFormat,
    ) -> Result<Self, ExprError> {
        assert!(
            !expressions.is_empty(),
            "at least one expression is required"
        );
        if clips.is_empty() {
            return Err(ResolveError::NoInputClips.into());
        }

        let mut sources = Vec::with_capacity(output.planes);
        let mut planes = Vec::with_capacity(output.planes);
        for p in 0..output.planes {
            let src = expressions
                .get(p)
                .copied()
                .unwrap_or(expressions[expressions.len() - 1]);
            sources.push(src.to_string());

            if src.trim().is_empty() {
                if p >= clips[0].planes {
                    return Err(ResolveError::UnboundPlane {
                        clip: 0,
                        plane: p,
                        planes: clips[0].planes,
                    }
                    .into());
                }
                planes.push(PlaneProgram::Copy);
            } else {
                let expr = parse(src)?;
                let resolved = resolve(&expr, clips, p)?;
                let optimized = optimize(resolved);
                planes.push(PlaneProgram::Compute(compile_kernel(&optimized)?));
            }
        }

        Ok(Self {
            expressions: sources,
            clips: clips.to_vec(),
            output,
            planes,
        })
    }

    /// The declared input clip formats.
    pub fn clip_formats(&self) -> &[ClipFormat] {
        &self.clips
    }

    /// The target output format.
    pub fn output_format(&self) -> ClipFormat {
        self.output
    }

    /// Evaluates one frame, producing one output buffer per output plane.
    ///
    /// Output plane dimensions are taken from the first clip's frame. Frame
    /// properties referenced by the expressions are looked up once in the
    /// request's property maps; a property absent on this frame evaluates
    /// as NaN.
    ///
    /// # Panics
    /// Per-frame evaluation has no recoverable error path: a request that
    /// violates the construction-established invariants (wrong clip count,
    /// plane count, sample type, or mismatched plane dimensions) is a
    /// defect in the caller and panics.
    pub fn evaluate(&self, request: &EvaluationRequest) -> Vec<OutputBuffer> {
        assert_eq!(
            request.inputs.len(),
            self.clips.len(),
            "request must supply one frame per input clip"
        );
        for (i, (clip, format)) in request.inputs.iter().zip(&self.clips).enumerate() {
            assert_eq!(
                clip.planes.len(),
                format.planes,
                "clip {i}: plane count differs from the declared format"
            );
            for (p, view) in clip.planes.iter().enumerate() {
                assert_eq!(
                    view.sample(),
                    format.sample,
                    "clip {i} plane {p}: sample type differs from the declared format"
                );
            }
        }

        let width = request.inputs[0].planes[0].width();
        let height = request.inputs[0].planes[0].height();
        for clip in &request.inputs {
            for view in &clip.planes {
                assert!(
                    view.width() == width && view.height() == height,
                    "all input planes must share the output dimensions"
                );
            }
        }

        (0..self.output.planes)
            .map(|plane| {
                let data = match self.output.sample {
                    SampleKind::U8 => {
                        PlaneData::U8(self.run_plane::<u8>(plane, request, width, height))
                    }
                    SampleKind::U16 => {
                        PlaneData::U16(self.run_plane::<u16>(plane, request, width, height))
                    }
                    SampleKind::F32 => {
                        PlaneData::F32(self.run_plane::<f32>(plane, request, width, height))
                    }
                };
                OutputBuffer {
                    width,
                    height,
                    data,
                }
            })
            .collect()
    }

    fn run_plane<T: Sample + Default>(
        &self,
        plane: usize,
        request: &EvaluationRequest,
        width: usize,
        height: usize,
    ) -> Vec<T> {
        let mut out = vec![T::default(); width * height];
        match &self.planes[plane] {
            PlaneProgram::Copy => {
                copy_plane(&request.inputs[0].planes[plane], &mut out, width);
            }
            PlaneProgram::Compute(kernel) => {
                run_kernel(kernel, request, &mut out, width, height);
            }
        }
        out
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{{\n")?;
        writeln!(
            f,
            "    {}: {}\n",
            "Expressions".cyan(),
            self.expressions.iter().map(|e| format!("'{e}'")).join(", ")
        )?;
        writeln!(f, "    {}: {:?}\n", "Clips".cyan(), self.clips)?;
        writeln!(f, "    {}: {:?}\n", "Output".cyan(), self.output)?;
        writeln!(f, "}}")?;
        Ok(())
    }
}

/// Pass-through copy of one plane, converted through the working format.
fn copy_plane<T: Sample>(view: &FrameView, out: &mut [T], width: usize) {
    let mut stage = vec![0.0f32; width];
    for (iy, row) in out.chunks_mut(width).enumerate() {
        convert::gather_row(view, iy, 0, 0, &mut stage);
        convert::store_row(&stage, row);
    }
}

/// Evaluates a compiled kernel over every pixel of one output plane.
///
/// Rows are split into chunks sized from the available parallelism and
/// processed by rayon workers. Each worker owns a slot-major `f32` staging
/// block: row-invariant slots (properties, the X coordinate) are staged
/// once per chunk, the Y coordinate once per row, and pixel slots gathered
/// per row through the format converter. The vector kernel then sweeps the
/// row with the scalar kernel finishing the remainder, and the result row
/// is stored through the format converter.
fn run_kernel<T: Sample>(
    kernel: &Kernel,
    request: &EvaluationRequest,
    out: &mut [T],
    width: usize,
    height: usize,
) {
    let n_slots = kernel.slots().len();

    // Capture frame properties once per evaluation call.
    let mut constant_fills: Vec<(usize, f32)> = Vec::new();
    let mut coord_x_slots: Vec<usize> = Vec::new();
    let mut coord_y_slots: Vec<usize> = Vec::new();
    let mut pixel_slots: Vec<(usize, &FrameView, i32, i32)> = Vec::new();
    for (idx, slot) in kernel.slots().iter().enumerate() {
        match slot {
            SlotSource::Pixel {
                clip,
                plane,
                dx,
                dy,
            } => {
                pixel_slots.push((idx, &request.inputs[*clip].planes[*plane], *dx, *dy));
            }
            SlotSource::Property { clip, name } => {
                let value = request.inputs[*clip]
                    .props
                    .get(name)
                    .map(|v| *v as f32)
                    .unwrap_or(f32::NAN);
                constant_fills.push((idx, value));
            }
            SlotSource::CoordX => coord_x_slots.push(idx),
            SlotSource::CoordY => coord_y_slots.push(idx),
        }
    }

    let num_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8);
    let rows_per_chunk = (height / (num_threads * 4)).max(1);

    let vector_fn = kernel.vector_fn();
    let scalar_fn = kernel.scalar_fn();

    out.par_chunks_mut(rows_per_chunk * width)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            // One dummy row keeps the pointer sweep in bounds for
            // constant-folded kernels that load nothing.
            let mut stage_in = vec![0.0f32; n_slots.max(1) * width];
            let mut stage_out = vec![0.0f32; width];

            for &(slot, value) in &constant_fills {
                stage_in[slot * width..(slot + 1) * width].fill(value);
            }
            for &slot in &coord_x_slots {
                for (i, d) in stage_in[slot * width..(slot + 1) * width]
                    .iter_mut()
                    .enumerate()
                {
                    *d = i as f32;
                }
            }

            for (row_idx, out_row) in chunk.chunks_mut(width).enumerate() {
                let iy = chunk_idx * rows_per_chunk + row_idx;

                for &slot in &coord_y_slots {
                    stage_in[slot * width..(slot + 1) * width].fill(iy as f32);
                }
                for &(slot, view, dx, dy) in &pixel_slots {
                    convert::gather_row(
                        view,
                        iy,
                        dx,
                        dy,
                        &mut stage_in[slot * width..(slot + 1) * width],
                    );
                }

                let in_ptr = stage_in.as_ptr();
                let out_ptr = stage_out.as_mut_ptr();
                let stride = width as i64;
                let mut x = 0;
                // SAFETY: every kernel load reads slot-major offsets inside
                // the staging block (n_slots rows of `width` elements), and
                // each call writes LANES (or 1) elements of `stage_out`,
                // which holds `width` elements.
                unsafe {
                    while x + LANES <= width {
                        vector_fn(in_ptr.add(x), out_ptr.add(x), stride);
                        x += LANES;
                    }
                    while x < width {
                        scalar_fn(in_ptr.add(x), out_ptr.add(x), stride);
                        x += 1;
                    }
                }

                convert::store_row(&stage_out, out_row);
            }
        });
}
