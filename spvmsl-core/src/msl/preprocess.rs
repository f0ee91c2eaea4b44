//! Instruction scans run ahead of emission.
//!
//! `preprocess` runs at the start of every pass and only ever adds to the
//! session, so a later pass never forgets what an earlier one found. The
//! other scans run once while the store is being prepared.

use std::collections::HashMap;

use log::{debug, trace};
use rspirv::spirv::{Decoration, Dim, ExecutionModel, GLOp, Op, StorageClass};

use crate::bail_unsupported;
use crate::error::Result;
use crate::ir::{BaseType, ExtInstSet, Id, Instruction, Ir};

use super::helpers::{HelperTag, MAX_ARRAY_COPY_DIMENSIONS};
use super::{CompilerMsl, PRAGMA_MISSING_PROTOTYPES, PRAGMA_UNUSED_VARIABLE};

const METAL_ATOMIC_HEADER: &str = "#include <metal_atomic>";

/// Map from derived values (loads, access chains, sampled images, ...) to
/// the value they were derived from.
pub(crate) fn value_sources(ir: &Ir, funcs: &[Id]) -> Result<HashMap<Id, Id>> {
    let mut sources = HashMap::new();
    for &func in funcs {
        for inst in ir.get_function(func)?.instructions() {
            match inst.op {
                Op::Load
                | Op::AccessChain
                | Op::InBoundsAccessChain
                | Op::PtrAccessChain
                | Op::SampledImage
                | Op::Image
                | Op::CopyObject => {
                    if let (Some(&rid), Some(&src)) = (inst.ops.get(1), inst.ops.get(2)) {
                        sources.insert(rid, src);
                    }
                }
                _ => {}
            }
        }
    }
    Ok(sources)
}

/// Follow `sources` back to the variable (or parameter) a value came from.
pub(crate) fn trace_variable(ir: &Ir, sources: &HashMap<Id, Id>, id: Id) -> Option<Id> {
    let mut current = id;
    for _ in 0..=sources.len() {
        if ir.maybe_variable(current).is_some() {
            return Some(current);
        }
        current = *sources.get(&current)?;
    }
    None
}

/// Image, sampled image or texel operand of an image instruction.
pub(crate) fn image_operand(inst: &Instruction) -> Option<Id> {
    match inst.op {
        Op::ImageWrite => inst.ops.first().copied(),
        _ => inst.ops.get(2).copied(),
    }
}

pub(crate) fn is_sample_op(op: Op) -> bool {
    matches!(
        op,
        Op::ImageSampleImplicitLod
            | Op::ImageSampleExplicitLod
            | Op::ImageSampleDrefImplicitLod
            | Op::ImageSampleDrefExplicitLod
            | Op::ImageSampleProjImplicitLod
            | Op::ImageSampleProjExplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSampleProjDrefExplicitLod
            | Op::ImageFetch
            | Op::ImageGather
            | Op::ImageDrefGather
    )
}

pub(crate) fn is_dref_op(op: Op) -> bool {
    matches!(
        op,
        Op::ImageSampleDrefImplicitLod
            | Op::ImageSampleDrefExplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSampleProjDrefExplicitLod
            | Op::ImageDrefGather
    )
}

pub(crate) fn is_atomic_op(op: Op) -> bool {
    matches!(
        op,
        Op::AtomicLoad
            | Op::AtomicStore
            | Op::AtomicExchange
            | Op::AtomicCompareExchange
            | Op::AtomicCompareExchangeWeak
            | Op::AtomicIIncrement
            | Op::AtomicIDecrement
            | Op::AtomicIAdd
            | Op::AtomicISub
            | Op::AtomicSMin
            | Op::AtomicUMin
            | Op::AtomicSMax
            | Op::AtomicUMax
            | Op::AtomicAnd
            | Op::AtomicOr
            | Op::AtomicXor
    )
}

/// Pointer operand of an atomic instruction.
pub(crate) fn atomic_pointer(inst: &Instruction) -> Option<Id> {
    match inst.op {
        Op::AtomicStore => inst.ops.first().copied(),
        _ => inst.ops.get(2).copied(),
    }
}

impl CompilerMsl {
    /// Find sampled images that need swizzling and images sampled with a
    /// depth comparison.
    pub(crate) fn analyze_sampled_image_usage(&mut self) -> Result<()> {
        if !self.options.swizzle_texture_samples {
            return Ok(());
        }
        let sources = value_sources(&self.ir, &self.call_graph.order)?;
        for &func in &self.call_graph.order {
            for inst in self.ir.get_function(func)?.instructions() {
                if !is_sample_op(inst.op) {
                    continue;
                }
                let Some(image) = image_operand(inst) else { continue };
                let ty = self.ir.expression_type(image)?;
                let sampled = ty.basetype == BaseType::SampledImage
                    || (ty.basetype == BaseType::Image && ty.image.as_ref().is_some_and(|i| i.sampled == 1));
                if sampled {
                    self.uses_swizzle = true;
                }
                if is_dref_op(inst.op) {
                    if let Some(var) = trace_variable(&self.ir, &sources, image) {
                        let var = self.base_variable(var);
                        trace!("image variable {} sampled with depth comparison", var);
                        self.comparison_vars.insert(var);
                    }
                }
            }
        }
        Ok(())
    }

    /// Storage images without explicit access start out both non-readable
    /// and non-writable; the first read or write emitted clears the flag.
    pub(crate) fn fixup_image_load_store_access(&mut self) -> Result<()> {
        let vars: Vec<Id> = self.ir.variables().map(|(id, _)| id).collect();
        for var in vars {
            let (_, ty) = self.ir.variable_data_type(var)?;
            let storage_image = ty.basetype == BaseType::Image && ty.image.as_ref().is_some_and(|i| i.sampled == 2);
            if !storage_image {
                continue;
            }
            if !self.ir.has_decoration(var, Decoration::NonWritable)
                && !self.ir.has_decoration(var, Decoration::NonReadable)
            {
                self.ir.set_decoration(var, Decoration::NonWritable, 0);
                self.ir.set_decoration(var, Decoration::NonReadable, 0);
            }
        }
        Ok(())
    }

    pub(crate) fn mark_written_variables(&mut self) -> Result<()> {
        let sources = value_sources(&self.ir, &self.call_graph.order)?;
        let mut written = Vec::new();
        for &func in &self.call_graph.order {
            for inst in self.ir.get_function(func)?.instructions() {
                let targets: Vec<Id> = match inst.op {
                    Op::Store => inst.ops.first().copied().into_iter().collect(),
                    op if is_atomic_op(op) && op != Op::AtomicLoad => atomic_pointer(inst).into_iter().collect(),
                    Op::FunctionCall => inst
                        .ops
                        .iter()
                        .skip(3)
                        .copied()
                        .filter(|&arg| self.ir.expression_type(arg).is_ok_and(|t| t.pointer))
                        .collect(),
                    _ => Vec::new(),
                };
                for target in targets {
                    if let Some(root) = trace_variable(&self.ir, &sources, target) {
                        written.push(root);
                    }
                }
            }
        }
        self.written_vars.extend(written);
        Ok(())
    }

    /// Scan every reachable function for capabilities the output needs.
    pub(crate) fn preprocess(&mut self) -> Result<()> {
        let funcs = self.call_graph.order.clone();
        if funcs.len() > 1 {
            self.require_pragma(PRAGMA_MISSING_PROTOTYPES);
        }

        for func in funcs {
            let instructions: Vec<Instruction> = self.ir.get_function(func)?.instructions().cloned().collect();
            for inst in &instructions {
                self.preprocess_instruction(inst)?;
            }
        }

        if self.state.uses_resource_write && self.model == ExecutionModel::Vertex && !self.rasterization_disabled {
            debug!("vertex entry point writes resources, rasterization disabled");
            self.rasterization_disabled = true;
        }
        Ok(())
    }

    fn preprocess_instruction(&mut self, inst: &Instruction) -> Result<()> {
        match inst.op {
            Op::FMod => self.require_helper(HelperTag::Mod),

            Op::FunctionCall => {
                self.require_pragma(PRAGMA_MISSING_PROTOTYPES);
                if let Some(&rt) = inst.ops.first() {
                    let dims = self.ir.get_type(rt)?.array.len() as u32;
                    self.require_array_copy(dims)?;
                }
            }

            Op::Store => {
                if let Some(&value) = inst.ops.get(1) {
                    let dims = self.ir.expression_type(value)?.array.len() as u32;
                    self.require_array_copy(dims)?;
                }
                if let Some(&ptr) = inst.ops.first() {
                    self.check_resource_write(ptr)?;
                }
            }

            Op::Load => {
                if let Some(&rt) = inst.ops.first() {
                    let ty = self.ir.get_type(rt)?;
                    if !ty.is_opaque() {
                        let dims = ty.array.len() as u32;
                        self.require_array_copy(dims)?;
                    }
                }
            }

            Op::CompositeConstruct => {
                if let Some(&rt) = inst.ops.first() {
                    let dims = self.ir.get_type(rt)?.array.len() as u32;
                    if dims > 1 {
                        self.require_array_copy(dims - 1)?;
                    }
                }
            }

            Op::ImageFetch | Op::ImageRead | Op::ImageWrite => {
                if inst.op == Op::ImageWrite {
                    self.state.uses_resource_write = true;
                }
                if let Some(image) = image_operand(inst) {
                    if self.ir.expression_type(image)?.dim() == Some(Dim::DimBuffer) {
                        self.require_helper(HelperTag::TexelBufferCoords);
                    }
                }
                if inst.op == Op::ImageFetch && self.options.swizzle_texture_samples {
                    self.require_helper(HelperTag::TextureSwizzle);
                }
            }

            op if is_sample_op(op) => {
                if self.options.swizzle_texture_samples {
                    self.require_helper(HelperTag::TextureSwizzle);
                }
            }

            op if is_atomic_op(op) => {
                self.state.uses_atomics = true;
                self.require_header(METAL_ATOMIC_HEADER);
                self.require_pragma(PRAGMA_UNUSED_VARIABLE);
                if op != Op::AtomicLoad {
                    if let Some(ptr) = atomic_pointer(inst) {
                        self.check_resource_write(ptr)?;
                    }
                }
            }

            Op::ExtInst => self.preprocess_ext_inst(inst)?,

            _ => {}
        }
        Ok(())
    }

    fn preprocess_ext_inst(&mut self, inst: &Instruction) -> Result<()> {
        let (Some(&rt), Some(&set), Some(&number)) = (inst.ops.first(), inst.ops.get(2), inst.ops.get(3)) else {
            return Ok(());
        };
        if self.ir.ext_inst_set(set) != Some(ExtInstSet::GlslStd450) {
            return Ok(());
        }
        let tag = match GLOp::from_u32(number) {
            Some(GLOp::Radians) => Some(HelperTag::Radians),
            Some(GLOp::Degrees) => Some(HelperTag::Degrees),
            Some(GLOp::FindILsb) => Some(HelperTag::FindILsb),
            Some(GLOp::FindSMsb) => Some(HelperTag::FindSMsb),
            Some(GLOp::FindUMsb) => Some(HelperTag::FindUMsb),
            Some(GLOp::SSign) => Some(HelperTag::SSign),
            Some(GLOp::MatrixInverse) => HelperTag::inverse(self.ir.get_type(rt)?.columns),
            _ => None,
        };
        if let Some(tag) = tag {
            trace!("extended instruction {} needs helper {:?}", number, tag);
            self.require_helper(tag);
        }
        Ok(())
    }

    pub(crate) fn require_array_copy(&mut self, dims: u32) -> Result<()> {
        if dims == 0 {
            return Ok(());
        }
        if dims > MAX_ARRAY_COPY_DIMENSIONS {
            bail_unsupported!("Cannot support this many dimensions for arrays of arrays.");
        }
        self.require_helper(HelperTag::ArrayCopy(dims));
        Ok(())
    }

    fn check_resource_write(&mut self, ptr: Id) -> Result<()> {
        let storage = self.ir.expression_type(ptr)?.storage;
        if matches!(storage, StorageClass::Uniform | StorageClass::StorageBuffer) {
            self.state.uses_resource_write = true;
        }
        Ok(())
    }
}
