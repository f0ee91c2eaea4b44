//! Image instructions: sampling, fetches, gathers, writes and queries.

use log::trace;
use rspirv::spirv::{Decoration, Dim, Op};

use crate::error::Result;
use crate::ir::{BaseType, Id, ImageInfo, Instruction};
use crate::{bail_internal, bail_unsupported, err_internal};

use super::constants::swizzle_letter;
use super::preprocess::{is_dref_op, is_sample_op};
use super::types::numeric_type_name;
use super::CompilerMsl;

// Image operand mask bits, in operand order.
const OPERAND_BIAS: u32 = 0x1;
const OPERAND_LOD: u32 = 0x2;
const OPERAND_GRAD: u32 = 0x4;
const OPERAND_CONST_OFFSET: u32 = 0x8;
const OPERAND_OFFSET: u32 = 0x10;
const OPERAND_CONST_OFFSETS: u32 = 0x20;
const OPERAND_SAMPLE: u32 = 0x40;
const OPERAND_MIN_LOD: u32 = 0x80;

pub(crate) fn is_image_op(op: Op) -> bool {
    is_sample_op(op)
        || matches!(
            op,
            Op::SampledImage
                | Op::Image
                | Op::ImageRead
                | Op::ImageWrite
                | Op::ImageQuerySize
                | Op::ImageQuerySizeLod
                | Op::ImageQueryLevels
                | Op::ImageQuerySamples
                | Op::ImageQueryLod
                | Op::ImageTexelPointer
        )
}

fn is_proj_op(op: Op) -> bool {
    matches!(
        op,
        Op::ImageSampleProjImplicitLod
            | Op::ImageSampleProjExplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSampleProjDrefExplicitLod
    )
}

/// Optional operands following the image operand mask.
#[derive(Debug, Default)]
struct ImageOperands {
    bias: Option<Id>,
    lod: Option<Id>,
    grad: Option<(Id, Id)>,
    offset: Option<Id>,
    sample: Option<Id>,
}

impl ImageOperands {
    fn parse(words: &[u32]) -> Result<ImageOperands> {
        let mut operands = ImageOperands::default();
        let Some((&mask, mut rest)) = words.split_first() else {
            return Ok(operands);
        };
        let mut take = |count: usize| -> Result<Vec<u32>> {
            if rest.len() < count {
                bail_internal!("image operand mask {:#x} promises more operands than present", mask);
            }
            let (head, tail) = rest.split_at(count);
            rest = tail;
            Ok(head.to_vec())
        };
        if mask & OPERAND_BIAS != 0 {
            operands.bias = Some(take(1)?[0]);
        }
        if mask & OPERAND_LOD != 0 {
            operands.lod = Some(take(1)?[0]);
        }
        if mask & OPERAND_GRAD != 0 {
            let grad = take(2)?;
            operands.grad = Some((grad[0], grad[1]));
        }
        if mask & OPERAND_CONST_OFFSET != 0 {
            operands.offset = Some(take(1)?[0]);
        }
        if mask & OPERAND_OFFSET != 0 {
            operands.offset = Some(take(1)?[0]);
        }
        if mask & OPERAND_CONST_OFFSETS != 0 {
            bail_unsupported!("ConstOffsets image operands are not supported in MSL.");
        }
        if mask & OPERAND_SAMPLE != 0 {
            operands.sample = Some(take(1)?[0]);
        }
        if mask & OPERAND_MIN_LOD != 0 {
            bail_unsupported!("MinLod image operands are not supported in MSL.");
        }
        Ok(operands)
    }
}

/// Components of the coordinate for the given dimensionality, and the
/// component holding the array layer or projection divisor.
fn coordinate_parts(dim: Dim) -> Result<(u32, &'static str)> {
    Ok(match dim {
        Dim::Dim1D => (1, ".y"),
        Dim::Dim2D | Dim::DimRect => (2, ".z"),
        Dim::Dim3D | Dim::DimCube => (3, ".w"),
        other => bail_internal!("{:?} images have no coordinate layout", other),
    })
}

fn swizzle_prefix(count: u32) -> String {
    (0..count).map(swizzle_letter).collect()
}

impl CompilerMsl {
    pub(crate) fn emit_image_op(&mut self, inst: &Instruction) -> Result<()> {
        match inst.op {
            Op::SampledImage => {
                if inst.ops.len() < 4 {
                    bail_internal!("OpSampledImage expects four operands");
                }
                let (rid, image, sampler) = (inst.ops[1], inst.ops[2], inst.ops[3]);
                let expr = self.to_expression(image)?;
                self.state.expressions.insert(rid, expr);
                if let Some(var) = self.backing_variable(image) {
                    self.state.backing.insert(rid, var);
                }
                self.state.sampled_images.insert(rid, (image, sampler));
                Ok(())
            }
            Op::Image => {
                if inst.ops.len() < 3 {
                    bail_internal!("OpImage expects three operands");
                }
                let (rid, sampled) = (inst.ops[1], inst.ops[2]);
                let image = self.state.sampled_images.get(&sampled).map_or(sampled, |&(image, _)| image);
                let expr = self.to_expression(image)?;
                self.forward_from(rid, image, expr);
                Ok(())
            }
            Op::ImageWrite => self.emit_image_write(inst),
            Op::ImageQuerySize | Op::ImageQuerySizeLod => self.emit_image_size_query(inst),
            Op::ImageQueryLevels | Op::ImageQuerySamples => {
                if inst.ops.len() < 3 {
                    bail_internal!("{:?} expects three operands", inst.op);
                }
                let (rt, rid, image) = (inst.ops[0], inst.ops[1], inst.ops[2]);
                let method = if inst.op == Op::ImageQueryLevels {
                    "get_num_mip_levels"
                } else {
                    "get_num_samples"
                };
                let expr = format!("{}({}.{}())", self.type_name(rt)?, self.to_expression(image)?, method);
                self.emit_op(rt, rid, expr)
            }
            Op::ImageQueryLod => bail_unsupported!("Querying the level of detail is not supported in MSL."),
            Op::ImageTexelPointer => bail_unsupported!("Atomics on images are not supported in MSL."),
            _ => self.emit_image_access(inst),
        }
    }

    fn image_info(&self, image: Id) -> Result<ImageInfo> {
        let ty = self.ir.expression_type(image)?;
        let ty = match (ty.basetype, ty.parent_type) {
            (BaseType::SampledImage, Some(parent)) if ty.image.is_none() => self.ir.get_type(parent)?,
            _ => ty,
        };
        ty.image
            .clone()
            .ok_or_else(|| err_internal!("id {} is not an image", image))
    }

    /// Whether the texture behind `image` is declared as a depth texture.
    fn is_depth_texture(&self, image: Id, info: &ImageInfo) -> bool {
        info.depth
            || self
                .backing_variable(image)
                .is_some_and(|v| self.comparison_vars.contains(&self.base_variable(v)))
    }

    fn is_constant_zero(&self, id: Id) -> bool {
        self.ir
            .maybe_constant(id)
            .is_some_and(|c| !c.specialization && c.scalar_u32() == Some(0))
    }

    /// Drop the access restriction on the variable behind `image`. The
    /// signature is already written, so the pass must run again.
    fn mark_image_access(&mut self, image: Id, decoration: Decoration) {
        let Some(var) = self.backing_variable(image) else { return };
        let var = self.base_variable(var);
        if self.ir.has_decoration(var, decoration) {
            trace!("image {} used despite {:?}", var, decoration);
            self.ir.unset_decoration(var, decoration);
            self.state.request_recompile();
        }
    }

    fn round_if_float(&self, expr: String, coord: Id) -> Result<String> {
        Ok(if self.ir.expression_type(coord)?.basetype.is_float() {
            format!("round({})", expr)
        } else {
            expr
        })
    }

    /// Coordinate arguments: the coordinate itself, then the cube face and
    /// array layer where Metal takes them separately.
    fn coordinate_arguments(&self, info: &ImageInfo, coord: Id, fetch: bool, proj: bool) -> Result<Vec<String>> {
        let expr = self.to_expression(coord)?;
        let vecsize = self.ir.expression_type(coord)?.vecsize;

        match info.dim {
            Dim::DimBuffer => {
                let tc = if vecsize > 1 { format!("{}.x", expr) } else { expr };
                return Ok(vec![format!("spvTexelBufferCoord({})", self.round_if_float(tc, coord)?)]);
            }
            Dim::DimSubpassData => {
                let position = match self.builtin_vars.get(&rspirv::spirv::BuiltIn::FragCoord) {
                    Some(&var) => self.to_expression(var)?,
                    None => "gl_FragCoord".to_string(),
                };
                let tc = format!("uint2({}.xy)", position);
                return Ok(if info.ms { vec![tc] } else { vec![tc, "0".to_string()] });
            }
            _ => {}
        }

        let (count, alt) = coordinate_parts(info.dim)?;
        let select = |n: u32| {
            if vecsize > n {
                format!("{}.{}", expr, swizzle_prefix(n))
            } else {
                expr.clone()
            }
        };
        let mut args = Vec::new();

        if fetch {
            let (n, ty) = match info.dim {
                Dim::Dim1D => (1, "uint"),
                Dim::Dim3D => (3, "uint3"),
                _ => (2, "uint2"),
            };
            args.push(format!("{}({})", ty, self.round_if_float(select(n), coord)?));
            if info.dim == Dim::DimCube {
                args.push(format!("uint({})", self.round_if_float(format!("{}.z", expr), coord)?));
            }
        } else {
            let mut tc = select(count);
            if proj {
                tc = format!("{} / {}{}", tc, expr, alt);
            }
            args.push(tc);
        }

        if info.arrayed && !proj {
            let layer = if fetch && info.dim == Dim::DimCube {
                format!("{}.w", expr)
            } else {
                format!("{}{}", expr, alt)
            };
            args.push(format!("uint({})", self.round_if_float(layer, coord)?));
        }
        Ok(args)
    }

    fn emit_image_access(&mut self, inst: &Instruction) -> Result<()> {
        let op = inst.op;
        if inst.ops.len() < 4 {
            bail_internal!("{:?} expects at least four operands", op);
        }
        let (rt, rid, image, coord) = (inst.ops[0], inst.ops[1], inst.ops[2], inst.ops[3]);
        let info = self.image_info(image)?;
        let fetch = matches!(op, Op::ImageFetch | Op::ImageRead);
        let gather = matches!(op, Op::ImageGather | Op::ImageDrefGather);
        let dref = is_dref_op(op);
        let proj = is_proj_op(op);

        // Dref value or gather component precedes the operand mask.
        let (extra, operand_words) = if dref || op == Op::ImageGather {
            (inst.ops.get(4).copied(), inst.ops.get(5..).unwrap_or(&[]))
        } else {
            (None, &inst.ops[4..])
        };
        let operands = ImageOperands::parse(operand_words)?;

        if op == Op::ImageRead {
            self.mark_image_access(image, Decoration::NonReadable);
        }

        let mut args = Vec::new();
        if !fetch {
            args.push(self.to_sampler_expression(image)?);
        }
        args.extend(self.coordinate_arguments(&info, coord, fetch, proj)?);

        if let (true, Some(dref_id)) = (dref, extra) {
            let mut value = self.to_expression(dref_id)?;
            if proj {
                let (_, alt) = coordinate_parts(info.dim)?;
                value = format!("{} / {}{}", value, self.to_expression(coord)?, alt);
            }
            args.push(value);
        }

        let skip_level = info.dim == Dim::Dim1D;
        let macos_dref = dref && self.options.is_macos();
        if let Some(bias) = operands.bias {
            if macos_dref {
                if !self.is_constant_zero(bias) {
                    bail_unsupported!("Sample compare with bias is not supported on macOS.");
                }
            } else if !skip_level {
                args.push(format!("bias({})", self.to_expression(bias)?));
            }
        }
        if let Some(lod) = operands.lod {
            if fetch {
                if !skip_level {
                    args.push(self.to_expression(lod)?);
                }
            } else if macos_dref {
                if !self.is_constant_zero(lod) {
                    bail_unsupported!("Sample compare with a non-zero level is not supported on macOS.");
                }
                args.push("level(0)".to_string());
            } else if !skip_level {
                args.push(format!("level({})", self.to_expression(lod)?));
            }
        } else if op == Op::ImageFetch && !skip_level && info.dim != Dim::DimBuffer && !info.ms && info.sampled != 2 {
            args.push("0".to_string());
        }
        if let Some((dx, dy)) = operands.grad {
            if macos_dref {
                if !(self.is_constant_zero(dx) && self.is_constant_zero(dy)) {
                    bail_unsupported!("Sample compare with gradients is not supported on macOS.");
                }
                args.push("level(0)".to_string());
            } else {
                let kind = match info.dim {
                    Dim::Dim2D => Some("gradient2d"),
                    Dim::Dim3D => Some("gradient3d"),
                    Dim::DimCube => Some("gradientcube"),
                    _ => None,
                };
                if let Some(kind) = kind {
                    args.push(format!("{}({}, {})", kind, self.to_expression(dx)?, self.to_expression(dy)?));
                }
            }
        }

        let mut has_offset = false;
        if let Some(offset) = operands.offset {
            let expr = self.to_expression(offset)?;
            let vecsize = self.ir.expression_type(offset)?.vecsize;
            let offset_expr = match info.dim {
                Dim::Dim2D if vecsize > 2 => Some(format!("{}.xy", expr)),
                Dim::Dim2D => Some(expr),
                Dim::Dim3D if vecsize > 3 => Some(format!("{}.xyz", expr)),
                Dim::Dim3D => Some(expr),
                _ => None,
            };
            if let Some(offset_expr) = offset_expr {
                args.push(offset_expr);
                has_offset = true;
            }
        }

        if op == Op::ImageGather {
            let component = match extra {
                Some(id) => self.ir.constant_u32(id)?,
                None => 0,
            };
            if info.dim == Dim::Dim2D && !has_offset {
                args.push("int2(0)".to_string());
            }
            args.push(format!("component::{}", swizzle_letter(component)));
        }

        if let Some(sample) = operands.sample {
            args.push(self.to_expression(sample)?);
        }

        let image_expr = self.to_expression(image)?;
        let image_type = self
            .ir
            .type_of(image)
            .ok_or_else(|| err_internal!("image {} has no type", image))?;
        let needs_swizzle = self.needs_swizzle_argument(image_type)?;
        let mut expr = if gather && needs_swizzle {
            let scalar = self.type_name(info.sampled_type)?;
            let texture = self.type_name_for(image_type, self.backing_variable(image).map(|v| self.base_variable(v)))?;
            let wrapper = if dref { "spvGatherCompareSwizzle" } else { "spvGatherSwizzle" };
            let sampler = args.remove(0);
            format!(
                "{}<{}, {}>({}, {}, {}, {})",
                wrapper,
                scalar,
                texture,
                sampler,
                image_expr,
                args.join(", "),
                self.to_swizzle_expression(image)?
            )
        } else {
            let method = match (fetch, gather) {
                (true, _) => "read",
                (false, true) => "gather",
                (false, false) => "sample",
            };
            let suffix = if dref { "_compare" } else { "" };
            let call = format!("{}.{}{}({})", image_expr, method, suffix, args.join(", "));
            if needs_swizzle && !dref {
                format!("spvTextureSwizzle({}, {})", call, self.to_swizzle_expression(image)?)
            } else {
                call
            }
        };

        if !dref && !gather && self.is_depth_texture(image, &info) && self.ir.get_type(rt)?.vecsize > 1 {
            expr = format!("{}({})", self.type_name(rt)?, expr);
        }
        self.emit_op(rt, rid, expr)
    }

    fn emit_image_write(&mut self, inst: &Instruction) -> Result<()> {
        if inst.ops.len() < 3 {
            bail_internal!("OpImageWrite expects at least three operands");
        }
        let (image, coord, texel) = (inst.ops[0], inst.ops[1], inst.ops[2]);
        let info = self.image_info(image)?;
        let operands = ImageOperands::parse(&inst.ops[3..])?;
        self.mark_image_access(image, Decoration::NonWritable);

        let texel_expr = self.to_expression(texel)?;
        let texel_type = self.ir.expression_type(texel)?;
        let texel_expr = match texel_type.vecsize {
            1 => format!("{}({})", numeric_type_name(texel_type.basetype, 4, 1)?, texel_expr),
            2 => format!("{}.xyyy", texel_expr),
            3 => format!("{}.xyzz", texel_expr),
            _ => texel_expr,
        };

        let mut args = vec![texel_expr];
        args.extend(self.coordinate_arguments(&info, coord, true, false)?);
        if let Some(lod) = operands.lod {
            if !matches!(info.dim, Dim::Dim1D | Dim::DimBuffer) {
                args.push(self.to_expression(lod)?);
            }
        }
        let line = format!("{}.write({});", self.to_expression(image)?, args.join(", "));
        self.statement(line);
        Ok(())
    }

    fn emit_image_size_query(&mut self, inst: &Instruction) -> Result<()> {
        if inst.ops.len() < 3 {
            bail_internal!("{:?} expects at least three operands", inst.op);
        }
        let (rt, rid, image) = (inst.ops[0], inst.ops[1], inst.ops[2]);
        let info = self.image_info(image)?;
        let image_expr = self.to_expression(image)?;
        let lod = match inst.ops.get(3) {
            Some(&lod) if !info.ms && info.dim != Dim::DimBuffer && !self.is_constant_zero(lod) => {
                self.to_expression(lod)?
            }
            _ => String::new(),
        };

        if info.dim == Dim::DimBuffer {
            let expr = format!(
                "{}({}.get_width() * {}.get_height())",
                self.type_name(rt)?,
                image_expr,
                image_expr
            );
            return self.emit_op(rt, rid, expr);
        }

        let mut parts = vec![format!("{}.get_width({})", image_expr, lod)];
        if matches!(info.dim, Dim::Dim2D | Dim::Dim3D | Dim::DimCube | Dim::DimRect) {
            parts.push(format!("{}.get_height({})", image_expr, lod));
        }
        if info.dim == Dim::Dim3D {
            parts.push(format!("{}.get_depth({})", image_expr, lod));
        }
        if info.arrayed {
            parts.push(format!("{}.get_array_size()", image_expr));
        }
        let expr = format!("{}({})", self.type_name(rt)?, parts.join(", "));
        self.emit_op(rt, rid, expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_operands_in_mask_order() {
        let ops = ImageOperands::parse(&[OPERAND_LOD | OPERAND_CONST_OFFSET | OPERAND_SAMPLE, 10, 11, 12]).unwrap();
        assert_eq!(ops.lod, Some(10));
        assert_eq!(ops.offset, Some(11));
        assert_eq!(ops.sample, Some(12));
        assert_eq!(ops.bias, None);
    }

    #[test]
    fn test_parse_grad_takes_two_ids() {
        let ops = ImageOperands::parse(&[OPERAND_GRAD | OPERAND_OFFSET, 5, 6, 7]).unwrap();
        assert_eq!(ops.grad, Some((5, 6)));
        assert_eq!(ops.offset, Some(7));
    }

    #[test]
    fn test_parse_rejects_truncated_and_unsupported() {
        assert!(ImageOperands::parse(&[OPERAND_GRAD, 5]).is_err());
        assert!(ImageOperands::parse(&[OPERAND_CONST_OFFSETS, 5]).is_err());
        assert!(ImageOperands::parse(&[]).unwrap().lod.is_none());
    }

    #[test]
    fn test_coordinate_parts() {
        assert_eq!(coordinate_parts(Dim::Dim2D).unwrap(), (2, ".z"));
        assert_eq!(coordinate_parts(Dim::DimCube).unwrap(), (3, ".w"));
        assert_eq!(swizzle_prefix(3), "xyz");
    }
}
