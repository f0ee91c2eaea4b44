//! Instruction translation.
//!
//! Each value-producing instruction becomes a temporary `T _<id> = expr;`
//! unless it is forwarded (access chains, image handles, copies), in which
//! case its text is substituted at every use.

use log::trace;
use rspirv::spirv::{Decoration, GLOp, Op};

use crate::error::Result;
use crate::ir::{BaseType, ExtInstSet, Id, Instruction, Type};
use crate::{bail_internal, bail_unsupported, err_internal};

use super::constants::{binary_operator, signedness_cast, swizzle_letter};
use super::flow::enclose;
use super::helpers::HelperTag;
use super::preprocess::{atomic_pointer, is_atomic_op};
use super::textures::is_image_op;
use super::types::numeric_type_name;
use super::CompilerMsl;

const MEMORY_ORDER: &str = "memory_order_relaxed";

// Memory semantics bits.
const SEMANTICS_SUBGROUP: u32 = 0x80;
const SEMANTICS_WORKGROUP: u32 = 0x100;
const SEMANTICS_CROSS_WORKGROUP: u32 = 0x200;
const SEMANTICS_ATOMIC_COUNTER: u32 = 0x400;
const SEMANTICS_IMAGE: u32 = 0x800;

// Scopes, widest first.
const SCOPE_CROSS_DEVICE: u32 = 0;
const SCOPE_DEVICE: u32 = 1;
const SCOPE_SUBGROUP: u32 = 3;
const SCOPE_INVOCATION: u32 = 4;

fn need(inst: &Instruction, count: usize) -> Result<()> {
    if inst.ops.len() < count {
        bail_internal!("{:?} expects at least {} operands, found {}", inst.op, count, inst.ops.len());
    }
    Ok(())
}

/// GLSL.std.450 instructions that map onto an MSL function of the same
/// arity.
fn glsl_function(op: GLOp) -> Option<&'static str> {
    Some(match op {
        GLOp::Round => "round",
        GLOp::RoundEven => "rint",
        GLOp::Trunc => "trunc",
        GLOp::FAbs => "abs",
        GLOp::FSign | GLOp::SSign => "sign",
        GLOp::Floor => "floor",
        GLOp::Ceil => "ceil",
        GLOp::Fract => "fract",
        GLOp::Radians => "radians",
        GLOp::Degrees => "degrees",
        GLOp::Sin => "sin",
        GLOp::Cos => "cos",
        GLOp::Tan => "tan",
        GLOp::Asin => "asin",
        GLOp::Acos => "acos",
        GLOp::Atan => "atan",
        GLOp::Sinh => "sinh",
        GLOp::Cosh => "cosh",
        GLOp::Tanh => "tanh",
        GLOp::Asinh => "asinh",
        GLOp::Acosh => "acosh",
        GLOp::Atanh => "atanh",
        GLOp::Atan2 => "atan2",
        GLOp::Pow => "pow",
        GLOp::Exp => "exp",
        GLOp::Log => "log",
        GLOp::Exp2 => "exp2",
        GLOp::Log2 => "log2",
        GLOp::Sqrt => "sqrt",
        GLOp::InverseSqrt => "rsqrt",
        GLOp::Determinant => "determinant",
        GLOp::Modf => "modf",
        GLOp::Frexp => "frexp",
        GLOp::Ldexp => "ldexp",
        GLOp::FMin => "fast::min",
        GLOp::FMax => "fast::max",
        GLOp::FClamp => "fast::clamp",
        GLOp::NMin => "precise::min",
        GLOp::NMax => "precise::max",
        GLOp::NClamp => "precise::clamp",
        GLOp::FMix => "mix",
        GLOp::Step => "step",
        GLOp::SmoothStep => "smoothstep",
        GLOp::Fma => "fma",
        GLOp::Length => "length",
        GLOp::Distance => "distance",
        GLOp::Cross => "cross",
        GLOp::Normalize => "normalize",
        GLOp::FaceForward => "faceforward",
        GLOp::Reflect => "reflect",
        GLOp::Refract => "refract",
        GLOp::FindILsb => "findLSB",
        GLOp::PackSnorm4x8 => "pack_float_to_snorm4x8",
        GLOp::PackUnorm4x8 => "pack_float_to_unorm4x8",
        GLOp::PackSnorm2x16 => "pack_float_to_snorm2x16",
        GLOp::PackUnorm2x16 => "pack_float_to_unorm2x16",
        GLOp::UnpackSnorm4x8 => "unpack_snorm4x8_to_float",
        GLOp::UnpackUnorm4x8 => "unpack_unorm4x8_to_float",
        GLOp::UnpackSnorm2x16 => "unpack_snorm2x16_to_float",
        GLOp::UnpackUnorm2x16 => "unpack_unorm2x16_to_float",
        _ => return None,
    })
}

/// Integer GLSL.std.450 instructions whose operands must carry a specific
/// signedness.
fn glsl_integer_function(op: GLOp) -> Option<(&'static str, bool)> {
    Some(match op {
        GLOp::SAbs => ("abs", true),
        GLOp::SMin => ("min", true),
        GLOp::SMax => ("max", true),
        GLOp::SClamp => ("clamp", true),
        GLOp::UMin => ("min", false),
        GLOp::UMax => ("max", false),
        GLOp::UClamp => ("clamp", false),
        GLOp::FindSMsb => ("findSMSB", true),
        GLOp::FindUMsb => ("findUMSB", false),
        _ => return None,
    })
}

fn unary_function(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::DPdx | Op::DPdxFine | Op::DPdxCoarse => "dfdx",
        Op::DPdy | Op::DPdyFine | Op::DPdyCoarse => "dfdy",
        Op::Fwidth | Op::FwidthFine | Op::FwidthCoarse => "fwidth",
        Op::Any => "any",
        Op::All => "all",
        Op::IsNan => "isnan",
        Op::IsInf => "isinf",
        Op::Transpose => "transpose",
        Op::BitReverse => "reverse_bits",
        Op::BitCount => "popcount",
        _ => return None,
    })
}

fn unordered_operator(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::FUnordEqual => "==",
        Op::FUnordLessThan => "<",
        Op::FUnordGreaterThan => ">",
        Op::FUnordLessThanEqual => "<=",
        Op::FUnordGreaterThanEqual => ">=",
        _ => return None,
    })
}

fn ordered_operator(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::FAdd => "+",
        Op::FSub => "-",
        Op::FMul | Op::VectorTimesScalar | Op::MatrixTimesScalar | Op::MatrixTimesMatrix => "*",
        Op::FDiv => "/",
        Op::FOrdEqual => "==",
        Op::FOrdNotEqual | Op::FUnordNotEqual => "!=",
        Op::FOrdLessThan => "<",
        Op::FOrdGreaterThan => ">",
        Op::FOrdLessThanEqual => "<=",
        Op::FOrdGreaterThanEqual => ">=",
        _ => return None,
    })
}

impl CompilerMsl {
    pub(crate) fn emit_instruction(&mut self, inst: &Instruction) -> Result<()> {
        let result = self.translate(inst);
        self.state.previous_op = Some(inst.op);
        result
    }

    fn translate(&mut self, inst: &Instruction) -> Result<()> {
        match inst.op {
            Op::Nop | Op::Phi | Op::SelectionMerge | Op::LoopMerge | Op::Line | Op::NoLine => Ok(()),
            Op::Load => self.emit_load(inst),
            Op::Store => self.emit_store(inst),
            Op::CopyMemory => self.emit_copy_memory(inst),
            Op::AccessChain | Op::InBoundsAccessChain => self.emit_access_chain(inst, false),
            Op::PtrAccessChain => self.emit_access_chain(inst, true),
            Op::CopyObject => {
                need(inst, 3)?;
                let (rid, source) = (inst.ops[1], inst.ops[2]);
                let expr = self.to_expression(source)?;
                self.forward_from(rid, source, expr);
                Ok(())
            }
            Op::FunctionCall => self.emit_function_call(inst),
            Op::ExtInst => self.emit_ext_inst(inst),
            Op::ControlBarrier => {
                need(inst, 3)?;
                // A memory barrier already synchronizes the threadgroup.
                if self.state.previous_op != Some(Op::MemoryBarrier) {
                    self.emit_barrier(Some(inst.ops[0]), inst.ops[1], inst.ops[2])?;
                }
                Ok(())
            }
            Op::MemoryBarrier => {
                need(inst, 2)?;
                self.emit_barrier(None, inst.ops[0], inst.ops[1])
            }
            op if is_atomic_op(op) => self.emit_atomic(inst),
            op if is_image_op(op) => self.emit_image_op(inst),
            _ => self.emit_value_op(inst),
        }
    }

    // -------------------------------------------------------------------------
    // Temporaries
    // -------------------------------------------------------------------------

    /// `T _id = expr;`, or an assignment when the result was hoisted.
    pub(crate) fn emit_op(&mut self, rt: Id, rid: Id, expr: String) -> Result<()> {
        let name = format!("_{}", rid);
        if self.state.hoisted.contains(&rid) {
            self.statement(format!("{} = {};", name, expr));
        } else {
            self.statement(format!("{} = {};", self.variable_decl(rt, &name)?, expr));
        }
        self.state.expressions.insert(rid, name);
        Ok(())
    }

    /// Declare a temporary without initializer and return its name.
    fn declare_temporary(&mut self, rt: Id, rid: Id) -> Result<String> {
        let name = format!("_{}", rid);
        if !self.state.hoisted.contains(&rid) {
            self.statement(format!("{};", self.variable_decl(rt, &name)?));
        }
        self.state.expressions.insert(rid, name.clone());
        Ok(name)
    }

    /// Forward `expr` for `rid`, inheriting what is known about `source`.
    pub(crate) fn forward_from(&mut self, rid: Id, source: Id, expr: String) {
        self.state.expressions.insert(rid, expr);
        if let Some(var) = self.backing_variable(source) {
            self.state.backing.insert(rid, var);
        }
        if let Some(&pair) = self.state.sampled_images.get(&source) {
            self.state.sampled_images.insert(rid, pair);
        }
        if self.state.row_major.contains(&source) {
            self.state.row_major.insert(rid);
        }
        if self.state.packed.contains(&source) {
            self.state.packed.insert(rid);
        }
    }

    /// Variable a pointer or handle value was derived from.
    pub(crate) fn backing_variable(&self, id: Id) -> Option<Id> {
        if self.ir.maybe_variable(id).is_some() {
            return Some(id);
        }
        self.state.backing.get(&id).copied()
    }

    /// `expr` cast to the requested integer signedness when needed.
    fn operand_with_signedness(&self, id: Id, signed: bool) -> Result<String> {
        let expr = self.to_expression(id)?;
        signedness_cast(&expr, self.ir.expression_type(id)?, signed)
    }

    fn call_expression(&self, name: &str, args: &[Id]) -> Result<String> {
        let args = args
            .iter()
            .map(|&a| self.to_expression(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("{}({})", name, args.join(", ")))
    }

    /// Address space a pointer value refers to.
    fn pointer_address_space(&self, ptr: Id) -> Result<&'static str> {
        if let Some(var) = self.backing_variable(ptr) {
            if self.lut_variables.contains(&self.base_variable(var)) {
                return Ok("constant");
            }
            let space = self.argument_address_space(var)?;
            return Ok(space.trim_start_matches("const "));
        }
        Ok(self.type_address_space(self.ir.expression_type(ptr)?))
    }

    // -------------------------------------------------------------------------
    // Memory
    // -------------------------------------------------------------------------

    fn emit_load(&mut self, inst: &Instruction) -> Result<()> {
        need(inst, 3)?;
        let (rt, rid, ptr) = (inst.ops[0], inst.ops[1], inst.ops[2]);
        let ty = self.ir.get_type(rt)?.clone();
        let source = self.to_expression(ptr)?;

        if ty.is_opaque() {
            self.forward_from(rid, ptr, source);
            return Ok(());
        }
        if let Some(var) = self.backing_variable(ptr) {
            self.state.backing.insert(rid, var);
        }

        if ty.is_array() {
            let helper = match self.pointer_address_space(ptr)? {
                "constant" => "FromConstant",
                "thread" | "" => "FromStack",
                space => bail_unsupported!("Loading a whole array from {} memory is not supported.", space),
            };
            let name = self.declare_temporary(rt, rid)?;
            self.statement(format!("spvArrayCopy{}{}({}, {});", helper, ty.array.len(), name, source));
            return Ok(());
        }

        let packed = self.state.packed.contains(&ptr);
        if self.state.row_major.contains(&ptr) && ty.is_matrix() {
            return self.emit_row_major_load(rt, rid, &ty, source, packed);
        }

        let expr = if packed || self.converted_inputs.contains(&ptr) {
            format!("{}({})", self.type_name(rt)?, source)
        } else {
            source
        };
        self.emit_op(rt, rid, expr)
    }

    /// Row-major matrices are stored transposed. Square and packed ones are
    /// loaded raw and transposed; the raw value stays available so a
    /// following matrix-vector product can swap its operands instead.
    fn emit_row_major_load(&mut self, rt: Id, rid: Id, ty: &Type, source: String, packed: bool) -> Result<()> {
        let (columns, rows) = (ty.columns, ty.vecsize);
        if columns == rows || packed {
            let raw = format!("_{}_raw", rid);
            let stored = numeric_type_name(ty.basetype, columns, rows)?;
            self.statement(format!("{} {} = {};", stored, raw, source));
            self.emit_op(rt, rid, format!("transpose({})", raw))?;
            self.state.transposed.insert(rid, raw);
            return Ok(());
        }
        let Some(tag) = HelperTag::row_major(columns, rows) else {
            bail_unsupported!("Row-major {}x{} matrices are not supported.", columns, rows);
        };
        self.require_helper(tag);
        self.emit_op(rt, rid, format!("spvConvertFromRowMajor{}x{}({})", columns, rows, source))
    }

    fn emit_store(&mut self, inst: &Instruction) -> Result<()> {
        need(inst, 2)?;
        let (ptr, value) = (inst.ops[0], inst.ops[1]);
        let target = self.to_expression(ptr)?;
        let source = self.to_expression(value)?;
        let ty = self.ir.expression_type(value)?.clone();

        if ty.is_array() {
            return self.emit_array_copy(ptr, &target, value, &source, &ty);
        }

        if self.state.row_major.contains(&ptr) && ty.is_matrix() {
            if ty.columns != ty.vecsize && !self.state.packed.contains(&ptr) {
                bail_unsupported!("Storing to a non-square row-major matrix is not supported.");
            }
            self.statement(format!("{} = transpose({});", target, source));
            return Ok(());
        }
        self.statement(format!("{} = {};", target, source));
        Ok(())
    }

    fn emit_array_copy(&mut self, ptr: Id, target: &str, value: Id, source: &str, ty: &Type) -> Result<()> {
        match self.pointer_address_space(ptr)? {
            "thread" | "" => {}
            space => bail_unsupported!("Copying a whole array into {} memory is not supported.", space),
        }
        let from_constant = self.ir.maybe_constant(value).is_some()
            || self
                .backing_variable(value)
                .is_some_and(|v| self.lut_variables.contains(&self.base_variable(v)));
        let helper = if from_constant { "FromConstant" } else { "FromStack" };
        self.statement(format!("spvArrayCopy{}{}({}, {});", helper, ty.array.len(), target, source));
        Ok(())
    }

    fn emit_copy_memory(&mut self, inst: &Instruction) -> Result<()> {
        need(inst, 2)?;
        let (target_ptr, source_ptr) = (inst.ops[0], inst.ops[1]);
        let target = self.to_expression(target_ptr)?;
        let source = self.to_expression(source_ptr)?;
        let pointer = self
            .ir
            .type_of(target_ptr)
            .ok_or_else(|| err_internal!("copy target {} has no type", target_ptr))?;
        let ty = self.ir.pointee_type(pointer)?.1.clone();
        if ty.is_array() {
            match self.pointer_address_space(target_ptr)? {
                "thread" | "" => {}
                space => bail_unsupported!("Copying a whole array into {} memory is not supported.", space),
            }
            let helper = match self.pointer_address_space(source_ptr)? {
                "constant" => "FromConstant",
                _ => "FromStack",
            };
            self.statement(format!("spvArrayCopy{}{}({}, {});", helper, ty.array.len(), target, source));
            return Ok(());
        }
        self.statement(format!("{} = {};", target, source));
        Ok(())
    }

    fn emit_access_chain(&mut self, inst: &Instruction, ptr_chain: bool) -> Result<()> {
        need(inst, 3)?;
        let (rid, base) = (inst.ops[1], inst.ops[2]);
        let base_type = self.ir.type_of(base).ok_or_else(|| err_internal!("access chain base {} has no type", base))?;
        let (mut type_id, _) = self.ir.pointee_type(base_type)?;
        let mut expr = self.to_expression(base)?;
        let mut rest = &inst.ops[3..];
        let mut packed = self.state.packed.contains(&base);
        let mut row_major = self.state.row_major.contains(&base);

        if ptr_chain {
            if let Some((&first, tail)) = rest.split_first() {
                expr = format!("{}[{}]", expr, self.to_expression(first)?);
                rest = tail;
            }
        }

        if let (Some(var), Some((&first, tail))) = (self.ir.maybe_variable(base).map(|_| base), rest.split_first()) {
            let ty = self.ir.get_type(type_id)?.clone();
            if ty.is_struct() && !ty.is_array() && self.ir.is_builtin_block(ty.base_id) {
                let block = ty.base_id;
                let member = self.ir.constant_u32(first)?;
                if let Some(builtin) = self.ir.member_builtin(block, member) {
                    let storage = self.ir.get_variable(var)?.storage;
                    expr = match self.ir.member_qualified_alias(block, member) {
                        Some(alias) if self.in_entry_function() => alias.to_string(),
                        _ => self.builtin_to_msl(builtin, storage)?,
                    };
                    type_id = ty.member_types[member as usize];
                    rest = tail;
                }
            } else if ty.is_array() && self.is_buffer_array(var) {
                expr = format!("(*{}[{}])", expr, self.to_expression(first)?);
                type_id = ty.parent_type.ok_or_else(|| err_internal!("array type {} without element", type_id))?;
                rest = tail;
            }
        }

        for &index in rest {
            let ty = self.ir.get_type(type_id)?.clone();
            if ty.is_array() {
                let elem = ty.parent_type.ok_or_else(|| err_internal!("array type {} without element", type_id))?;
                expr = format!("{}[{}]", expr, self.to_expression(index)?);
                let et = self.ir.get_type(elem)?;
                if packed && ty.array.len() == 1 && !et.is_struct() && et.columns == 1 && et.vecsize <= 2 {
                    // Stored widened to four components.
                    expr.push_str(if et.vecsize == 1 { ".x" } else { ".xy" });
                    packed = false;
                }
                type_id = elem;
            } else if ty.is_struct() {
                let member = self.ir.constant_u32(index)?;
                let struct_id = ty.base_id;
                expr = format!("{}.{}", expr, self.member_name(struct_id, member));
                packed = self.ir.is_member_packed(struct_id, member);
                row_major = self.ir.has_member_decoration(struct_id, member, Decoration::RowMajor);
                type_id = *ty
                    .member_types
                    .get(member as usize)
                    .ok_or_else(|| err_internal!("struct {} has no member {}", struct_id, member))?;
            } else if ty.is_matrix() || ty.is_vector() {
                let literal = self
                    .ir
                    .maybe_constant(index)
                    .filter(|c| !c.specialization)
                    .and_then(|c| c.scalar_u32());
                expr = match literal {
                    Some(i) if ty.is_vector() && !ty.is_matrix() => format!("{}.{}", expr, swizzle_letter(i)),
                    _ => format!("{}[{}]", expr, self.to_expression(index)?),
                };
                row_major = false;
                type_id = ty.parent_type.ok_or_else(|| err_internal!("type {} has no component type", type_id))?;
            } else {
                bail_internal!("access chain indexes into scalar type {}", type_id);
            }
        }

        trace!("access chain {} -> {}", rid, expr);
        self.state.expressions.insert(rid, expr);
        if let Some(var) = self.backing_variable(base) {
            self.state.backing.insert(rid, var);
        }
        let final_type = self.ir.get_type(type_id)?;
        if packed && final_type.vecsize > 1 {
            self.state.packed.insert(rid);
        }
        if row_major && final_type.is_matrix() {
            self.state.row_major.insert(rid);
        }
        Ok(())
    }

    fn emit_function_call(&mut self, inst: &Instruction) -> Result<()> {
        need(inst, 3)?;
        let (rt, rid, func) = (inst.ops[0], inst.ops[1], inst.ops[2]);
        let args = &inst.ops[3..];
        let params = self.ir.get_function(func)?.parameters.clone();

        let mut exprs = Vec::new();
        for (i, param) in params.iter().enumerate() {
            let value = if !param.alias_global_variable {
                *args
                    .get(i)
                    .ok_or_else(|| err_internal!("call to {} passes too few arguments", func))?
            } else {
                match self.ir.get_variable(param.id)?.base_variable {
                    Some(global) => global,
                    None => {
                        let builtin = self
                            .ir
                            .builtin(param.id)
                            .ok_or_else(|| err_internal!("parameter {} aliases nothing", param.id))?;
                        let storage = self.ir.get_type(param.type_id)?.storage;
                        exprs.push(self.builtin_to_msl(builtin, storage)?);
                        continue;
                    }
                }
            };
            exprs.push(self.to_expression(value)?);
            let (_, ty) = self.ir.pointee_type(param.type_id)?;
            if ty.basetype == BaseType::SampledImage && ty.dim() != Some(rspirv::spirv::Dim::DimBuffer) {
                exprs.push(self.to_sampler_expression(value)?);
            }
            if self.needs_swizzle_argument(param.type_id)? {
                exprs.push(self.to_swizzle_expression(value)?);
            }
        }

        let call = format!("{}({})", self.plain_name(func), exprs.join(", "));
        if self.ir.get_type(rt)?.basetype == BaseType::Void {
            self.statement(format!("{};", call));
            return Ok(());
        }
        self.emit_op(rt, rid, call)
    }

    // -------------------------------------------------------------------------
    // Values
    // -------------------------------------------------------------------------

    fn emit_value_op(&mut self, inst: &Instruction) -> Result<()> {
        let op = inst.op;
        need(inst, 3)?;
        let (rt, rid) = (inst.ops[0], inst.ops[1]);

        if let Some((symbol, signedness)) = binary_operator(op) {
            need(inst, 4)?;
            return self.emit_integer_binary(inst, symbol, signedness);
        }
        if let Some(symbol) = ordered_operator(op) {
            need(inst, 4)?;
            let expr = format!(
                "({} {} {})",
                self.to_expression(inst.ops[2])?,
                symbol,
                self.to_expression(inst.ops[3])?
            );
            return self.emit_op(rt, rid, expr);
        }
        if let Some(symbol) = unordered_operator(op) {
            need(inst, 4)?;
            let (a, b) = (self.to_expression(inst.ops[2])?, self.to_expression(inst.ops[3])?);
            let expr = format!("(isnan({a}) || isnan({b}) || ({a} {s} {b}))", a = a, b = b, s = symbol);
            return self.emit_op(rt, rid, expr);
        }
        if let Some(name) = unary_function(op) {
            let expr = self.call_expression(name, &inst.ops[2..3])?;
            return self.emit_op(rt, rid, expr);
        }

        match op {
            Op::FNegate | Op::SNegate => {
                let expr = format!("-{}", enclose(&self.to_expression(inst.ops[2])?));
                self.emit_op(rt, rid, expr)
            }
            Op::Not => {
                let expr = format!("~{}", enclose(&self.to_expression(inst.ops[2])?));
                self.emit_op(rt, rid, expr)
            }
            Op::LogicalNot => {
                let expr = format!("!{}", enclose(&self.to_expression(inst.ops[2])?));
                self.emit_op(rt, rid, expr)
            }
            Op::FRem => {
                need(inst, 4)?;
                let expr = self.call_expression("fmod", &inst.ops[2..4])?;
                self.emit_op(rt, rid, expr)
            }
            Op::FMod => {
                need(inst, 4)?;
                let expr = self.call_expression("mod", &inst.ops[2..4])?;
                self.emit_op(rt, rid, expr)
            }
            Op::Dot => {
                need(inst, 4)?;
                let expr = self.call_expression("dot", &inst.ops[2..4])?;
                self.emit_op(rt, rid, expr)
            }
            Op::MatrixTimesVector | Op::VectorTimesMatrix => self.emit_matrix_vector(inst),
            Op::OuterProduct => {
                need(inst, 4)?;
                let (a, b) = (self.to_expression(inst.ops[2])?, self.to_expression(inst.ops[3])?);
                let columns = self.ir.get_type(rt)?.columns;
                let cols: Vec<String> = (0..columns)
                    .map(|c| format!("{} * {}.{}", a, enclose(&b), swizzle_letter(c)))
                    .collect();
                let expr = format!("{}({})", self.type_name(rt)?, cols.join(", "));
                self.emit_op(rt, rid, expr)
            }
            Op::Select => {
                need(inst, 5)?;
                let (c, a, b) = (inst.ops[2], inst.ops[3], inst.ops[4]);
                let cond_vector = self.ir.expression_type(c)?.vecsize > 1;
                let expr = if cond_vector {
                    format!(
                        "select({}, {}, {})",
                        self.to_expression(b)?,
                        self.to_expression(a)?,
                        self.to_expression(c)?
                    )
                } else {
                    format!(
                        "({} ? {} : {})",
                        self.to_expression(c)?,
                        self.to_expression(a)?,
                        self.to_expression(b)?
                    )
                };
                self.emit_op(rt, rid, expr)
            }
            Op::ConvertFToU | Op::ConvertFToS | Op::FConvert => {
                let expr = format!("{}({})", self.type_name(rt)?, self.to_expression(inst.ops[2])?);
                self.emit_op(rt, rid, expr)
            }
            Op::ConvertSToF | Op::SConvert => {
                let expr = format!("{}({})", self.type_name(rt)?, self.operand_with_signedness(inst.ops[2], true)?);
                self.emit_op(rt, rid, expr)
            }
            Op::ConvertUToF | Op::UConvert => {
                let expr = format!("{}({})", self.type_name(rt)?, self.operand_with_signedness(inst.ops[2], false)?);
                self.emit_op(rt, rid, expr)
            }
            Op::Bitcast => {
                let expr = format!("as_type<{}>({})", self.type_name(rt)?, self.to_expression(inst.ops[2])?);
                self.emit_op(rt, rid, expr)
            }
            Op::QuantizeToF16 => {
                let vecsize = self.ir.get_type(rt)?.vecsize;
                let expr = format!(
                    "{}({}({}))",
                    self.type_name(rt)?,
                    numeric_type_name(BaseType::Half, vecsize, 1)?,
                    self.to_expression(inst.ops[2])?
                );
                self.emit_op(rt, rid, expr)
            }
            Op::BitFieldInsert => {
                need(inst, 6)?;
                let expr = format!(
                    "insert_bits({}, {}, {}, {})",
                    self.to_expression(inst.ops[2])?,
                    self.to_expression(inst.ops[3])?,
                    self.operand_with_signedness(inst.ops[4], false)?,
                    self.operand_with_signedness(inst.ops[5], false)?
                );
                self.emit_op(rt, rid, expr)
            }
            Op::BitFieldSExtract | Op::BitFieldUExtract => {
                need(inst, 5)?;
                let expr = format!(
                    "extract_bits({}, {}, {})",
                    self.to_expression(inst.ops[2])?,
                    self.operand_with_signedness(inst.ops[3], false)?,
                    self.operand_with_signedness(inst.ops[4], false)?
                );
                self.emit_op(rt, rid, expr)
            }
            Op::CompositeConstruct => self.emit_composite_construct(inst),
            Op::CompositeExtract => {
                need(inst, 3)?;
                let composite = inst.ops[2];
                let base = enclose(&self.to_expression(composite)?);
                let type_id = self
                    .ir
                    .type_of(composite)
                    .ok_or_else(|| err_internal!("composite {} has no type", composite))?;
                let path = self.literal_path(type_id, &inst.ops[3..])?;
                self.emit_op(rt, rid, format!("{}{}", base, path))
            }
            Op::CompositeInsert => {
                need(inst, 4)?;
                let (object, composite) = (inst.ops[2], inst.ops[3]);
                if self.ir.get_type(rt)?.is_array() {
                    bail_unsupported!("Inserting into array values is not supported.");
                }
                let path = self.literal_path(rt, &inst.ops[4..])?;
                let source = self.to_expression(composite)?;
                let value = self.to_expression(object)?;
                self.emit_op(rt, rid, source)?;
                self.statement(format!("_{}{} = {};", rid, path, value));
                Ok(())
            }
            Op::VectorShuffle => self.emit_vector_shuffle(inst),
            Op::VectorExtractDynamic => {
                need(inst, 4)?;
                let expr = format!(
                    "{}[{}]",
                    enclose(&self.to_expression(inst.ops[2])?),
                    self.to_expression(inst.ops[3])?
                );
                self.emit_op(rt, rid, expr)
            }
            Op::VectorInsertDynamic => {
                need(inst, 5)?;
                let source = self.to_expression(inst.ops[2])?;
                let value = self.to_expression(inst.ops[3])?;
                let index = self.to_expression(inst.ops[4])?;
                self.emit_op(rt, rid, source)?;
                self.statement(format!("_{}[{}] = {};", rid, index, value));
                Ok(())
            }
            Op::ArrayLength => bail_unsupported!("Runtime array length queries are not supported in MSL."),
            other => bail_unsupported!("Instruction {:?} is not supported in MSL.", other),
        }
    }

    /// Integer and logical binary operators. Sign-sensitive operators cast
    /// their operands, and the result when its type differs in signedness.
    fn emit_integer_binary(&mut self, inst: &Instruction, symbol: &str, signedness: Option<bool>) -> Result<()> {
        let (rt, rid, a, b) = (inst.ops[0], inst.ops[1], inst.ops[2], inst.ops[3]);
        let rt_type = self.ir.get_type(rt)?.clone();
        let is_compare = rt_type.basetype == BaseType::Boolean;
        let is_shift = matches!(
            inst.op,
            Op::ShiftLeftLogical | Op::ShiftRightLogical | Op::ShiftRightArithmetic
        );

        let signed = signedness.or_else(|| {
            (!is_compare && rt_type.basetype.is_integer()).then(|| rt_type.basetype.is_signed())
        });
        let (lhs, rhs) = match signed {
            Some(s) => (
                self.operand_with_signedness(a, s)?,
                if is_shift {
                    self.to_expression(b)?
                } else {
                    self.operand_with_signedness(b, s)?
                },
            ),
            None => {
                // Equality between mixed-sign integers compares the bits.
                let a_type = self.ir.expression_type(a)?;
                let lhs_signed = a_type.basetype.is_signed();
                let rhs = if a_type.basetype.is_integer() {
                    self.operand_with_signedness(b, lhs_signed)?
                } else {
                    self.to_expression(b)?
                };
                (self.to_expression(a)?, rhs)
            }
        };

        let mut expr = format!("({} {} {})", lhs, symbol, rhs);
        if let Some(s) = signed {
            if !is_compare && rt_type.basetype.is_integer() && rt_type.basetype.is_signed() != s {
                expr = format!("{}({})", self.type_name(rt)?, expr);
            }
        }
        self.emit_op(rt, rid, expr)
    }

    fn emit_matrix_vector(&mut self, inst: &Instruction) -> Result<()> {
        need(inst, 4)?;
        let (rt, rid, a, b) = (inst.ops[0], inst.ops[1], inst.ops[2], inst.ops[3]);
        let (matrix, vector, matrix_first) = if inst.op == Op::MatrixTimesVector {
            (a, b, true)
        } else {
            (b, a, false)
        };
        // M^T * v == v * M, so a transposed load multiplies its raw value
        // with the operands swapped.
        let expr = match self.state.transposed.get(&matrix).cloned() {
            Some(raw) if matrix_first => format!("({} * {})", self.to_expression(vector)?, raw),
            Some(raw) => format!("({} * {})", raw, self.to_expression(vector)?),
            None if matrix_first => format!("({} * {})", self.to_expression(matrix)?, self.to_expression(vector)?),
            None => format!("({} * {})", self.to_expression(vector)?, self.to_expression(matrix)?),
        };
        self.emit_op(rt, rid, expr)
    }

    /// `.member`, `.x` or `[i]` for each literal index into `type_id`.
    fn literal_path(&self, type_id: Id, indices: &[u32]) -> Result<String> {
        let mut path = String::new();
        let mut type_id = type_id;
        for &index in indices {
            let ty = self.ir.get_type(type_id)?;
            if ty.is_struct() && !ty.is_array() {
                path.push('.');
                path.push_str(&self.member_name(ty.base_id, index));
                type_id = *ty
                    .member_types
                    .get(index as usize)
                    .ok_or_else(|| err_internal!("struct {} has no member {}", type_id, index))?;
                continue;
            }
            if ty.is_vector() && !ty.is_matrix() && !ty.is_array() {
                path.push('.');
                path.push(swizzle_letter(index));
            } else {
                path.push_str(&format!("[{}]", index));
            }
            type_id = ty.parent_type.ok_or_else(|| err_internal!("type {} has no element type", type_id))?;
        }
        Ok(path)
    }

    fn emit_composite_construct(&mut self, inst: &Instruction) -> Result<()> {
        let (rt, rid) = (inst.ops[0], inst.ops[1]);
        let parts = &inst.ops[2..];
        let ty = self.ir.get_type(rt)?.clone();
        let exprs = parts
            .iter()
            .map(|&p| self.to_expression(p))
            .collect::<Result<Vec<_>>>()?;

        if ty.is_array() {
            let elem = self.ir.get_type(ty.parent_type.unwrap_or(rt))?;
            if elem.is_array() {
                let dims = elem.array.len();
                let name = self.declare_temporary(rt, rid)?;
                for (i, part) in exprs.iter().enumerate() {
                    self.statement(format!("spvArrayCopyFromStack{}({}[{}], {});", dims, name, i, part));
                }
                return Ok(());
            }
            let name = format!("_{}", rid);
            self.statement(format!("{} = {{ {} }};", self.variable_decl(rt, &name)?, exprs.join(", ")));
            self.state.expressions.insert(rid, name);
            return Ok(());
        }

        let expr = if ty.is_struct() {
            format!("{}{{ {} }}", self.type_name(rt)?, exprs.join(", "))
        } else if exprs.len() == 1 && ty.vecsize == 1 && ty.columns == 1 {
            exprs[0].clone()
        } else {
            format!("{}({})", self.type_name(rt)?, exprs.join(", "))
        };
        self.emit_op(rt, rid, expr)
    }

    fn emit_vector_shuffle(&mut self, inst: &Instruction) -> Result<()> {
        need(inst, 4)?;
        let (rt, rid, v1, v2) = (inst.ops[0], inst.ops[1], inst.ops[2], inst.ops[3]);
        let components = &inst.ops[4..];
        let n1 = self.ir.expression_type(v1)?.vecsize;
        let (e1, e2) = (enclose(&self.to_expression(v1)?), enclose(&self.to_expression(v2)?));

        let undefined = |c: u32| c == u32::MAX;
        let expr = if components.iter().all(|&c| undefined(c) || c < n1) {
            let swizzle: String = components
                .iter()
                .map(|&c| swizzle_letter(if undefined(c) { 0 } else { c }))
                .collect();
            format!("{}.{}", e1, swizzle)
        } else if components.iter().all(|&c| undefined(c) || c >= n1) {
            let swizzle: String = components
                .iter()
                .map(|&c| swizzle_letter(if undefined(c) { 0 } else { c - n1 }))
                .collect();
            format!("{}.{}", e2, swizzle)
        } else {
            let parts: Vec<String> = components
                .iter()
                .map(|&c| {
                    if undefined(c) || c < n1 {
                        format!("{}.{}", e1, swizzle_letter(if undefined(c) { 0 } else { c }))
                    } else {
                        format!("{}.{}", e2, swizzle_letter(c - n1))
                    }
                })
                .collect();
            format!("{}({})", self.type_name(rt)?, parts.join(", "))
        };
        self.emit_op(rt, rid, expr)
    }

    // -------------------------------------------------------------------------
    // GLSL.std.450
    // -------------------------------------------------------------------------

    fn emit_ext_inst(&mut self, inst: &Instruction) -> Result<()> {
        need(inst, 4)?;
        let (rt, rid, set, number) = (inst.ops[0], inst.ops[1], inst.ops[2], inst.ops[3]);
        let args = &inst.ops[4..];
        if self.ir.ext_inst_set(set) != Some(ExtInstSet::GlslStd450) {
            bail_unsupported!("Extended instruction set {} is not supported.", set);
        }
        let Some(op) = GLOp::from_u32(number) else {
            bail_unsupported!("Unknown GLSL.std.450 instruction {}.", number);
        };
        let arg_scalar = match args.first() {
            Some(&a) => {
                let ty = self.ir.expression_type(a)?;
                ty.vecsize == 1 && ty.columns == 1
            }
            None => false,
        };

        let expr = match op {
            GLOp::Length if arg_scalar => self.call_expression("abs", args)?,
            GLOp::Normalize if arg_scalar => self.call_expression("sign", args)?,
            GLOp::Distance if arg_scalar => {
                need(inst, 6)?;
                format!(
                    "abs({} - {})",
                    self.to_expression(args[0])?,
                    enclose(&self.to_expression(args[1])?)
                )
            }
            GLOp::MatrixInverse => {
                let columns = self.ir.get_type(rt)?.columns;
                if HelperTag::inverse(columns).is_none() {
                    bail_unsupported!("Inverse of a {}x{} matrix is not supported.", columns, columns);
                }
                self.call_expression(&format!("spvInverse{}x{}", columns, columns), args)?
            }
            GLOp::PackHalf2x16 => format!("as_type<uint>(half2({}))", self.to_expression(args[0])?),
            GLOp::UnpackHalf2x16 => format!("float2(as_type<half2>({}))", self.to_expression(args[0])?),
            GLOp::FindUMsb | GLOp::FindSMsb | GLOp::SAbs | GLOp::SMin | GLOp::SMax | GLOp::SClamp
            | GLOp::UMin | GLOp::UMax | GLOp::UClamp => {
                let Some((name, signed)) = glsl_integer_function(op) else {
                    bail_internal!("{:?} has no integer mapping", op);
                };
                let parts = args
                    .iter()
                    .map(|&a| self.operand_with_signedness(a, signed))
                    .collect::<Result<Vec<_>>>()?;
                let expr = format!("{}({})", name, parts.join(", "));
                let rt_type = self.ir.get_type(rt)?;
                if rt_type.basetype.is_integer() && rt_type.basetype.is_signed() != signed {
                    format!("{}({})", self.type_name(rt)?, expr)
                } else {
                    expr
                }
            }
            _ => match glsl_function(op) {
                Some(name) => self.call_expression(name, args)?,
                None => bail_unsupported!("GLSL.std.450 instruction {:?} is not supported in MSL.", op),
            },
        };
        self.emit_op(rt, rid, expr)
    }

    // -------------------------------------------------------------------------
    // Synchronization
    // -------------------------------------------------------------------------

    fn emit_barrier(&mut self, execution_scope: Option<Id>, memory_scope: Id, semantics: Id) -> Result<()> {
        if !matches!(
            self.model,
            rspirv::spirv::ExecutionModel::GLCompute | rspirv::spirv::ExecutionModel::Kernel
        ) {
            return Ok(());
        }
        let semantics = self.ir.constant_u32(semantics)?;
        let flags = if semantics & SEMANTICS_CROSS_WORKGROUP != 0 {
            "mem_device"
        } else if semantics & (SEMANTICS_SUBGROUP | SEMANTICS_WORKGROUP | SEMANTICS_ATOMIC_COUNTER) != 0 {
            "mem_threadgroup"
        } else if semantics & SEMANTICS_IMAGE != 0 {
            "mem_texture"
        } else {
            "mem_none"
        };

        let mut barrier = format!("threadgroup_barrier(mem_flags::{}", flags);
        if self.options.is_ios() && self.options.supports_msl_version(2, 0) {
            let execution = match execution_scope {
                Some(id) => self.ir.constant_u32(id)?,
                None => SCOPE_INVOCATION,
            };
            let scope = execution.min(self.ir.constant_u32(memory_scope)?);
            barrier.push_str(match scope {
                SCOPE_CROSS_DEVICE | SCOPE_DEVICE => ", memory_scope_device",
                SCOPE_SUBGROUP | SCOPE_INVOCATION => ", memory_scope_simdgroup",
                _ => ", memory_scope_threadgroup",
            });
        }
        barrier.push_str(");");
        self.statement(barrier);
        Ok(())
    }

    fn emit_atomic(&mut self, inst: &Instruction) -> Result<()> {
        let op = inst.op;
        if op == Op::AtomicCompareExchangeWeak {
            bail_unsupported!("AtomicCompareExchangeWeak is not supported in MSL.");
        }
        let ptr = atomic_pointer(inst).ok_or_else(|| err_internal!("{:?} without pointer operand", op))?;
        let space = self.pointer_address_space(ptr)?;
        let pointer = self
            .ir
            .type_of(ptr)
            .ok_or_else(|| err_internal!("atomic pointer {} has no type", ptr))?;
        let value_name = numeric_type_name(self.ir.pointee_type(pointer)?.1.basetype, 1, 1)?;
        let target = format!(
            "(volatile {} atomic_{}*)&{}",
            space,
            value_name,
            enclose(&self.to_expression(ptr)?)
        );

        if op == Op::AtomicStore {
            need(inst, 4)?;
            let value = self.to_expression(inst.ops[3])?;
            self.statement(format!("atomic_store_explicit({}, {}, {});", target, value, MEMORY_ORDER));
            return Ok(());
        }

        let (rt, rid) = (inst.ops[0], inst.ops[1]);
        let call = |name: &str, operand: Option<String>| match operand {
            Some(operand) => format!("{}({}, {}, {})", name, target, operand, MEMORY_ORDER),
            None => format!("{}({}, {})", name, target, MEMORY_ORDER),
        };
        let expr = match op {
            Op::AtomicLoad => call("atomic_load_explicit", None),
            Op::AtomicIIncrement => call("atomic_fetch_add_explicit", Some("1".to_string())),
            Op::AtomicIDecrement => call("atomic_fetch_sub_explicit", Some("1".to_string())),
            Op::AtomicCompareExchange => {
                need(inst, 8)?;
                let value = self.to_expression(inst.ops[6])?;
                let comparator = self.to_expression(inst.ops[7])?;
                let name = self.declare_temporary(rt, rid)?;
                // The weak exchange may fail spuriously; retry only while the
                // observed value still equals the comparator.
                self.statement("do");
                self.begin_scope();
                self.statement(format!("{} = {};", name, comparator));
                self.state.indent = self.state.indent.saturating_sub(1);
                self.statement(format!(
                    "}} while (!atomic_compare_exchange_weak_explicit({}, &{}, {}, {o}, {o}) && {} == {});",
                    target,
                    name,
                    value,
                    name,
                    comparator,
                    o = MEMORY_ORDER
                ));
                return Ok(());
            }
            _ => {
                need(inst, 6)?;
                let name = match op {
                    Op::AtomicExchange => "atomic_exchange_explicit",
                    Op::AtomicIAdd => "atomic_fetch_add_explicit",
                    Op::AtomicISub => "atomic_fetch_sub_explicit",
                    Op::AtomicSMin | Op::AtomicUMin => "atomic_fetch_min_explicit",
                    Op::AtomicSMax | Op::AtomicUMax => "atomic_fetch_max_explicit",
                    Op::AtomicAnd => "atomic_fetch_and_explicit",
                    Op::AtomicOr => "atomic_fetch_or_explicit",
                    Op::AtomicXor => "atomic_fetch_xor_explicit",
                    other => bail_unsupported!("Atomic {:?} is not supported in MSL.", other),
                };
                call(name, Some(self.to_expression(inst.ops[5])?))
            }
        };
        self.emit_op(rt, rid, expr)
    }
}
