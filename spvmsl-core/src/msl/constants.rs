//! Constants, specialization constants and struct declarations.

use log::trace;
use rspirv::spirv::{BuiltIn, Decoration, Op};

use crate::error::Result;
use crate::ir::{BaseType, ConstantValue, Id, Type};
use crate::{bail_internal, bail_unsupported};

use super::types::numeric_type_name;
use super::CompilerMsl;

const SWIZZLE: [char; 4] = ['x', 'y', 'z', 'w'];

/// Component selector for vector index `index`.
pub(crate) fn swizzle_letter(index: u32) -> char {
    SWIZZLE.get(index as usize).copied().unwrap_or('x')
}

/// Float literal that always reads back as a floating point value.
pub(crate) fn float_literal<F: Into<f64> + std::fmt::Display + Copy>(value: F) -> String {
    let wide: f64 = value.into();
    if wide.is_nan() {
        return "(0.0 / 0.0)".to_string();
    }
    if wide.is_infinite() {
        return if wide > 0.0 { "(1.0 / 0.0)" } else { "(-1.0 / 0.0)" }.to_string();
    }
    let mut text = format!("{}", value);
    if !text.contains('.') && !text.contains('e') {
        text.push_str(".0");
    }
    text
}

/// Literal for a scalar constant held as raw bits.
pub(crate) fn scalar_literal(ty: &Type, bits: u64) -> Result<String> {
    Ok(match ty.basetype {
        BaseType::Boolean => if bits != 0 { "true" } else { "false" }.to_string(),
        BaseType::Float => float_literal(f32::from_bits(bits as u32)),
        BaseType::Double => float_literal(f64::from_bits(bits)),
        BaseType::Half => format!("half({})", float_literal(half_to_f64(bits as u16))),
        BaseType::Int => {
            let v = bits as u32 as i32;
            if v == i32::MIN {
                "(-2147483647 - 1)".to_string()
            } else {
                v.to_string()
            }
        }
        BaseType::UInt => format!("{}u", bits as u32),
        BaseType::Int64 => format!("{}l", bits as i64),
        BaseType::UInt64 => format!("{}ul", bits),
        BaseType::Short => format!("short({})", bits as u16 as i16),
        BaseType::UShort => format!("ushort({})", bits as u16),
        BaseType::SByte => format!("char({})", bits as u8 as i8),
        BaseType::UByte => format!("uchar({})", bits as u8),
        other => bail_internal!("{:?} has no scalar literal", other),
    })
}

fn half_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = ((bits >> 10) & 0x1f) as i32;
    let mantissa = (bits & 0x3ff) as f64;
    match exponent {
        0 => sign * mantissa * 2f64.powi(-24),
        31 if mantissa == 0.0 => sign * f64::INFINITY,
        31 => f64::NAN,
        e => sign * (1.0 + mantissa / 1024.0) * 2f64.powi(e - 15),
    }
}

/// Cast `expr` of integer type `ty` to the same shape with the requested
/// signedness, or return it unchanged when it already matches.
pub(crate) fn signedness_cast(expr: &str, ty: &Type, signed: bool) -> Result<String> {
    if !ty.basetype.is_integer() || ty.basetype.is_signed() == signed {
        return Ok(expr.to_string());
    }
    let name = numeric_type_name(ty.basetype.with_signedness(signed), ty.vecsize, 1)?;
    Ok(format!("{}({})", name, expr))
}

pub(crate) fn binary_operator(op: Op) -> Option<(&'static str, Option<bool>)> {
    Some(match op {
        Op::IAdd => ("+", None),
        Op::ISub => ("-", None),
        Op::IMul => ("*", None),
        Op::UDiv => ("/", Some(false)),
        Op::SDiv => ("/", Some(true)),
        Op::UMod => ("%", Some(false)),
        Op::SRem | Op::SMod => ("%", Some(true)),
        Op::ShiftLeftLogical => ("<<", None),
        Op::ShiftRightLogical => (">>", Some(false)),
        Op::ShiftRightArithmetic => (">>", Some(true)),
        Op::BitwiseOr => ("|", None),
        Op::BitwiseXor => ("^", None),
        Op::BitwiseAnd => ("&", None),
        Op::LogicalOr => ("||", None),
        Op::LogicalAnd => ("&&", None),
        Op::LogicalEqual | Op::IEqual => ("==", None),
        Op::LogicalNotEqual | Op::INotEqual => ("!=", None),
        Op::ULessThan => ("<", Some(false)),
        Op::SLessThan => ("<", Some(true)),
        Op::UGreaterThan => (">", Some(false)),
        Op::SGreaterThan => (">", Some(true)),
        Op::ULessThanEqual => ("<=", Some(false)),
        Op::SLessThanEqual => ("<=", Some(true)),
        Op::UGreaterThanEqual => (">=", Some(false)),
        Op::SGreaterThanEqual => (">=", Some(true)),
        _ => return None,
    })
}

impl CompilerMsl {
    /// Constants that are declared once at module scope and referenced by
    /// name.
    pub(crate) fn is_named_constant(&self, id: Id) -> bool {
        let Some(c) = self.ir.maybe_constant(id) else { return false };
        c.specialization
            || self.is_workgroup_size_constant(id)
            || self.ir.get_type(c.type_id).is_ok_and(|t| t.is_array())
    }

    fn is_workgroup_size_constant(&self, id: Id) -> bool {
        self.ir.builtin(id) == Some(BuiltIn::WorkgroupSize)
    }

    /// Name of a named constant.
    pub(crate) fn constant_name(&self, id: Id) -> String {
        if self.is_workgroup_size_constant(id) {
            return "gl_WorkGroupSize".to_string();
        }
        self.plain_name(id)
    }

    /// A constant as it appears inside an expression.
    pub(crate) fn to_constant_reference(&self, id: Id) -> Result<String> {
        if self.is_named_constant(id) {
            return Ok(self.constant_name(id));
        }
        self.constant_expression(id)
    }

    /// Full value of a constant, arrays spelled out.
    pub(crate) fn constant_expression(&self, id: Id) -> Result<String> {
        let c = self.ir.get_constant(id)?;
        let ty = self.ir.get_type(c.type_id)?;
        match &c.value {
            ConstantValue::Bool(b) => Ok(b.to_string()),
            ConstantValue::Scalar(bits) => scalar_literal(ty, *bits),
            ConstantValue::Null => self.null_expression(c.type_id),
            ConstantValue::Composite(elements) => {
                let mut parts = Vec::with_capacity(elements.len());
                for &element in elements {
                    parts.push(if ty.is_array() {
                        self.constant_element(element)?
                    } else {
                        self.to_constant_reference(element)?
                    });
                }
                if ty.is_array() {
                    return Ok(format!("{{ {} }}", parts.join(", ")));
                }
                if ty.is_struct() {
                    return Ok(format!("{}{{ {} }}", self.type_name(c.type_id)?, parts.join(", ")));
                }
                let splat = parts.len() > 1 && !ty.is_matrix() && parts.iter().all(|p| *p == parts[0]);
                if splat {
                    return Ok(format!("{}({})", self.type_name(c.type_id)?, parts[0]));
                }
                Ok(format!("{}({})", self.type_name(c.type_id)?, parts.join(", ")))
            }
            ConstantValue::Op(op, words) => self.constant_op_expression(c.type_id, *op, words),
        }
    }

    /// Array elements are written inline, even when they are arrays.
    fn constant_element(&self, id: Id) -> Result<String> {
        let c = self.ir.get_constant(id)?;
        if c.specialization || self.is_workgroup_size_constant(id) {
            return Ok(self.constant_name(id));
        }
        self.constant_expression(id)
    }

    pub(crate) fn null_expression(&self, type_id: Id) -> Result<String> {
        let ty = self.ir.get_type(type_id)?;
        if ty.is_array() {
            return Ok("{}".to_string());
        }
        if ty.is_struct() || ty.is_matrix() {
            return Ok(format!("{}{{}}", self.type_name(type_id)?));
        }
        let zero = scalar_literal(ty, 0)?;
        if ty.vecsize > 1 {
            return Ok(format!("{}({})", self.type_name(type_id)?, zero));
        }
        Ok(zero)
    }

    fn constant_op_expression(&self, type_id: Id, op: Op, words: &[u32]) -> Result<String> {
        let operand = |i: usize| -> Result<Id> {
            words
                .get(i)
                .copied()
                .ok_or_else(|| crate::err_internal!("specialization constant op {:?} is missing operand {}", op, i))
        };
        if let Some((symbol, signedness)) = binary_operator(op) {
            let (a, b) = (operand(0)?, operand(1)?);
            let mut lhs = self.to_constant_reference(a)?;
            let mut rhs = self.to_constant_reference(b)?;
            if let Some(signed) = signedness {
                lhs = signedness_cast(&lhs, self.ir.expression_type(a)?, signed)?;
                rhs = signedness_cast(&rhs, self.ir.expression_type(b)?, signed)?;
            }
            return Ok(format!("({} {} {})", lhs, symbol, rhs));
        }

        match op {
            Op::SNegate => Ok(format!("(-{})", self.to_constant_reference(operand(0)?)?)),
            Op::Not => Ok(format!("(~{})", self.to_constant_reference(operand(0)?)?)),
            Op::LogicalNot => Ok(format!("(!{})", self.to_constant_reference(operand(0)?)?)),
            Op::Select => Ok(format!(
                "({} ? {} : {})",
                self.to_constant_reference(operand(0)?)?,
                self.to_constant_reference(operand(1)?)?,
                self.to_constant_reference(operand(2)?)?
            )),
            Op::SConvert | Op::UConvert | Op::FConvert => Ok(format!(
                "{}({})",
                self.type_name(type_id)?,
                self.to_constant_reference(operand(0)?)?
            )),
            Op::QuantizeToF16 => Ok(format!("float(half({}))", self.to_constant_reference(operand(0)?)?)),
            Op::CompositeExtract => {
                let composite = operand(0)?;
                let mut expr = self.to_constant_reference(composite)?;
                let mut current = self.ir.expression_type(composite)?.clone();
                for &index in &words[1..] {
                    if current.is_vector() {
                        expr = format!("{}.{}", expr, swizzle_letter(index));
                    } else {
                        expr = format!("{}[{}]", expr, index);
                    }
                    let next = if current.is_struct() && current.array.is_empty() {
                        current.member_types.get(index as usize).copied()
                    } else {
                        current.parent_type
                    };
                    if let Some(next) = next {
                        current = self.ir.get_type(next)?.clone();
                    }
                }
                Ok(expr)
            }
            Op::VectorShuffle => {
                let (a, b) = (operand(0)?, operand(1)?);
                let a_size = self.ir.expression_type(a)?.vecsize;
                let (ea, eb) = (self.to_constant_reference(a)?, self.to_constant_reference(b)?);
                let mut parts = Vec::new();
                for &component in &words[2..] {
                    parts.push(if component < a_size {
                        format!("{}.{}", ea, swizzle_letter(component))
                    } else {
                        format!("{}.{}", eb, swizzle_letter(component - a_size))
                    });
                }
                Ok(format!("{}({})", self.type_name(type_id)?, parts.join(", ")))
            }
            other => bail_unsupported!("Specialization constant operation {:?} is not supported.", other),
        }
    }

    /// Specialization constants and plain structs, in module order.
    pub(crate) fn emit_specialization_constants_and_structs(&mut self) -> Result<()> {
        let mut emitted = false;
        let ids: Vec<Id> = self.ir.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(specialization) = self.ir.maybe_constant(id).map(|c| c.specialization) {
                if self.is_workgroup_size_constant(id) {
                    let value = self.constant_expression(id)?;
                    self.statement(format!("constant uint3 gl_WorkGroupSize = {};", value));
                    emitted = true;
                } else if specialization {
                    self.emit_specialization_constant(id)?;
                    emitted = true;
                }
                continue;
            }

            let Some(ty) = self.ir.maybe_type(id) else { continue };
            let declarable = ty.is_struct()
                && !ty.pointer
                && ty.array.is_empty()
                && ty.base_id == id
                && !self.interface_structs.contains(&id)
                && !self.is_builtin_block_type(id);
            if declarable {
                if emitted {
                    self.statement("");
                }
                emitted = false;
                self.emit_struct(id)?;
            }
        }
        if emitted {
            self.statement("");
        }
        Ok(())
    }

    fn is_builtin_block_type(&self, id: Id) -> bool {
        let is_block = self.ir.has_decoration(id, Decoration::Block) || self.ir.has_decoration(id, Decoration::BufferBlock);
        is_block && self.ir.is_builtin_block(id)
    }

    fn emit_specialization_constant(&mut self, id: Id) -> Result<()> {
        let c = self.ir.get_constant(id)?.clone();
        let type_name = self.type_name(c.type_id)?;
        let name = self.constant_name(id);

        if let ConstantValue::Op(_, words) = &c.value {
            if self.ir.used_as_array_length.contains(&id) && self.depends_on_function_constant(words) {
                bail_unsupported!(
                    "Array length {} depends on a function constant, which MSL cannot use as an array size.",
                    name
                );
            }
            let decl = self.variable_decl(c.type_id, &name)?;
            let value = self.constant_expression(id)?;
            self.statement(format!("constant {} = {};", decl, value));
            return Ok(());
        }

        let value = self.constant_expression(id)?;
        if self.ir.has_decoration(id, Decoration::SpecId) {
            let spec_id = self.ir.get_decoration(id, Decoration::SpecId);
            if self.is_function_constant(id) {
                let tmp = format!("{}_tmp", name);
                self.statement(format!("constant {} {} [[function_constant({})]];", type_name, tmp, spec_id));
                self.statement(format!(
                    "constant {} {} = is_function_constant_defined({}) ? {} : {};",
                    type_name, name, tmp, tmp, value
                ));
            } else {
                let macro_name = format!("SPIRV_CROSS_CONSTANT_ID_{}", spec_id);
                trace!("specialization constant {} falls back to macro {}", id, macro_name);
                self.statement(format!("#ifndef {}", macro_name));
                self.statement(format!("#define {} {}", macro_name, value));
                self.statement("#endif");
                self.statement(format!("constant {} {} = {};", type_name, name, macro_name));
            }
        } else {
            self.statement(format!("constant {} {} = {};", type_name, name, value));
        }
        Ok(())
    }

    /// Function constants need MSL 1.2 and cannot size arrays.
    fn is_function_constant(&self, id: Id) -> bool {
        self.options.supports_msl_version(1, 2)
            && self.ir.has_decoration(id, Decoration::SpecId)
            && !self.ir.used_as_array_length.contains(&id)
    }

    fn depends_on_function_constant(&self, words: &[u32]) -> bool {
        words.iter().any(|&w| {
            self.ir.maybe_constant(w).is_some_and(|c| {
                c.specialization
                    && match &c.value {
                        ConstantValue::Op(_, inner) => self.depends_on_function_constant(inner),
                        _ => self.is_function_constant(w),
                    }
            })
        })
    }

    /// Array constants, lookup tables and undefined values at module scope.
    pub(crate) fn emit_module_constants(&mut self) -> Result<()> {
        let mut emitted = false;

        let arrays: Vec<Id> = self
            .ir
            .constants()
            .filter(|(id, c)| !c.specialization && !self.is_workgroup_size_constant(*id))
            .filter(|(_, c)| self.ir.get_type(c.type_id).is_ok_and(|t| t.is_array()))
            .map(|(id, _)| id)
            .collect();
        for id in arrays {
            let type_id = self.ir.get_constant(id)?.type_id;
            let decl = self.variable_decl(type_id, &self.constant_name(id))?;
            let value = self.constant_expression(id)?;
            self.statement(format!("constant {} = {};", decl, value));
            emitted = true;
        }

        let mut luts: Vec<Id> = self.lut_variables.iter().copied().collect();
        luts.sort_unstable();
        for var in luts {
            let v = self.ir.get_variable(var)?;
            let Some(init) = v.initializer else { continue };
            let decl = self.variable_decl(v.type_id, &self.plain_name(var))?;
            let value = self.constant_expression(init)?;
            self.statement(format!("constant {} = {};", decl, value));
            emitted = true;
        }

        let undefs: Vec<(Id, Id)> = self.ir.undefs().map(|(id, u)| (id, u.type_id)).collect();
        for (id, type_id) in undefs {
            let ty = self.ir.get_type(type_id)?;
            if ty.is_opaque() || ty.pointer || matches!(ty.basetype, BaseType::Void | BaseType::Unknown) {
                continue;
            }
            let decl = self.variable_decl(type_id, &self.plain_name(id))?;
            self.statement(format!("constant {} = {{}};", decl));
            emitted = true;
        }

        if emitted {
            self.statement("");
        }
        Ok(())
    }

    /// `struct Name { ... };` with layout padding and interface attributes.
    pub(crate) fn emit_struct(&mut self, struct_id: Id) -> Result<()> {
        let member_count = self.ir.get_type(struct_id)?.member_types.len() as u32;
        let interface = self.interface_structs.contains(&struct_id);

        self.statement(format!("struct {}", self.plain_name(struct_id)));
        self.begin_scope();
        for index in 0..member_count {
            if !interface && self.ir.member_builtin(struct_id, index).is_some() {
                continue;
            }
            let padding = self.ir.member_decorations(struct_id, index).map(|d| d.padding).unwrap_or(0);
            if padding > 0 {
                self.statement(format!("char _m{}_pad[{}];", index, padding));
            }
            let line = self.struct_member(struct_id, index, interface)?;
            self.statement(line);
        }
        self.end_scope_decl();
        self.statement("");
        Ok(())
    }

    fn struct_member(&mut self, struct_id: Id, index: u32, interface: bool) -> Result<String> {
        let member_type = self.ir.get_type(struct_id)?.member_types[index as usize];
        let mty = self.ir.get_type(member_type)?.clone();
        let name = if interface {
            self.ir.member_name(struct_id, index).to_string()
        } else {
            self.member_name(struct_id, index)
        };

        let mut prefix = "";
        let mut type_name = self.type_name(member_type)?;
        if self.ir.is_member_packed(struct_id, index) {
            if mty.is_struct() {
                bail_unsupported!("Packed struct members are not supported in MSL.");
            } else if mty.vecsize > 1 && mty.columns > 1 {
                let base = if mty.width == 16 { "half" } else { "float" };
                let typedef = format!(
                    "typedef {b}{r}x{c} packed_{b}{c}x{r};",
                    b = base,
                    r = mty.vecsize,
                    c = mty.columns
                );
                self.require_typedef(&typedef);
                prefix = "packed_";
            } else if mty.is_array() && mty.vecsize <= 2 {
                type_name = numeric_type_name(mty.basetype, 4, 1)?;
            } else {
                prefix = "packed_";
            }
        }

        let attribute = if interface {
            self.member_attribute_qualifier(struct_id, index)?
        } else {
            String::new()
        };
        Ok(format!(
            "{}{} {}{}{};",
            prefix,
            type_name,
            name,
            attribute,
            self.array_suffix(&mty)
        ))
    }
}
