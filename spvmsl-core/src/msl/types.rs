//! Type spelling, address spaces and declarations.

use rspirv::spirv::{AccessQualifier, Decoration, Dim, StorageClass};

use crate::error::Result;
use crate::ir::{ArraySize, BaseType, Id, Parameter, Type};
use crate::{bail_internal, bail_unsupported};

use super::layout::array_size_literal;
use super::CompilerMsl;

pub(crate) fn scalar_type_name(basetype: BaseType) -> Option<&'static str> {
    Some(match basetype {
        BaseType::Boolean => "bool",
        BaseType::SByte => "char",
        BaseType::UByte => "uchar",
        BaseType::Short => "short",
        BaseType::UShort => "ushort",
        BaseType::Int => "int",
        BaseType::UInt => "uint",
        BaseType::Int64 => "long",
        BaseType::UInt64 => "size_t",
        BaseType::Half => "half",
        BaseType::Float => "float",
        BaseType::Double => "double",
        _ => return None,
    })
}

/// `float`, `uint3`, `half2x4`, ... for a numeric shape.
pub(crate) fn numeric_type_name(basetype: BaseType, vecsize: u32, columns: u32) -> Result<String> {
    let Some(scalar) = scalar_type_name(basetype) else {
        bail_internal!("{:?} is not a numeric type", basetype);
    };
    Ok(if columns > 1 {
        format!("{}{}x{}", scalar, columns, vecsize)
    } else if vecsize > 1 {
        format!("{}{}", scalar, vecsize)
    } else {
        scalar.to_string()
    })
}

impl CompilerMsl {
    pub(crate) fn type_name(&self, type_id: Id) -> Result<String> {
        self.type_name_for(type_id, None)
    }

    /// Type name of `type_id`; `var` resolves image access qualifiers that
    /// live on the variable.
    pub(crate) fn type_name_for(&self, type_id: Id, var: Option<Id>) -> Result<String> {
        let ty = self.ir.get_type(type_id)?;

        if ty.pointer {
            let Some(pointee) = ty.parent_type else {
                bail_internal!("pointer type {} without pointee", type_id);
            };
            let inner = self.type_name_for(pointee, var)?;
            return Ok(if ty.is_opaque() {
                inner
            } else {
                format!("{} {}*", self.type_address_space(ty), inner)
            });
        }

        if ty.is_array() && ty.is_opaque() {
            return self.opaque_array_type_name(ty, var);
        }

        match ty.basetype {
            BaseType::Struct => Ok(self.plain_name(ty.base_id)),
            BaseType::Image | BaseType::SampledImage => self.image_type_name(ty, var),
            BaseType::Sampler => Ok("sampler".to_string()),
            BaseType::Void => Ok("void".to_string()),
            basetype => numeric_type_name(basetype, ty.vecsize, ty.columns),
        }
    }

    /// `array<T, N>` for arrays of textures and samplers.
    fn opaque_array_type_name(&self, ty: &Type, var: Option<Id>) -> Result<String> {
        let ios = self.options.is_ios();
        let supported = if ios {
            self.options.supports_msl_version(1, 2)
        } else {
            self.options.supports_msl_version(2, 0)
        };
        if !supported {
            bail_unsupported!(
                "MSL {} or greater is required for arrays of textures.",
                if ios { "1.2" } else { "2.0" }
            );
        }
        if ty.array.len() > 1 {
            bail_unsupported!("Arrays of arrays of textures are not supported in MSL.");
        }
        let size = array_size_literal(&self.ir, ty.array[0]);
        if size == 0 {
            bail_unsupported!("Unsized array of images is not supported in MSL.");
        }
        let Some(elem) = ty.parent_type else {
            bail_internal!("array type without element type");
        };
        Ok(format!("array<{}, {}>", self.type_name_for(elem, var)?, size))
    }

    fn image_type_name(&self, ty: &Type, var: Option<Id>) -> Result<String> {
        let Some(image) = ty.image.as_ref() else {
            bail_internal!("image type without image info");
        };
        let base_var = var.map(|v| self.base_variable(v));
        let comparison = image.depth || base_var.is_some_and(|v| self.comparison_vars.contains(&v));

        let mut name = if comparison {
            match image.dim {
                Dim::Dim2D if image.ms && image.arrayed => {
                    self.require_ms_array()?;
                    "depth2d_ms_array"
                }
                Dim::Dim2D if image.ms => "depth2d_ms",
                Dim::Dim2D if image.arrayed => "depth2d_array",
                Dim::Dim2D => "depth2d",
                Dim::DimCube if image.arrayed => "depthcube_array",
                Dim::DimCube => "depthcube",
                other => bail_unsupported!("{:?} depth textures are not supported by Metal", other),
            }
        } else {
            match image.dim {
                Dim::Dim1D if image.arrayed => "texture1d_array",
                Dim::Dim1D => "texture1d",
                Dim::Dim2D | Dim::DimBuffer | Dim::DimSubpassData if image.ms && image.arrayed => {
                    self.require_ms_array()?;
                    "texture2d_ms_array"
                }
                Dim::Dim2D | Dim::DimBuffer | Dim::DimSubpassData if image.ms => "texture2d_ms",
                Dim::Dim2D | Dim::DimBuffer | Dim::DimSubpassData if image.arrayed => "texture2d_array",
                Dim::Dim2D | Dim::DimBuffer | Dim::DimSubpassData => "texture2d",
                Dim::Dim3D => "texture3d",
                Dim::DimCube if image.arrayed => "texturecube_array",
                Dim::DimCube => "texturecube",
                other => bail_unsupported!("{:?} textures are not supported by Metal", other),
            }
        }
        .to_string();

        name.push('<');
        name.push_str(&self.type_name(image.sampled_type)?);

        if ty.basetype == BaseType::Image && image.sampled == 2 && image.dim != Dim::DimSubpassData {
            match image.access {
                Some(AccessQualifier::ReadOnly) => name.push_str(", access::read"),
                Some(AccessQualifier::WriteOnly) => name.push_str(", access::write"),
                Some(AccessQualifier::ReadWrite) => name.push_str(", access::read_write"),
                None => {
                    if let Some(v) = base_var {
                        if !self.ir.has_decoration(v, Decoration::NonWritable) {
                            name.push_str(", access::");
                            if !self.ir.has_decoration(v, Decoration::NonReadable) {
                                name.push_str("read_");
                            }
                            name.push_str("write");
                        }
                    }
                }
            }
        }
        name.push('>');
        Ok(name)
    }

    fn require_ms_array(&self) -> Result<()> {
        if !self.options.supports_msl_version(2, 1) {
            bail_unsupported!("Multisampled array textures are supported from 2.1.");
        }
        Ok(())
    }

    /// Global a parameter shadows, or the variable itself.
    pub(crate) fn base_variable(&self, var: Id) -> Id {
        self.ir
            .maybe_variable(var)
            .and_then(|v| v.base_variable)
            .unwrap_or(var)
    }

    /// `[4][2]` for a `T[2][4]` (outermost first). Opaque arrays are spelled
    /// through `array<>` instead.
    pub(crate) fn array_suffix(&self, ty: &Type) -> String {
        if ty.is_opaque() {
            return String::new();
        }
        let mut out = String::new();
        for size in ty.array.iter().rev() {
            match *size {
                ArraySize::Literal(0) => out.push_str("[1]"),
                ArraySize::Literal(n) => out.push_str(&format!("[{}]", n)),
                ArraySize::SpecConstant(id) => out.push_str(&format!("[{}]", self.plain_name(id))),
            }
        }
        out
    }

    /// Total number of elements over all array dimensions.
    pub(crate) fn array_element_count(&self, ty: &Type) -> Result<u32> {
        Ok(ty
            .array
            .iter()
            .map(|&size| array_size_literal(&self.ir, size).max(1))
            .product())
    }

    /// `T name[N]`.
    pub(crate) fn variable_decl(&self, type_id: Id, name: &str) -> Result<String> {
        let (data_id, ty) = self.ir.pointee_type(type_id)?;
        Ok(format!("{} {}{}", self.type_name(data_id)?, name, self.array_suffix(ty)))
    }

    /// Address space a value of this type lives in.
    pub(crate) fn type_address_space(&self, ty: &Type) -> &'static str {
        match ty.storage {
            StorageClass::Workgroup => "threadgroup",
            StorageClass::StorageBuffer => "device",
            StorageClass::Uniform | StorageClass::UniformConstant | StorageClass::PushConstant
                if ty.is_struct() =>
            {
                if self.ir.has_decoration(ty.base_id, Decoration::BufferBlock) {
                    "device"
                } else {
                    "constant"
                }
            }
            StorageClass::Function | StorageClass::Generic => {
                if ty.pointer {
                    "thread"
                } else {
                    ""
                }
            }
            StorageClass::Output if self.capture_output() => "device",
            _ => "thread",
        }
    }

    /// Address space used when a variable is passed as an argument; read-only
    /// buffers become `const device`.
    pub(crate) fn argument_address_space(&self, var: Id) -> Result<&'static str> {
        let var_type = self.ir.get_type(self.ir.get_variable(var)?.type_id)?;
        let space = self.type_address_space(var_type);
        if space == "device" && var_type.storage != StorageClass::Output && self.is_read_only_buffer(var)? {
            return Ok("const device");
        }
        Ok(space)
    }

    /// Buffer variable or block declared NonWritable.
    pub(crate) fn is_read_only_buffer(&self, var: Id) -> Result<bool> {
        let base = self.base_variable(var);
        if self.ir.has_decoration(base, Decoration::NonWritable) {
            return Ok(true);
        }
        let (_, ty) = self.ir.variable_data_type(base)?;
        if !ty.is_struct() {
            return Ok(false);
        }
        let block = ty.base_id;
        let count = self.ir.get_type(block)?.member_types.len() as u32;
        Ok(count > 0 && (0..count).all(|i| self.ir.has_member_decoration(block, i, Decoration::NonWritable)))
    }

    /// Declaration of one function parameter.
    pub(crate) fn argument_decl(&self, param: &Parameter) -> Result<String> {
        let var = self.ir.get_variable(param.id)?;
        let var_type = self.ir.get_type(param.type_id)?;
        let (data_id, ty) = self.ir.pointee_type(param.type_id)?;
        let storage = var_type.storage;
        let is_pointer = var_type.pointer;

        let name = if param.alias_global_variable {
            self.to_name(var.base_variable.unwrap_or(param.id))
        } else {
            self.to_name(param.id)
        };

        let mut constref = !param.alias_global_variable && is_pointer && !self.written_vars.contains(&param.id);
        if ty.is_array() && ty.is_opaque() {
            constref = true;
        }

        let mut decl = String::new();
        if constref {
            decl.push_str("const ");
        }

        let builtin = self.ir.builtin(param.id);
        if let Some(b) = builtin {
            decl.push_str(self.builtin_type_decl(b)?);
        } else if matches!(storage, StorageClass::Uniform | StorageClass::StorageBuffer) && ty.is_array() {
            decl.push_str(&self.type_name_for(data_id, Some(param.id))?);
            decl.push('*');
        } else {
            decl.push_str(&self.type_name_for(data_id, Some(param.id))?);
        }

        let opaque_handle = storage == StorageClass::UniformConstant;
        if builtin.is_none()
            && !opaque_handle
            && !is_pointer
            && matches!(storage, StorageClass::Function | StorageClass::Generic)
        {
            if ty.is_array() {
                decl = format!("thread const {} (&{}){}", decl, name, self.array_suffix(ty));
            } else {
                decl.push(' ');
                decl.push_str(&name);
            }
        } else if ty.is_array() && !ty.is_opaque() {
            decl.push_str(&format!(" (&{}){}", name, self.array_suffix(ty)));
        } else if !opaque_handle {
            decl.push_str("& ");
            decl.push_str(&name);
        } else {
            decl.push(' ');
            decl.push_str(&name);
        }
        Ok(decl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_type_names() {
        assert_eq!(numeric_type_name(BaseType::Float, 1, 1).unwrap(), "float");
        assert_eq!(numeric_type_name(BaseType::UInt, 3, 1).unwrap(), "uint3");
        assert_eq!(numeric_type_name(BaseType::Half, 4, 2).unwrap(), "half2x4");
        assert_eq!(numeric_type_name(BaseType::UInt64, 1, 1).unwrap(), "size_t");
        assert!(numeric_type_name(BaseType::Struct, 1, 1).is_err());
    }
}
