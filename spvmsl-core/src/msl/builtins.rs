//! Builtin naming and implicit builtin synthesis.

use log::debug;
use rspirv::spirv::{BuiltIn, Decoration, Dim, ExecutionMode, ExecutionModel, StorageClass};

use crate::error::Result;
use crate::ir::{ArraySize, BaseType, Id, Record, Type, Variable};
use crate::options::AUX_BUFFER_DESCRIPTOR_SET;
use crate::{bail_internal, bail_unsupported};

use super::CompilerMsl;

/// Member of the aux buffer holding per-texture swizzle constants.
pub(crate) const AUX_SWIZZLE_MEMBER: u32 = 0;

/// GLSL-style spelling of a builtin.
pub(crate) fn builtin_name(builtin: BuiltIn) -> &'static str {
    match builtin {
        BuiltIn::Position => "gl_Position",
        BuiltIn::PointSize => "gl_PointSize",
        BuiltIn::ClipDistance => "gl_ClipDistance",
        BuiltIn::CullDistance => "gl_CullDistance",
        BuiltIn::VertexId => "gl_VertexID",
        BuiltIn::InstanceId => "gl_InstanceID",
        BuiltIn::VertexIndex => "gl_VertexIndex",
        BuiltIn::InstanceIndex => "gl_InstanceIndex",
        BuiltIn::BaseVertex => "gl_BaseVertex",
        BuiltIn::BaseInstance => "gl_BaseInstance",
        BuiltIn::DrawIndex => "gl_DrawID",
        BuiltIn::PrimitiveId => "gl_PrimitiveID",
        BuiltIn::InvocationId => "gl_InvocationID",
        BuiltIn::Layer => "gl_Layer",
        BuiltIn::ViewportIndex => "gl_ViewportIndex",
        BuiltIn::FragCoord => "gl_FragCoord",
        BuiltIn::PointCoord => "gl_PointCoord",
        BuiltIn::FrontFacing => "gl_FrontFacing",
        BuiltIn::SampleId => "gl_SampleID",
        BuiltIn::SamplePosition => "gl_SamplePosition",
        BuiltIn::SampleMask => "gl_SampleMask",
        BuiltIn::FragDepth => "gl_FragDepth",
        BuiltIn::HelperInvocation => "gl_HelperInvocation",
        BuiltIn::NumWorkgroups => "gl_NumWorkGroups",
        BuiltIn::WorkgroupSize => "gl_WorkGroupSize",
        BuiltIn::WorkgroupId => "gl_WorkGroupID",
        BuiltIn::LocalInvocationId => "gl_LocalInvocationID",
        BuiltIn::GlobalInvocationId => "gl_GlobalInvocationID",
        BuiltIn::LocalInvocationIndex => "gl_LocalInvocationIndex",
        _ => "gl_Unsupported",
    }
}

/// Builtins that are fields of the stage output when written in the entry
/// point.
fn is_stage_output_builtin(builtin: BuiltIn) -> bool {
    matches!(
        builtin,
        BuiltIn::Position
            | BuiltIn::PointSize
            | BuiltIn::ClipDistance
            | BuiltIn::CullDistance
            | BuiltIn::Layer
            | BuiltIn::ViewportIndex
            | BuiltIn::FragDepth
            | BuiltIn::SampleMask
    )
}

impl CompilerMsl {
    /// Expression naming a builtin at the current emission point.
    pub(crate) fn builtin_to_msl(&self, builtin: BuiltIn, storage: StorageClass) -> Result<String> {
        match builtin {
            BuiltIn::DrawIndex => bail_unsupported!("DrawIndex is not supported in MSL."),
            BuiltIn::ViewportIndex if !self.options.supports_msl_version(2, 0) => {
                bail_unsupported!("ViewportIndex requires Metal 2.0.")
            }
            _ => {}
        }
        let name = builtin_name(builtin);
        if is_stage_output_builtin(builtin) && storage != StorageClass::Input && self.in_entry_function() {
            if let Some(out) = self.stage_out_var {
                return Ok(format!("{}.{}", self.plain_name(out), name));
            }
        }
        Ok(name.to_string())
    }

    /// Attribute qualifier of a builtin argument or member, without brackets.
    pub(crate) fn builtin_qualifier(&self, builtin: BuiltIn) -> Result<&'static str> {
        let modes = &self.ir.entry_point()?.modes;
        Ok(match builtin {
            BuiltIn::VertexId | BuiltIn::VertexIndex => "vertex_id",
            BuiltIn::BaseVertex => "base_vertex",
            BuiltIn::InstanceId | BuiltIn::InstanceIndex => "instance_id",
            BuiltIn::BaseInstance => "base_instance",
            BuiltIn::DrawIndex => bail_unsupported!("DrawIndex is not supported in MSL."),
            BuiltIn::ClipDistance => "clip_distance",
            BuiltIn::PointSize => "point_size",
            BuiltIn::Position => "position",
            BuiltIn::Layer => "render_target_array_index",
            BuiltIn::ViewportIndex => {
                if !self.options.supports_msl_version(2, 0) {
                    bail_unsupported!("ViewportIndex requires Metal 2.0.");
                }
                "viewport_array_index"
            }
            BuiltIn::FrontFacing => "front_facing",
            BuiltIn::PointCoord => "point_coord",
            BuiltIn::FragCoord => "position",
            BuiltIn::SampleId => "sample_id",
            BuiltIn::SampleMask => "sample_mask",
            BuiltIn::SamplePosition => {
                bail_internal!("Sample position is retrieved by a function in MSL.")
            }
            BuiltIn::FragDepth => {
                if modes.contains(&ExecutionMode::DepthGreater) {
                    "depth(greater)"
                } else if modes.contains(&ExecutionMode::DepthLess) {
                    "depth(less)"
                } else {
                    "depth(any)"
                }
            }
            BuiltIn::GlobalInvocationId => "thread_position_in_grid",
            BuiltIn::WorkgroupId => "threadgroup_position_in_grid",
            BuiltIn::NumWorkgroups => "threadgroups_per_grid",
            BuiltIn::LocalInvocationId => "thread_position_in_threadgroup",
            BuiltIn::LocalInvocationIndex => "thread_index_in_threadgroup",
            other => bail_unsupported!("builtin {:?} has no MSL attribute", other),
        })
    }

    /// Declared type of a builtin argument.
    pub(crate) fn builtin_type_decl(&self, builtin: BuiltIn) -> Result<&'static str> {
        Ok(match builtin {
            BuiltIn::VertexId
            | BuiltIn::VertexIndex
            | BuiltIn::BaseVertex
            | BuiltIn::InstanceId
            | BuiltIn::InstanceIndex
            | BuiltIn::BaseInstance => "uint",
            BuiltIn::DrawIndex => bail_unsupported!("DrawIndex is not supported in MSL."),
            BuiltIn::ClipDistance | BuiltIn::PointSize | BuiltIn::FragDepth => "float",
            BuiltIn::Position | BuiltIn::FragCoord => "float4",
            BuiltIn::Layer | BuiltIn::SampleId | BuiltIn::SampleMask | BuiltIn::LocalInvocationIndex => "uint",
            BuiltIn::ViewportIndex => {
                if !self.options.supports_msl_version(2, 0) {
                    bail_unsupported!("ViewportIndex requires Metal 2.0.");
                }
                "uint"
            }
            BuiltIn::FrontFacing | BuiltIn::HelperInvocation => "bool",
            BuiltIn::PointCoord | BuiltIn::SamplePosition => "float2",
            BuiltIn::GlobalInvocationId
            | BuiltIn::LocalInvocationId
            | BuiltIn::NumWorkgroups
            | BuiltIn::WorkgroupId => "uint3",
            other => bail_unsupported!("builtin {:?} has no MSL type", other),
        })
    }

    /// Builtin inputs passed directly as entry point arguments, in id order.
    pub(crate) fn builtin_input_args(&self) -> Vec<(Id, BuiltIn)> {
        let mut args: Vec<(Id, BuiltIn)> = self
            .ir
            .variables()
            .filter(|(id, v)| v.storage == StorageClass::Input && self.active_vars.contains(id))
            .filter_map(|(id, _)| self.ir.builtin(id).map(|b| (id, b)))
            .filter(|(_, b)| !matches!(b, BuiltIn::SamplePosition | BuiltIn::HelperInvocation))
            .collect();
        args.sort_by_key(|(id, _)| *id);
        args
    }

    /// Mint `type`, `pointer` and `variable` ids for a builtin input that the
    /// generated code needs but the module does not declare.
    fn add_implicit_builtin(&mut self, builtin: BuiltIn, ty: Type) -> Id {
        let base = self.ir.increase_bound_by(3);
        let (type_id, ptr_id, var_id) = (base, base + 1, base + 2);

        let mut ty = ty;
        ty.base_id = type_id;
        let ptr = Type::pointer_to(&ty, type_id, StorageClass::Input);
        self.ir.set(type_id, Record::Type(ty));
        self.ir.set(ptr_id, Record::Type(ptr));
        self.ir.set(
            var_id,
            Record::Variable(Variable {
                type_id: ptr_id,
                storage: StorageClass::Input,
                initializer: None,
                builtin: true,
                base_variable: None,
            }),
        );
        self.ir.set_decoration(var_id, Decoration::BuiltIn, builtin as u32);
        self.ir.set_name(var_id, builtin_name(builtin));
        self.active_vars.insert(var_id);
        self.active_builtins.inputs.insert(builtin);
        debug!("synthesized builtin {:?} as variable {}", builtin, var_id);
        var_id
    }

    /// Find or create the builtin inputs the generated code depends on.
    pub(crate) fn build_implicit_builtins(&mut self) -> Result<()> {
        let need_subpass_input = self.model == ExecutionModel::Fragment && self.uses_subpass_input()?;
        let need_sample_pos = self.active_builtins.inputs.contains(&BuiltIn::SamplePosition);
        let capture = self.capture_output();

        let mut wanted = Vec::new();
        if need_subpass_input {
            wanted.push((BuiltIn::FragCoord, Type::vector(BaseType::Float, 32, 4)));
        }
        if need_sample_pos {
            wanted.push((BuiltIn::SampleId, Type::new(BaseType::UInt, 32)));
        }
        if capture {
            for builtin in [
                BuiltIn::VertexIndex,
                BuiltIn::BaseVertex,
                BuiltIn::InstanceIndex,
                BuiltIn::BaseInstance,
            ] {
                wanted.push((builtin, Type::new(BaseType::UInt, 32)));
            }
        }

        for (id, var) in self.ir.variables() {
            if var.storage != StorageClass::Input {
                continue;
            }
            if let Some(builtin) = self.ir.builtin(id) {
                self.builtin_vars.entry(builtin).or_insert(id);
            }
        }

        for (builtin, ty) in wanted {
            match self.builtin_vars.get(&builtin) {
                Some(&existing) => {
                    self.active_vars.insert(existing);
                    self.active_builtins.inputs.insert(builtin);
                }
                None => {
                    let var = self.add_implicit_builtin(builtin, ty);
                    self.builtin_vars.insert(builtin, var);
                }
            }
        }

        // Builtin inputs keep their builtin names.
        let inputs: Vec<(Id, BuiltIn)> = self
            .ir
            .variables()
            .filter(|(_, v)| v.storage == StorageClass::Input)
            .filter_map(|(id, _)| self.ir.builtin(id).map(|b| (id, b)))
            .collect();
        for (id, builtin) in inputs {
            self.ir.set_name(id, builtin_name(builtin));
        }

        if self.uses_swizzle {
            self.add_aux_buffer();
        }
        Ok(())
    }

    fn uses_subpass_input(&self) -> Result<bool> {
        for &var in &self.active_vars {
            let (_, ty) = self.ir.variable_data_type(var)?;
            if ty.dim() == Some(Dim::DimSubpassData) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Synthesize `struct spvAux { uint swizzleConst[1]; }` and its buffer
    /// variable `spvAuxBuffer`.
    fn add_aux_buffer(&mut self) {
        let base = self.ir.increase_bound_by(5);
        let (uint_id, array_id, struct_id, ptr_id, var_id) = (base, base + 1, base + 2, base + 3, base + 4);

        let mut uint = Type::new(BaseType::UInt, 32);
        uint.base_id = uint_id;
        let array = Type::array_of(&uint, uint_id, ArraySize::Literal(0));
        let mut block = Type::new(BaseType::Struct, 0);
        block.member_types.push(array_id);
        block.base_id = struct_id;
        let ptr = Type::pointer_to(&block, struct_id, StorageClass::Uniform);

        self.ir.set(uint_id, Record::Type(uint));
        self.ir.set(array_id, Record::Type(array));
        self.ir.set(struct_id, Record::Type(block));
        self.ir.set(ptr_id, Record::Type(ptr));
        self.ir.set(
            var_id,
            Record::Variable(Variable {
                type_id: ptr_id,
                storage: StorageClass::Uniform,
                initializer: None,
                builtin: false,
                base_variable: None,
            }),
        );

        self.ir.set_decoration(array_id, Decoration::ArrayStride, 4);
        self.ir.set_decoration(struct_id, Decoration::Block, 0);
        self.ir.set_name(struct_id, "spvAux");
        self.ir.set_member_name(struct_id, AUX_SWIZZLE_MEMBER, "swizzleConst");
        self.ir.set_member_decoration(struct_id, AUX_SWIZZLE_MEMBER, Decoration::Offset, 0);
        self.ir.set_name(var_id, "spvAuxBuffer");
        self.ir.set_decoration(var_id, Decoration::DescriptorSet, AUX_BUFFER_DESCRIPTOR_SET);
        self.ir.set_decoration(var_id, Decoration::Binding, self.options.aux_buffer_index);

        self.active_vars.insert(var_id);
        self.aux_buffer = Some(var_id);
        debug!("synthesized aux buffer {}", var_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        assert_eq!(builtin_name(BuiltIn::Position), "gl_Position");
        assert_eq!(builtin_name(BuiltIn::VertexIndex), "gl_VertexIndex");
        assert_eq!(builtin_name(BuiltIn::GlobalInvocationId), "gl_GlobalInvocationID");
    }

    #[test]
    fn test_stage_output_builtins() {
        assert!(is_stage_output_builtin(BuiltIn::Position));
        assert!(is_stage_output_builtin(BuiltIn::FragDepth));
        assert!(!is_stage_output_builtin(BuiltIn::FragCoord));
    }
}
