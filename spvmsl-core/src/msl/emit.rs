//! Module header, function signatures and entry point plumbing.

use std::collections::HashSet;

use log::{debug, trace};
use rspirv::spirv::{BuiltIn, Dim, ExecutionMode, ExecutionModel, StorageClass};

use crate::error::Result;
use crate::ir::{BaseType, Fixup, Id, Parameter, Record};
use crate::{bail_unsupported, err_internal};

use super::constants::scalar_literal;
use super::layout::array_size_literal;
use super::{CompilerMsl, ResourceKind};

/// Ordering of resource arguments: buffers, textures, samplers.
fn resource_rank(basetype: BaseType) -> u32 {
    match basetype {
        BaseType::Struct => 0,
        BaseType::Image => 1,
        BaseType::SampledImage => 2,
        _ => 3,
    }
}

fn is_resource_storage(storage: StorageClass) -> bool {
    matches!(
        storage,
        StorageClass::Uniform | StorageClass::UniformConstant | StorageClass::PushConstant | StorageClass::StorageBuffer
    )
}

impl CompilerMsl {
    pub(crate) fn emit_header(&mut self) {
        let pragmas: Vec<String> = self.session.pragmas().map(str::to_string).collect();
        for pragma in &pragmas {
            self.statement(pragma);
        }
        if !pragmas.is_empty() {
            self.statement("");
        }

        self.statement("#include <metal_stdlib>");
        self.statement("#include <simd/simd.h>");
        let headers: Vec<String> = self.session.headers().map(str::to_string).collect();
        for header in &headers {
            self.statement(header);
        }
        self.statement("");
        self.statement("using namespace metal;");
        self.statement("");

        let typedefs: Vec<String> = self.session.typedefs().map(str::to_string).collect();
        for typedef in &typedefs {
            self.statement(typedef);
        }
        if !typedefs.is_empty() {
            self.statement("");
        }
    }

    /// Entry point fixups that do not come from the stage interface.
    pub(crate) fn add_entry_fixups(&mut self) -> Result<()> {
        let mut fixups = Vec::new();

        if self.aux_buffer.is_some() {
            let mut images: Vec<Id> = self
                .ir
                .variables()
                .filter(|(id, v)| v.storage == StorageClass::UniformConstant && self.active_vars.contains(id))
                .map(|(id, _)| id)
                .collect();
            images.sort_unstable();
            for var in images {
                let (_, ty) = self.ir.variable_data_type(var)?;
                if matches!(ty.basetype, BaseType::Image | BaseType::SampledImage) {
                    fixups.push(Fixup::BindSwizzleConstant { var });
                }
            }
        }

        if let Some(&var) = self.builtin_vars.get(&BuiltIn::SamplePosition) {
            if self.active_vars.contains(&var) {
                fixups.push(Fixup::ComputeSamplePosition { var });
            }
        }

        debug!("{} entry point fixups added", fixups.len());
        let entry = self.entry;
        self.ir.get_function_mut(entry)?.fixup_in.extend(fixups);
        Ok(())
    }

    pub(crate) fn emit_functions(&mut self) -> Result<()> {
        for func in self.call_graph.order.clone() {
            self.emit_function(func)?;
        }
        Ok(())
    }

    fn emit_function(&mut self, func: Id) -> Result<()> {
        trace!("emitting function {}", func);
        self.state.current_function = Some(func);
        self.dedupe_local_names(func)?;

        let is_entry = func == self.entry;
        let prototype = if is_entry {
            self.entry_prototype()?
        } else {
            self.function_prototype(func)?
        };
        self.statement(prototype);
        self.begin_scope();
        self.emit_local_variables(func)?;
        if is_entry {
            self.emit_buffer_arrays()?;
            let fixups = self.ir.get_function(func)?.fixup_in.clone();
            for fixup in &fixups {
                self.emit_fixup(fixup)?;
            }
        }
        self.emit_function_body(func)?;
        self.end_scope();
        self.statement("");
        self.state.current_function = None;
        Ok(())
    }

    /// Locals and parameters sharing a debug name get their id appended.
    fn dedupe_local_names(&mut self, func: Id) -> Result<()> {
        let f = self.ir.get_function(func)?;
        let ids: Vec<Id> = f
            .parameters
            .iter()
            .filter(|p| !p.alias_global_variable)
            .map(|p| p.id)
            .chain(f.local_variables.iter().copied())
            .collect();
        let mut seen = HashSet::new();
        for id in ids {
            let name = self.ir.name(id).to_string();
            if name.is_empty() || self.ir.qualified_alias(id).is_some() {
                continue;
            }
            if !seen.insert(name.clone()) {
                let renamed = format!("{}_{}", name, id);
                trace!("local {} renamed to {}", id, renamed);
                self.ir.set_name(id, renamed.clone());
                seen.insert(renamed);
            }
        }
        Ok(())
    }

    fn function_prototype(&self, func: Id) -> Result<String> {
        let f = self.ir.get_function(func)?;
        if self.ir.get_type(f.return_type)?.is_array() {
            bail_unsupported!("Functions returning arrays are not supported in MSL.");
        }
        let mut params = Vec::with_capacity(f.parameters.len());
        for param in &f.parameters {
            params.push(self.parameter_decl(param)?);
        }
        Ok(format!(
            "{} {}({})",
            self.type_name(f.return_type)?,
            self.plain_name(func),
            params.join(", ")
        ))
    }

    fn parameter_decl(&self, param: &Parameter) -> Result<String> {
        let mut decl = String::new();
        let space = self.argument_address_space(param.id)?;
        if !space.is_empty() {
            decl.push_str(space);
            decl.push(' ');
        }
        decl.push_str(&self.argument_decl(param)?);

        let (_, ty) = self.ir.pointee_type(param.type_id)?;
        if ty.basetype == BaseType::SampledImage && ty.dim() != Some(Dim::DimBuffer) {
            decl.push_str(&format!(", thread const sampler {}", self.to_sampler_expression(param.id)?));
        }
        if self.needs_swizzle_argument(param.type_id)? {
            decl.push_str(&format!(", constant uint32_t& {}", self.to_swizzle_expression(param.id)?));
        }
        Ok(decl)
    }

    /// Sampled images carry their swizzle constant into callees.
    pub(crate) fn needs_swizzle_argument(&self, type_id: Id) -> Result<bool> {
        if self.aux_buffer.is_none() {
            return Ok(false);
        }
        let (_, ty) = self.ir.pointee_type(type_id)?;
        let sampled = ty.basetype == BaseType::SampledImage
            || (ty.basetype == BaseType::Image && ty.image.as_ref().is_some_and(|i| i.sampled == 1));
        Ok(sampled && ty.dim() != Some(Dim::DimBuffer))
    }

    // -------------------------------------------------------------------------
    // Entry point signature
    // -------------------------------------------------------------------------

    fn struct_name_of(&self, var: Id) -> Result<String> {
        let (struct_id, _) = self.ir.variable_data_type(var)?;
        self.type_name(struct_id)
    }

    /// Whether the entry point returns its output struct.
    pub(crate) fn returns_stage_out(&self) -> bool {
        self.stage_out_var.is_some() && !self.rasterization_disabled
    }

    fn entry_prototype(&mut self) -> Result<String> {
        let qualifier = match self.model {
            ExecutionModel::Vertex => "vertex",
            ExecutionModel::Fragment => {
                if self.ir.entry_point()?.modes.contains(&ExecutionMode::EarlyFragmentTests) {
                    "fragment [[ early_fragment_tests ]]"
                } else {
                    "fragment"
                }
            }
            ExecutionModel::GLCompute | ExecutionModel::Kernel => "kernel",
            other => bail_unsupported!("Execution model {:?} is not supported in MSL.", other),
        };
        let return_type = match self.stage_out_var {
            Some(out) if self.returns_stage_out() => self.struct_name_of(out)?,
            _ => "void".to_string(),
        };
        let args = self.entry_point_args()?;
        Ok(format!("{} {} {}({})", qualifier, return_type, self.entry_name(), args.join(", ")))
    }

    fn entry_point_args(&mut self) -> Result<Vec<String>> {
        let mut args = Vec::new();

        if let Some(ib) = self.stage_in_var {
            args.push(format!("{} {} [[stage_in]]", self.struct_name_of(ib)?, self.plain_name(ib)));
        }

        args.extend(self.resource_args()?);

        for (var, builtin) in self.builtin_input_args() {
            args.push(format!(
                "{} {} [[{}]]",
                self.builtin_type_decl(builtin)?,
                self.plain_name(var),
                self.builtin_qualifier(builtin)?
            ));
        }

        if self.capture_output() {
            if let Some(out) = self.stage_out_var {
                args.push(format!(
                    "device {}* spvOut [[buffer({})]]",
                    self.struct_name_of(out)?,
                    self.options.shader_output_buffer_index
                ));
                args.push(format!(
                    "device uint* spvIndirectParams [[buffer({})]]",
                    self.options.indirect_params_buffer_index
                ));
            }
        }
        Ok(args)
    }

    /// Buffer, texture and sampler arguments of the active resources.
    fn resource_args(&mut self) -> Result<Vec<String>> {
        let mut vars: Vec<Id> = self
            .ir
            .variables()
            .filter(|(id, v)| is_resource_storage(v.storage) && self.active_vars.contains(id))
            .map(|(id, _)| id)
            .collect();
        vars.sort_unstable();

        let mut entries: Vec<(u32, u32, String)> = Vec::new();
        for var in vars {
            let (data_id, ty) = self.ir.variable_data_type(var)?;
            let ty = ty.clone();
            let name = self.plain_name(var);
            let rank = resource_rank(ty.basetype);

            match ty.basetype {
                BaseType::Struct => {
                    if self.ir.get_type(ty.base_id)?.member_types.is_empty() {
                        continue;
                    }
                    let space = self.argument_address_space(var)?;
                    let type_name = self.type_name(ty.base_id)?;
                    let index = self.resource_index(var, ResourceKind::Buffer)?;
                    if ty.is_array() {
                        let count = self.buffer_array_size(var)?;
                        for i in 0..count {
                            entries.push((
                                rank,
                                index + i,
                                format!("{} {}* {}_{} [[buffer({})]]", space, type_name, name, i, index + i),
                            ));
                        }
                    } else {
                        entries.push((rank, index, format!("{} {}& {} [[buffer({})]]", space, type_name, name, index)));
                    }
                }
                BaseType::Image | BaseType::SampledImage => {
                    let index = self.resource_index(var, ResourceKind::Texture)?;
                    entries.push((
                        rank,
                        index,
                        format!("{} {} [[texture({})]]", self.type_name_for(data_id, Some(var))?, name, index),
                    ));
                    if ty.basetype == BaseType::SampledImage && ty.dim() != Some(Dim::DimBuffer) {
                        let sampler = self.resource_index(var, ResourceKind::Sampler)?;
                        let sampler_type = match ty.array.first() {
                            Some(&size) => format!("array<sampler, {}>", array_size_literal(&self.ir, size)),
                            None => "sampler".to_string(),
                        };
                        entries.push((
                            resource_rank(BaseType::Sampler),
                            sampler,
                            format!("{} {}Smplr [[sampler({})]]", sampler_type, name, sampler),
                        ));
                    }
                }
                BaseType::Sampler => {
                    let index = self.resource_index(var, ResourceKind::Sampler)?;
                    entries.push((
                        rank,
                        index,
                        format!("{} {} [[sampler({})]]", self.type_name_for(data_id, Some(var))?, name, index),
                    ));
                }
                _ => {}
            }
        }
        entries.sort_by_key(|&(rank, index, _)| (rank, index));
        Ok(entries.into_iter().map(|(_, _, decl)| decl).collect())
    }

    fn buffer_array_size(&self, var: Id) -> Result<u32> {
        let (_, ty) = self.ir.variable_data_type(var)?;
        if ty.array.len() > 1 {
            bail_unsupported!("Arrays of arrays of buffers are not supported in MSL.");
        }
        let size = array_size_literal(&self.ir, ty.array[0]);
        if size == 0 {
            bail_unsupported!("Unsized arrays of buffers are not supported in MSL.");
        }
        Ok(size)
    }

    /// Buffer variables declared as an array of blocks.
    pub(crate) fn is_buffer_array(&self, var: Id) -> bool {
        let Some(v) = self.ir.maybe_variable(self.base_variable(var)) else {
            return false;
        };
        if !matches!(v.storage, StorageClass::Uniform | StorageClass::StorageBuffer) {
            return false;
        }
        self.ir
            .pointee_type(v.type_id)
            .is_ok_and(|(_, ty)| ty.is_array() && ty.basetype == BaseType::Struct)
    }

    /// Gather the per-element buffer arguments into a local pointer array.
    fn emit_buffer_arrays(&mut self) -> Result<()> {
        let mut vars: Vec<Id> = self
            .ir
            .variables()
            .filter(|(id, v)| v.storage != StorageClass::Function && self.active_vars.contains(id))
            .map(|(id, _)| id)
            .filter(|&id| self.is_buffer_array(id))
            .collect();
        vars.sort_unstable();
        for var in vars {
            let (_, ty) = self.ir.variable_data_type(var)?;
            let type_name = self.type_name(ty.base_id)?;
            let space = self.argument_address_space(var)?;
            let count = self.buffer_array_size(var)?;
            let name = self.plain_name(var);
            self.statement(format!("{} {}* {}[] =", space, type_name, name));
            self.begin_scope();
            for i in 0..count {
                self.statement(format!("{}_{},", name, i));
            }
            self.end_scope_decl();
            self.statement("");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Locals and fixups
    // -------------------------------------------------------------------------

    fn emit_local_variables(&mut self, func: Id) -> Result<()> {
        let locals = self.ir.get_function(func)?.local_variables.clone();
        for var in locals {
            let v = self.ir.get_variable(var)?.clone();
            let (data_id, ty) = self.ir.variable_data_type(var)?;
            if ty.is_opaque() {
                continue;
            }
            let is_array = ty.is_array();
            let name = self.plain_name(var);

            if Some(var) == self.stage_out_var {
                self.statement(format!("{} {} = {{}};", self.type_name(data_id)?, name));
                continue;
            }

            let decl = self.variable_decl(v.type_id, &name)?;
            if v.storage == StorageClass::Workgroup {
                self.statement(format!("threadgroup {};", decl));
                continue;
            }
            match v.initializer {
                Some(init) => {
                    let value = if is_array && self.ir.maybe_constant(init).is_some() {
                        self.constant_expression(init)?
                    } else {
                        self.to_expression(init)?
                    };
                    self.statement(format!("{} = {};", decl, value));
                }
                None => self.statement(format!("{};", decl)),
            }
        }
        Ok(())
    }

    /// Expression and type of `var[.member][[index]]`.
    fn local_element(&self, var: Id, member: Option<u32>, index: Option<u32>) -> Result<(String, Id)> {
        let (mut type_id, _) = self.ir.variable_data_type(var)?;
        let mut expr = self.plain_name(var);
        if let Some(member) = member {
            let ty = self.ir.get_type(type_id)?;
            let struct_id = ty.base_id;
            type_id = *ty
                .member_types
                .get(member as usize)
                .ok_or_else(|| err_internal!("struct {} has no member {}", struct_id, member))?;
            expr = format!("{}.{}", expr, self.member_name(struct_id, member));
        }
        if let Some(index) = index {
            type_id = self
                .ir
                .get_type(type_id)?
                .parent_type
                .ok_or_else(|| err_internal!("type {} cannot be indexed", type_id))?;
            expr = format!("{}[{}]", expr, index);
        }
        Ok((expr, type_id))
    }

    fn interface_member(&self, ib_var: Id, member: u32) -> Result<(String, Id)> {
        let (struct_id, ty) = self.ir.variable_data_type(ib_var)?;
        let type_id = *ty
            .member_types
            .get(member as usize)
            .ok_or_else(|| err_internal!("interface struct {} has no member {}", struct_id, member))?;
        Ok((format!("{}.{}", self.plain_name(ib_var), self.member_name(struct_id, member)), type_id))
    }

    /// `T4(expr, 0.0, ...)` when the target has more components.
    fn widen_vector(&self, expr: String, type_id: Id, components: u32) -> Result<String> {
        let ty = self.ir.get_type(type_id)?;
        if components == 0 || ty.vecsize >= components || ty.columns > 1 {
            return Ok(expr);
        }
        let mut wide = ty.clone();
        wide.vecsize = components;
        let zero = scalar_literal(&wide, 0)?;
        let mut args = vec![expr];
        args.extend((ty.vecsize..components).map(|_| zero.clone()));
        Ok(format!(
            "{}({})",
            super::types::numeric_type_name(ty.basetype, components, 1)?,
            args.join(", ")
        ))
    }

    fn emit_fixup(&mut self, fixup: &Fixup) -> Result<()> {
        match *fixup {
            Fixup::InitializeOutput { var } => {
                if let Some(init) = self.ir.get_variable(var)?.initializer {
                    let value = self.to_expression(init)?;
                    self.statement(format!("{} = {};", self.to_name(var), value));
                }
            }
            Fixup::CopyInToLocal {
                var,
                member,
                index,
                ib_var,
                ib_member,
            } => {
                let (target, target_type) = self.local_element(var, member, index)?;
                let (source, source_type) = self.interface_member(ib_var, ib_member)?;
                let target_name = self.type_name(target_type)?;
                let source = if target_name != self.type_name(source_type)? {
                    format!("{}({})", target_name, source)
                } else {
                    source
                };
                self.statement(format!("{} = {};", target, source));
            }
            Fixup::CopyLocalToOut {
                var,
                member,
                index,
                ib_var,
                ib_member,
                components,
            } => {
                let (source, source_type) = self.local_element(var, member, index)?;
                let (target, _) = self.interface_member(ib_var, ib_member)?;
                let source = self.widen_vector(source, source_type, components)?;
                self.statement(format!("{} = {};", target, source));
            }
            Fixup::PadOutput {
                var,
                ib_var,
                ib_member,
                components,
            } => {
                let (source, source_type) = self.local_element(var, None, None)?;
                let (target, _) = self.interface_member(ib_var, ib_member)?;
                let source = self.widen_vector(source, source_type, components)?;
                self.statement(format!("{} = {};", target, source));
            }
            Fixup::BindCapturedOutput { ib_var } => {
                let builtin = |b: BuiltIn| {
                    self.builtin_vars
                        .get(&b)
                        .map(|&v| self.plain_name(v))
                        .ok_or_else(|| err_internal!("builtin {:?} missing for output capture", b))
                };
                let (vertex, base_vertex) = (builtin(BuiltIn::VertexIndex)?, builtin(BuiltIn::BaseVertex)?);
                let (instance, base_instance) = (builtin(BuiltIn::InstanceIndex)?, builtin(BuiltIn::BaseInstance)?);
                self.statement(format!(
                    "device {}& {} = spvOut[({} - {}) * spvIndirectParams[0] + {} - {}];",
                    self.struct_name_of(ib_var)?,
                    self.plain_name(ib_var),
                    instance,
                    base_instance,
                    vertex,
                    base_vertex
                ));
            }
            Fixup::BindSwizzleConstant { var } => {
                let aux = self.aux_buffer.ok_or_else(|| err_internal!("swizzle constant without aux buffer"))?;
                let index = self.resource_index(var, ResourceKind::Texture)?;
                self.statement(format!(
                    "constant uint32_t& {} = {}.swizzleConst[{}];",
                    self.to_swizzle_expression(var)?,
                    self.plain_name(aux),
                    index
                ));
            }
            Fixup::ComputeSamplePosition { var } => {
                let sample_id = self
                    .builtin_vars
                    .get(&BuiltIn::SampleId)
                    .copied()
                    .ok_or_else(|| err_internal!("sample position without a sample id"))?;
                self.statement(format!(
                    "float2 {} = get_sample_position({});",
                    self.plain_name(var),
                    self.plain_name(sample_id)
                ));
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Returns and expressions
    // -------------------------------------------------------------------------

    /// Emit a return. `at_tail` marks the final statement of the function
    /// body, where a plain `return;` is omitted.
    pub(crate) fn emit_return(&mut self, value: Option<Id>, at_tail: bool) -> Result<()> {
        if !self.in_entry_function() {
            match value {
                Some(value) => {
                    let expr = self.to_expression(value)?;
                    self.statement(format!("return {};", expr));
                }
                None if !at_tail => self.statement("return;"),
                None => {}
            }
            return Ok(());
        }

        let fixups = self.ir.get_function(self.entry)?.fixup_out.clone();
        for fixup in &fixups {
            self.emit_fixup(fixup)?;
        }
        self.emit_position_fixups();
        match self.stage_out_var {
            Some(out) if self.returns_stage_out() => {
                self.statement(format!("return {};", self.plain_name(out)));
            }
            _ if !at_tail => self.statement("return;"),
            _ => {}
        }
        Ok(())
    }

    fn emit_position_fixups(&mut self) {
        if self.qual_pos_var_name.is_empty() || self.model != ExecutionModel::Vertex {
            return;
        }
        let pos = self.qual_pos_var_name.clone();
        if self.options.fixup_clipspace {
            self.statement(format!(
                "{p}.z = ({p}.z + {p}.w) * 0.5;       // Adjust clip-space for Metal",
                p = pos
            ));
        }
        if self.options.flip_vert_y {
            self.statement(format!("{p}.y = -({p}.y);    // Invert Y-axis for Metal", p = pos));
        }
    }

    /// Expression currently standing for `id`.
    pub(crate) fn to_expression(&self, id: Id) -> Result<String> {
        if let Some(expr) = self.state.expressions.get(&id) {
            return Ok(expr.clone());
        }
        match self.ir.record(id) {
            Some(Record::Constant(_)) => self.to_constant_reference(id),
            Some(Record::Variable(_)) => Ok(self.to_name(id)),
            Some(Record::Undef(_)) => Ok(self.plain_name(id)),
            _ => Ok(format!("_{}", id)),
        }
    }
}
