//! Stage input and output structs.
//!
//! Metal has no free-standing stage variables. Every active `Input` or
//! `Output` variable of the entry point becomes a member of one synthesized
//! struct per direction; the entry point takes the input struct as its
//! `[[stage_in]]` argument and returns the output struct. Variables the
//! interface cannot hold directly (matrices, arrays, whole structs) are
//! localized in the entry point and copied member by member through fixups.

use log::{debug, trace};
use rspirv::spirv::{BuiltIn, Decoration, ExecutionModel, StorageClass};

use crate::error::Result;
use crate::ir::{BaseType, Decorations, Fixup, Id, Record, Type, Variable};
use crate::options::VertexFormat;
use crate::{bail_internal, bail_unsupported};

use super::builtins::builtin_name;
use super::layout::array_size_literal;
use super::names::ensure_valid_name;
use super::CompilerMsl;

const INTERPOLATION: [Decoration; 4] = [
    Decoration::Flat,
    Decoration::NoPerspective,
    Decoration::Centroid,
    Decoration::Sample,
];

/// How a planned member is reached from the code that used the original
/// variable.
#[derive(Debug, Clone, Copy)]
enum Binding {
    /// The variable itself is renamed to `in.<member>` / `out.<member>`.
    Alias { var: Id },
    /// Fragment output widened to four components; the variable stays local
    /// and is copied out on return.
    Padded { var: Id, components: u32 },
    /// Builtin member of a builtin block.
    BlockBuiltin { block: Id, member: u32 },
    /// One member, column or element of a variable localized in the entry
    /// point.
    Copy {
        var: Id,
        member: Option<u32>,
        index: Option<u32>,
        components: u32,
    },
}

#[derive(Debug, Clone)]
struct PlannedMember {
    type_id: Id,
    decorations: Decorations,
    binding: Binding,
}

impl PlannedMember {
    fn sort_key(&self) -> (bool, u32) {
        (self.decorations.builtin.is_some(), self.decorations.location)
    }
}

fn copy_interpolation(from: Option<&Decorations>, to: &mut Decorations) {
    let Some(from) = from else { return };
    for decoration in INTERPOLATION {
        if from.has(decoration) {
            to.set(decoration, 0);
        }
    }
}

impl CompilerMsl {
    /// Build the input or output struct of the entry point. Returns the
    /// variable standing for the struct, or `None` when nothing qualifies.
    pub(crate) fn add_interface_block(&mut self, storage: StorageClass) -> Result<Option<Id>> {
        let include_builtins = storage == StorageClass::Output;
        let interface = self.ir.entry_point()?.interface.clone();

        let mut vars = Vec::new();
        for (id, var) in self.ir.variables() {
            if var.storage != storage || !interface.contains(&id) || !self.active_vars.contains(&id) {
                continue;
            }
            if var.builtin && !include_builtins {
                continue;
            }
            if !self.ir.get_type(var.type_id)?.pointer {
                continue;
            }
            vars.push(id);
        }
        if vars.is_empty() {
            return Ok(None);
        }

        let mut plan = Vec::new();
        for &var in &vars {
            self.plan_interface_variable(storage, var, &mut plan)?;
        }
        if plan.is_empty() {
            return Ok(None);
        }
        // Stable: ties keep declaration order.
        plan.sort_by_key(PlannedMember::sort_key);

        let base = self.ir.increase_bound_by(3);
        let (struct_id, ptr_id, ib_var) = (base, base + 1, base + 2);
        let ib_name = if storage == StorageClass::Output { "out" } else { "in" };

        let mut block = Type::new(BaseType::Struct, 0);
        block.storage = storage;
        block.base_id = struct_id;
        block.member_types = plan.iter().map(|m| m.type_id).collect();
        let ptr = Type::pointer_to(&block, struct_id, storage);
        self.ir.set(struct_id, Record::Type(block));
        self.ir.set(ptr_id, Record::Type(ptr));
        self.ir.set(
            ib_var,
            Record::Variable(Variable {
                type_id: ptr_id,
                storage,
                initializer: None,
                builtin: false,
                base_variable: None,
            }),
        );
        self.ir.set_decoration(struct_id, Decoration::Block, 0);
        self.ir.set_name(struct_id, format!("{}_{}", self.entry_name(), ib_name));
        self.ir.set_name(ib_var, ib_name);
        self.interface_structs.insert(struct_id);

        let entry = self.entry;
        if storage == StorageClass::Output {
            let func = self.ir.get_function_mut(entry)?;
            if self.options.capture_output_to_buffer && self.model == ExecutionModel::Vertex {
                func.fixup_in.push(Fixup::BindCapturedOutput { ib_var });
            } else {
                func.add_local_variable(ib_var);
            }
        }

        for (index, member) in plan.into_iter().enumerate() {
            let index = index as u32;
            let qualified = format!("{}.{}", ib_name, member.decorations.name);
            *self.ir.meta_mut(struct_id).member_mut(index) = member.decorations;
            self.bind_interface_member(storage, ib_var, index, qualified, member.binding)?;
        }

        debug!(
            "synthesized {} interface struct {} for {} variables",
            ib_name,
            struct_id,
            vars.len()
        );
        Ok(Some(ib_var))
    }

    /// Attach aliases, locals and fixups for one materialized member.
    fn bind_interface_member(
        &mut self,
        storage: StorageClass,
        ib_var: Id,
        ib_member: u32,
        qualified: String,
        binding: Binding,
    ) -> Result<()> {
        let entry = self.entry;
        match binding {
            Binding::Alias { var } => {
                self.ir.set_qualified_alias(var, qualified);
                let has_initializer = self.ir.get_variable(var)?.initializer.is_some();
                if storage == StorageClass::Output && has_initializer {
                    self.ir
                        .get_function_mut(entry)?
                        .fixup_in
                        .push(Fixup::InitializeOutput { var });
                }
            }
            Binding::Padded { var, components } => {
                let func = self.ir.get_function_mut(entry)?;
                func.add_local_variable(var);
                func.fixup_out.push(Fixup::PadOutput {
                    var,
                    ib_var,
                    ib_member,
                    components,
                });
            }
            Binding::BlockBuiltin { block, member } => {
                if self.ir.member_builtin(block, member) == Some(BuiltIn::Position) {
                    self.qual_pos_var_name = qualified.clone();
                }
                self.ir.set_member_qualified_alias(block, member, qualified);
            }
            Binding::Copy {
                var,
                member,
                index,
                components,
            } => {
                let func = self.ir.get_function_mut(entry)?;
                func.add_local_variable(var);
                if storage == StorageClass::Input {
                    func.fixup_in.push(Fixup::CopyInToLocal {
                        var,
                        member,
                        index,
                        ib_var,
                        ib_member,
                    });
                } else {
                    func.fixup_out.push(Fixup::CopyLocalToOut {
                        var,
                        member,
                        index,
                        ib_var,
                        ib_member,
                        components,
                    });
                }
            }
        }
        Ok(())
    }

    fn plan_interface_variable(&mut self, storage: StorageClass, var: Id, plan: &mut Vec<PlannedMember>) -> Result<()> {
        let (data_id, ty) = self.ir.variable_data_type(var)?;
        let ty = ty.clone();
        let builtin = self.ir.builtin(var);
        if let Some(b) = builtin {
            if !self.active_builtins.is_active(b, storage) {
                return Ok(());
            }
        }

        if ty.is_struct() {
            return self.plan_struct_variable(storage, var, ty.base_id, plan);
        }
        if ty.is_opaque() || matches!(ty.basetype, BaseType::Void | BaseType::Unknown) {
            return Ok(());
        }
        if builtin.is_none() && (ty.is_matrix() || ty.is_array()) {
            return self.plan_composite_variable(storage, var, data_id, plan);
        }
        self.plan_plain_variable(storage, var, data_id, plan)
    }

    fn plan_plain_variable(
        &mut self,
        storage: StorageClass,
        var: Id,
        data_id: Id,
        plan: &mut Vec<PlannedMember>,
    ) -> Result<()> {
        let builtin = self.ir.builtin(var);
        let var_decorations = self.ir.decorations(var).cloned().unwrap_or_default();
        let mut type_id = self.ensure_correct_builtin_type(data_id, builtin)?;

        let name = match builtin {
            Some(b) => builtin_name(b).to_string(),
            None => ensure_valid_name(&self.plain_name(var), "m"),
        };
        let mut decorations = Decorations::named(name);

        let has_location = var_decorations.has(Decoration::Location);
        let vecsize = self.ir.get_type(type_id)?.vecsize;
        let padded = has_location
            && self.options.pad_fragment_output_components
            && self.model == ExecutionModel::Fragment
            && storage == StorageClass::Output
            && vecsize < 4;
        if padded {
            type_id = self.extended_vector_type(type_id, 4)?;
        }

        if has_location {
            let location = var_decorations.location;
            if self.is_vertex_input(storage) {
                let converted = self.ensure_correct_attribute_type(type_id, location)?;
                if converted != type_id {
                    self.converted_inputs.insert(var);
                    type_id = converted;
                }
            }
            self.mark_location_as_used_by_shader(location, storage);
            decorations.set(Decoration::Location, location);
        }
        for decoration in [Decoration::Component, Decoration::Index] {
            if var_decorations.has(decoration) {
                decorations.set(decoration, var_decorations.get(decoration));
            }
        }
        if let Some(b) = builtin {
            decorations.set(Decoration::BuiltIn, b as u32);
            if b == BuiltIn::Position {
                self.qual_pos_var_name = format!("out.{}", decorations.name);
            }
        }
        copy_interpolation(Some(&var_decorations), &mut decorations);

        let binding = if padded {
            Binding::Padded { var, components: 4 }
        } else {
            Binding::Alias { var }
        };
        trace!("interface member {} for variable {}", decorations.name, var);
        plan.push(PlannedMember {
            type_id,
            decorations,
            binding,
        });
        Ok(())
    }

    /// Matrices and arrays: one member per column or element.
    fn plan_composite_variable(
        &mut self,
        storage: StorageClass,
        var: Id,
        data_id: Id,
        plan: &mut Vec<PlannedMember>,
    ) -> Result<()> {
        let ty = self.ir.get_type(data_id)?.clone();
        if ty.is_array() && ty.columns > 1 {
            bail_unsupported!("MSL cannot emit arrays-of-matrices in input and output variables.");
        }
        if ty.array.len() > 1 {
            bail_unsupported!("MSL cannot emit arrays-of-arrays in input and output variables.");
        }
        let count = if ty.is_array() {
            array_size_literal(&self.ir, ty.array[0])
        } else {
            ty.columns
        };
        let elem_id = self.usable_element_type(data_id)?;
        let var_decorations = self.ir.decorations(var).cloned().unwrap_or_default();
        let name = self.plain_name(var);

        for i in 0..count {
            let mut type_id = elem_id;
            let mut decorations = Decorations::named(ensure_valid_name(&format!("{}_{}", name, i), "m"));
            if var_decorations.has(Decoration::Location) {
                let location = var_decorations.location + i;
                if self.is_vertex_input(storage) {
                    type_id = self.ensure_correct_attribute_type(type_id, location)?;
                }
                self.mark_location_as_used_by_shader(location, storage);
                decorations.set(Decoration::Location, location);
            }
            let components = self.padded_components(storage, type_id, decorations.has(Decoration::Location))?;
            if components > 0 {
                type_id = self.extended_vector_type(type_id, components)?;
            }
            if var_decorations.has(Decoration::Index) {
                decorations.set(Decoration::Index, var_decorations.index);
            }
            copy_interpolation(Some(&var_decorations), &mut decorations);

            plan.push(PlannedMember {
                type_id,
                decorations,
                binding: Binding::Copy {
                    var,
                    member: None,
                    index: Some(i),
                    components,
                },
            });
        }
        Ok(())
    }

    /// Flatten a struct-typed stage variable member by member.
    fn plan_struct_variable(
        &mut self,
        storage: StorageClass,
        var: Id,
        struct_id: Id,
        plan: &mut Vec<PlannedMember>,
    ) -> Result<()> {
        let member_types = self.ir.get_type(struct_id)?.member_types.clone();
        let var_decorations = self.ir.decorations(var).cloned().unwrap_or_default();

        for (index, &member_type) in member_types.iter().enumerate() {
            let index = index as u32;
            let builtin = self.ir.member_builtin(struct_id, index);
            if let Some(b) = builtin {
                if !self.active_builtins.is_active(b, storage) {
                    continue;
                }
            }
            let mty = self.ir.get_type(member_type)?.clone();
            let member_decorations = self.ir.member_decorations(struct_id, index).cloned().unwrap_or_default();
            let base_location = if member_decorations.has(Decoration::Location) {
                Some(member_decorations.location)
            } else if var_decorations.has(Decoration::Location) {
                Some(self.accumulated_member_location(var, struct_id, index)?)
            } else {
                None
            };

            if builtin.is_none() && (mty.is_matrix() || mty.is_array()) {
                if mty.is_array() && mty.columns > 1 {
                    bail_unsupported!("MSL cannot emit arrays-of-matrices in input and output variables.");
                }
                if mty.array.len() > 1 {
                    bail_unsupported!("MSL cannot emit arrays-of-arrays in input and output variables.");
                }
                if member_decorations.has(Decoration::Component) {
                    bail_unsupported!("DecorationComponent on matrices and arrays make little sense.");
                }
                let count = if mty.is_array() {
                    array_size_literal(&self.ir, mty.array[0])
                } else {
                    mty.columns
                };
                let elem_id = self.usable_element_type(member_type)?;
                let qualified = self.qualified_member_name(struct_id, index);
                for i in 0..count {
                    let mut type_id = elem_id;
                    let mut decorations = Decorations::named(ensure_valid_name(&format!("{}_{}", qualified, i), "m"));
                    if let Some(location) = base_location.map(|l| l + i) {
                        if self.is_vertex_input(storage) {
                            type_id = self.ensure_correct_attribute_type(type_id, location)?;
                        }
                        self.mark_location_as_used_by_shader(location, storage);
                        decorations.set(Decoration::Location, location);
                    }
                    let components =
                        self.padded_components(storage, type_id, decorations.has(Decoration::Location))?;
                    if components > 0 {
                        type_id = self.extended_vector_type(type_id, components)?;
                    }
                    copy_interpolation(Some(&var_decorations), &mut decorations);
                    copy_interpolation(Some(&member_decorations), &mut decorations);
                    plan.push(PlannedMember {
                        type_id,
                        decorations,
                        binding: Binding::Copy {
                            var,
                            member: Some(index),
                            index: Some(i),
                            components,
                        },
                    });
                }
                continue;
            }

            let mut type_id = self.ensure_correct_builtin_type(member_type, builtin)?;
            let mut decorations = Decorations::named(ensure_valid_name(&self.qualified_member_name(struct_id, index), "m"));
            if let Some(location) = base_location {
                if builtin.is_none() && self.is_vertex_input(storage) {
                    type_id = self.ensure_correct_attribute_type(type_id, location)?;
                }
                self.mark_location_as_used_by_shader(location, storage);
                decorations.set(Decoration::Location, location);
            }
            if member_decorations.has(Decoration::Component) {
                decorations.set(Decoration::Component, member_decorations.component);
            }
            if let Some(b) = builtin {
                decorations.set(Decoration::BuiltIn, b as u32);
            }
            copy_interpolation(Some(&var_decorations), &mut decorations);
            copy_interpolation(Some(&member_decorations), &mut decorations);

            let binding = match builtin {
                Some(_) => Binding::BlockBuiltin {
                    block: struct_id,
                    member: index,
                },
                None => Binding::Copy {
                    var,
                    member: Some(index),
                    index: None,
                    components: 0,
                },
            };
            plan.push(PlannedMember {
                type_id,
                decorations,
                binding,
            });
        }
        Ok(())
    }

    /// Builtins get their own names; other members are qualified by their
    /// struct name so flattened members of different blocks never collide.
    fn qualified_member_name(&self, struct_id: Id, index: u32) -> String {
        if let Some(b) = self.ir.member_builtin(struct_id, index) {
            return builtin_name(b).to_string();
        }
        let member = self.member_name(struct_id, index);
        format!("{}_{}", self.plain_name(struct_id), member.trim_start_matches('_'))
    }

    /// Location of a struct member without its own decoration: the variable
    /// location advanced past every earlier member.
    fn accumulated_member_location(&self, var: Id, struct_id: Id, index: u32) -> Result<u32> {
        let mut location = self.ir.get_decoration(var, Decoration::Location);
        let member_types = &self.ir.get_type(struct_id)?.member_types;
        for (i, &member_type) in member_types.iter().enumerate().take(index as usize) {
            let i = i as u32;
            if self.ir.has_member_decoration(struct_id, i, Decoration::Location) {
                location = self.ir.get_member_decoration(struct_id, i, Decoration::Location);
            }
            let mty = self.ir.get_type(member_type)?;
            let mut slots = mty.columns;
            for &size in &mty.array {
                slots *= array_size_literal(&self.ir, size).max(1);
            }
            location += slots;
        }
        Ok(location)
    }

    /// Column type of a matrix, element type of an array.
    fn usable_element_type(&self, type_id: Id) -> Result<Id> {
        let mut current = type_id;
        loop {
            let ty = self.ir.get_type(current)?;
            if !(ty.is_array() || ty.columns > 1) {
                return Ok(current);
            }
            let Some(parent) = ty.parent_type else {
                bail_internal!("composite type {} without element type", current);
            };
            current = parent;
        }
    }

    /// Width a padded fragment output member is widened to, or 0.
    fn padded_components(&self, storage: StorageClass, type_id: Id, has_location: bool) -> Result<u32> {
        let vecsize = self.ir.get_type(type_id)?.vecsize;
        let pad = has_location
            && self.options.pad_fragment_output_components
            && self.model == ExecutionModel::Fragment
            && storage == StorageClass::Output
            && vecsize < 4;
        Ok(if pad { 4 } else { 0 })
    }

    /// A vector type like `type_id` with `components` components.
    fn extended_vector_type(&mut self, type_id: Id, components: u32) -> Result<Id> {
        let mut ty = self.ir.get_type(type_id)?.clone();
        let id = self.ir.increase_bound_by(1);
        ty.vecsize = components;
        ty.base_id = id;
        ty.parent_type = None;
        self.ir.set(id, Record::Type(ty));
        Ok(id)
    }

    /// Metal declares some builtins with a different type than SPIR-V:
    /// `sample_mask` is a scalar `uint`, layer and viewport indices are
    /// unsigned.
    pub(crate) fn ensure_correct_builtin_type(&mut self, type_id: Id, builtin: Option<BuiltIn>) -> Result<Id> {
        let Some(builtin) = builtin else { return Ok(type_id) };
        let ty = self.ir.get_type(type_id)?;
        let needs_uint = match builtin {
            BuiltIn::SampleMask => ty.is_array() || ty.basetype != BaseType::UInt,
            BuiltIn::Layer | BuiltIn::ViewportIndex => ty.basetype != BaseType::UInt,
            _ => false,
        };
        if !needs_uint {
            return Ok(type_id);
        }
        let id = self.ir.increase_bound_by(1);
        let mut uint = Type::new(BaseType::UInt, 32);
        uint.base_id = id;
        self.ir.set(id, Record::Type(uint));
        trace!("builtin {:?} retyped as uint ({})", builtin, id);
        Ok(id)
    }

    /// Retype a vertex input to the unsigned type the host attribute format
    /// delivers.
    pub(crate) fn ensure_correct_attribute_type(&mut self, type_id: Id, location: u32) -> Result<Id> {
        let Some(format) = self
            .options
            .vertex_attributes
            .iter()
            .find(|a| a.location == location)
            .map(|a| a.format)
        else {
            return Ok(type_id);
        };
        let ty = self.ir.get_type(type_id)?;
        let target = match (format, ty.basetype) {
            (VertexFormat::Other, _) => return Ok(type_id),
            (VertexFormat::Uint8, BaseType::UByte | BaseType::UShort | BaseType::UInt) => return Ok(type_id),
            (VertexFormat::Uint8, BaseType::Short) => BaseType::UShort,
            (VertexFormat::Uint8, BaseType::Int) => BaseType::UInt,
            (VertexFormat::Uint16, BaseType::UShort | BaseType::UInt) => return Ok(type_id),
            (VertexFormat::Uint16, BaseType::Int) => BaseType::UInt,
            _ => bail_unsupported!("Vertex attribute type mismatch between host and shader"),
        };
        let mut converted = ty.clone();
        let id = self.ir.increase_bound_by(1);
        converted.basetype = target;
        converted.base_id = id;
        converted.parent_type = None;
        self.ir.set(id, Record::Type(converted));
        trace!("vertex attribute at location {} retyped as {:?}", location, target);
        Ok(id)
    }

    fn is_vertex_input(&self, storage: StorageClass) -> bool {
        self.model == ExecutionModel::Vertex && storage == StorageClass::Input
    }

    fn mark_location_as_used_by_shader(&mut self, location: u32, storage: StorageClass) {
        if !self.is_vertex_input(storage) {
            return;
        }
        for attr in self.options.vertex_attributes.iter_mut() {
            if attr.location == location {
                attr.used_by_shader = true;
            }
        }
    }

    /// ` [[...]]` attribute of an interface struct member, or empty.
    pub(crate) fn member_attribute_qualifier(&self, struct_id: Id, index: u32) -> Result<String> {
        let block = self.ir.get_type(struct_id)?;
        let storage = block.storage;
        let Some(&member_type) = block.member_types.get(index as usize) else {
            bail_internal!("struct {} has no member {}", struct_id, index);
        };
        let mty = self.ir.get_type(member_type)?;
        let d = self.ir.member_decorations(struct_id, index).cloned().unwrap_or_default();
        let location = d.has(Decoration::Location).then_some(d.location);
        let user = || match location {
            Some(l) if d.has(Decoration::Component) => Some(format!("user(locn{}_{})", l, d.component)),
            Some(l) => Some(format!("user(locn{})", l)),
            None => None,
        };

        match (self.model, storage) {
            (ExecutionModel::Vertex, StorageClass::Input) => {
                if let Some(b) = d.builtin {
                    return Ok(match b {
                        BuiltIn::VertexId
                        | BuiltIn::VertexIndex
                        | BuiltIn::BaseVertex
                        | BuiltIn::InstanceId
                        | BuiltIn::InstanceIndex
                        | BuiltIn::BaseInstance => format!(" [[{}]]", self.builtin_qualifier(b)?),
                        BuiltIn::DrawIndex => bail_unsupported!("DrawIndex is not supported in MSL."),
                        _ => String::new(),
                    });
                }
                Ok(format!(" [[attribute({})]]", location.unwrap_or(index)))
            }

            (ExecutionModel::Vertex, StorageClass::Output) => {
                if let Some(b) = d.builtin {
                    return Ok(match b {
                        BuiltIn::PointSize if !self.options.enable_point_size_builtin => String::new(),
                        BuiltIn::PointSize => format!(" [[{}]]", self.builtin_qualifier(b)?),
                        BuiltIn::ViewportIndex | BuiltIn::Position | BuiltIn::Layer | BuiltIn::ClipDistance => {
                            let pad = if mty.is_array() { " " } else { "" };
                            format!(" [[{}]]{}", self.builtin_qualifier(b)?, pad)
                        }
                        _ => String::new(),
                    });
                }
                Ok(user().map(|q| format!(" [[{}]]", q)).unwrap_or_default())
            }

            (ExecutionModel::Fragment, StorageClass::Input) => {
                let mut quals = match d.builtin {
                    Some(
                        b @ (BuiltIn::FrontFacing
                        | BuiltIn::PointCoord
                        | BuiltIn::FragCoord
                        | BuiltIn::SampleId
                        | BuiltIn::SampleMask
                        | BuiltIn::Layer),
                    ) => self.builtin_qualifier(b)?.to_string(),
                    Some(_) => String::new(),
                    None => user().unwrap_or_default(),
                };
                if !mty.basetype.is_integer() && d.builtin != Some(BuiltIn::FragCoord) {
                    let interpolation = if d.has(Decoration::Flat) {
                        Some("flat")
                    } else if d.has(Decoration::Centroid) {
                        Some(if d.has(Decoration::NoPerspective) {
                            "centroid_no_perspective"
                        } else {
                            "centroid_perspective"
                        })
                    } else if d.has(Decoration::Sample) {
                        Some(if d.has(Decoration::NoPerspective) {
                            "sample_no_perspective"
                        } else {
                            "sample_perspective"
                        })
                    } else if d.has(Decoration::NoPerspective) {
                        Some("center_no_perspective")
                    } else {
                        None
                    };
                    if let Some(interpolation) = interpolation {
                        if !quals.is_empty() {
                            quals.push_str(", ");
                        }
                        quals.push_str(interpolation);
                    }
                }
                Ok(if quals.is_empty() {
                    String::new()
                } else {
                    format!(" [[{}]]", quals)
                })
            }

            (ExecutionModel::Fragment, StorageClass::Output) => {
                if let Some(b) = d.builtin {
                    return Ok(match b {
                        BuiltIn::SampleMask | BuiltIn::FragDepth => format!(" [[{}]]", self.builtin_qualifier(b)?),
                        _ => String::new(),
                    });
                }
                let color_index = d.has(Decoration::Index).then_some(d.index);
                Ok(match (location, color_index) {
                    (Some(l), Some(i)) => format!(" [[color({}), index({})]]", l, i),
                    (Some(l), None) => format!(" [[color({})]]", l),
                    (None, Some(i)) => format!(" [[index({})]]", i),
                    (None, None) => String::new(),
                })
            }

            (ExecutionModel::GLCompute, StorageClass::Input) => match d.builtin {
                Some(
                    b @ (BuiltIn::GlobalInvocationId
                    | BuiltIn::WorkgroupId
                    | BuiltIn::NumWorkgroups
                    | BuiltIn::LocalInvocationId
                    | BuiltIn::LocalInvocationIndex),
                ) => Ok(format!(" [[{}]]", self.builtin_qualifier(b)?)),
                _ => Ok(String::new()),
            },

            _ => Ok(String::new()),
        }
    }

    /// Declare the interface struct backing `ib_var`.
    pub(crate) fn emit_interface_block(&mut self, ib_var: Id) -> Result<()> {
        let (struct_id, _) = self.ir.variable_data_type(ib_var)?;
        self.emit_struct(struct_id)
    }
}
