//! Legalization of module-scope variables.
//!
//! Metal has no mutable globals. Private and workgroup variables move into
//! the entry point, and every function that touches a resource, stage
//! variable or localized variable receives it as an extra reference
//! parameter, threaded down the call graph.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, trace};
use rspirv::spirv::{Decoration, Dim, Op, StorageClass};

use crate::error::Result;
use crate::ir::{Id, Record, Type, Variable};

use super::builtins::builtin_name;
use super::layout::align_struct;
use super::names::ensure_valid_name;
use super::CompilerMsl;

fn is_threaded_storage(storage: StorageClass) -> bool {
    matches!(
        storage,
        StorageClass::Input
            | StorageClass::Output
            | StorageClass::Uniform
            | StorageClass::UniformConstant
            | StorageClass::PushConstant
            | StorageClass::StorageBuffer
    )
}

fn is_buffer_storage(storage: StorageClass) -> bool {
    matches!(
        storage,
        StorageClass::Uniform | StorageClass::UniformConstant | StorageClass::PushConstant | StorageClass::StorageBuffer
    )
}

impl CompilerMsl {
    /// A private array with a constant initializer that nothing writes stays
    /// at module scope as a `constant` table.
    pub(crate) fn is_lookup_table(&self, var: Id) -> Result<bool> {
        let v = self.ir.get_variable(var)?;
        if v.storage != StorageClass::Private || self.written_vars.contains(&var) {
            return Ok(false);
        }
        let Some(init) = v.initializer else { return Ok(false) };
        if self.ir.maybe_constant(init).is_none() {
            return Ok(false);
        }
        let (_, ty) = self.ir.variable_data_type(var)?;
        Ok(ty.is_array())
    }

    pub(crate) fn localize_global_variables(&mut self) -> Result<()> {
        for var in self.ir.global_variables() {
            let storage = self.ir.get_variable(var)?.storage;
            if !matches!(storage, StorageClass::Private | StorageClass::Workgroup) {
                continue;
            }
            if self.is_lookup_table(var)? {
                trace!("variable {} kept as a lookup table", var);
                self.lut_variables.insert(var);
                continue;
            }
            self.ir.get_function_mut(self.entry)?.add_local_variable(var);
            self.localized_vars.push(var);
        }
        debug!(
            "{} module variables moved into the entry point, {} lookup tables",
            self.localized_vars.len(),
            self.lut_variables.len()
        );
        Ok(())
    }

    /// Thread every used global through the call graph as a parameter.
    pub(crate) fn extract_global_variables_from_functions(&mut self) -> Result<()> {
        let mut working_set: HashSet<Id> = self
            .ir
            .variables()
            .filter(|(_, v)| is_threaded_storage(v.storage))
            .map(|(id, _)| id)
            .collect();
        for &local in &self.ir.get_function(self.entry)?.local_variables {
            if self.ir.get_variable(local)?.storage != StorageClass::Function {
                working_set.insert(local);
            }
        }

        let frag_coord = self.builtin_vars.get(&rspirv::spirv::BuiltIn::FragCoord).copied();
        let mut used: HashMap<Id, BTreeSet<Id>> = HashMap::new();

        // Callees come first in the order, so their sets are complete when a
        // caller unions them in.
        for func in self.call_graph.order.clone() {
            let mut set = BTreeSet::new();
            for inst in self.ir.get_function(func)?.instructions() {
                for &id in &inst.refs {
                    if working_set.contains(&id) {
                        set.insert(id);
                    }
                }
                if matches!(
                    inst.op,
                    Op::Load | Op::AccessChain | Op::InBoundsAccessChain | Op::PtrAccessChain
                ) {
                    let reads_subpass = inst
                        .ops
                        .first()
                        .and_then(|&rt| self.ir.maybe_type(rt))
                        .is_some_and(|t| t.dim() == Some(Dim::DimSubpassData));
                    if let (true, Some(fc)) = (reads_subpass, frag_coord) {
                        set.insert(fc);
                    }
                }
            }
            for callee in self.call_graph.callees_of(func) {
                if let Some(inner) = used.get(callee) {
                    set.extend(inner.iter().copied());
                }
            }
            used.insert(func, set);
        }

        for func in self.call_graph.order.clone() {
            if func == self.entry {
                continue;
            }
            let globals: Vec<Id> = used.get(&func).map(|s| s.iter().copied().collect()).unwrap_or_default();
            for global in globals {
                self.add_global_parameter(func, global)?;
            }
        }
        Ok(())
    }

    fn add_global_parameter(&mut self, func: Id, global: Id) -> Result<()> {
        let var = self.ir.get_variable(global)?.clone();
        let (data_id, data) = self.ir.variable_data_type(global)?;

        if var.builtin && data.is_struct() {
            // One parameter per active builtin member of the block.
            let block = data.base_id;
            let member_types = data.member_types.clone();
            for (index, member_type) in member_types.into_iter().enumerate() {
                let index = index as u32;
                let Some(builtin) = self.ir.member_builtin(block, index) else { continue };
                if !self.active_builtins.is_active(builtin, var.storage) {
                    continue;
                }
                let base = self.ir.increase_bound_by(2);
                let (ptr_id, param) = (base, base + 1);
                let ptr = Type::pointer_to(self.ir.get_type(member_type)?, member_type, var.storage);
                self.ir.set(ptr_id, Record::Type(ptr));
                self.ir.set(
                    param,
                    Record::Variable(Variable {
                        type_id: ptr_id,
                        storage: StorageClass::Function,
                        initializer: None,
                        builtin: true,
                        base_variable: None,
                    }),
                );
                let mut decorations = self.ir.member_decorations(block, index).cloned().unwrap_or_default();
                decorations.name = builtin_name(builtin).to_string();
                decorations.qualified_alias = None;
                self.ir.meta_mut(param).decoration = decorations;
                self.ir.get_function_mut(func)?.add_parameter(param, ptr_id, true);
                trace!("function {} receives builtin {:?} as parameter {}", func, builtin, param);
            }
            return Ok(());
        }

        let name = ensure_valid_name(&self.plain_name(global), "v");
        self.ir.set_name(global, name);

        let param = self.ir.increase_bound_by(1);
        self.ir.set(
            param,
            Record::Variable(Variable {
                type_id: var.type_id,
                storage: StorageClass::Function,
                initializer: None,
                builtin: var.builtin,
                base_variable: Some(global),
            }),
        );
        let mut meta = self.ir.meta(global).cloned().unwrap_or_default();
        meta.decoration.qualified_alias = None;
        *self.ir.meta_mut(param) = meta;
        self.ir.get_function_mut(func)?.add_parameter(param, var.type_id, true);
        trace!("function {} receives global {} as parameter {} ({})", func, global, param, data_id);
        Ok(())
    }

    /// Mark every buffer block struct, and the structs nested in it, for
    /// layout reconciliation.
    pub(crate) fn mark_packable_structs(&mut self) -> Result<()> {
        let mut roots = Vec::new();
        for (_, var) in self.ir.variables() {
            if var.storage == StorageClass::Function {
                continue;
            }
            let ty = self.ir.get_type(var.type_id)?;
            if !ty.pointer || !is_buffer_storage(ty.storage) {
                continue;
            }
            let block = ty.base_id;
            if self.ir.has_decoration(block, Decoration::Block) || self.ir.has_decoration(block, Decoration::BufferBlock) {
                roots.push(var.type_id);
            }
        }

        let mut pending = roots;
        while let Some(type_id) = pending.pop() {
            let ty = self.ir.get_type(type_id)?;
            if !ty.is_struct() {
                continue;
            }
            let struct_id = ty.base_id;
            if self.packable_structs.insert(struct_id) {
                pending.extend(self.ir.get_type(struct_id)?.member_types.iter().copied());
            }
        }

        for struct_id in self.packable_structs.clone() {
            align_struct(&mut self.ir, struct_id)?;
        }
        Ok(())
    }
}
