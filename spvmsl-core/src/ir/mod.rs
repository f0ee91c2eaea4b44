//! The id-addressed IR store.
//!
//! Records are populated once by the loader; afterwards the store only grows
//! (synthesis consumes fresh id blocks through [`Ir::increase_bound_by`]).
//! Decorations are mutable and persist across compilation passes.

mod meta;
mod records;
mod types;

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use rspirv::spirv::{BuiltIn, Decoration, ExecutionMode, ExecutionModel, StorageClass};

use crate::err_internal;
use crate::error::Result;
use crate::IdArena;

pub use meta::{Decorations, Meta};
pub use records::{
    Block, Constant, ConstantValue, ExtInstSet, Fixup, Function, Instruction, Parameter, Record, Undef,
    Variable,
};
pub use types::{ArraySize, BaseType, Id, ImageInfo, Type};

#[derive(Debug, Clone)]
pub struct EntryPoint {
    pub id: Id,
    pub name: String,
    pub model: ExecutionModel,
    pub interface: Vec<Id>,
    pub modes: HashSet<ExecutionMode>,
    pub workgroup_size: [u32; 3],
}

impl EntryPoint {
    pub fn new(id: Id, name: String, model: ExecutionModel) -> Self {
        EntryPoint {
            id,
            name,
            model,
            interface: Vec::new(),
            modes: HashSet::new(),
            workgroup_size: [1, 1, 1],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ir {
    records: IdArena<Id, Record>,
    meta: HashMap<Id, Meta>,
    result_types: HashMap<Id, Id>,
    pub entry_points: IndexMap<Id, EntryPoint>,
    pub default_entry_point: Id,
    /// Specialization constants that size an array type.
    pub used_as_array_length: HashSet<Id>,
}

macro_rules! typed_accessors {
    ($variant:ident, $ty:ty, $get:ident, $get_mut:ident, $maybe:ident) => {
        pub fn $get(&self, id: Id) -> Result<&$ty> {
            match self.records.get(id) {
                Some(Record::$variant(r)) => Ok(r),
                Some(other) => Err(err_internal!(
                    "id {} is a {}, expected {}",
                    id,
                    other.kind_name(),
                    stringify!($get)
                )),
                None => Err(err_internal!("id {} has no record ({})", id, stringify!($get))),
            }
        }

        pub fn $get_mut(&mut self, id: Id) -> Result<&mut $ty> {
            match self.records.get_mut(id) {
                Some(Record::$variant(r)) => Ok(r),
                Some(other) => Err(err_internal!(
                    "id {} is a {}, expected {}",
                    id,
                    other.kind_name(),
                    stringify!($get_mut)
                )),
                None => Err(err_internal!("id {} has no record ({})", id, stringify!($get_mut))),
            }
        }

        pub fn $maybe(&self, id: Id) -> Option<&$ty> {
            match self.records.get(id) {
                Some(Record::$variant(r)) => Some(r),
                _ => None,
            }
        }
    };
}

impl Ir {
    pub fn new(bound: u32) -> Self {
        Ir {
            records: IdArena::with_bound(bound),
            meta: HashMap::new(),
            result_types: HashMap::new(),
            entry_points: IndexMap::new(),
            default_entry_point: 0,
            used_as_array_length: HashSet::new(),
        }
    }

    pub fn bound(&self) -> u32 {
        self.records.bound()
    }

    /// Reserve `count` fresh ids and return the first.
    pub fn increase_bound_by(&mut self, count: u32) -> Id {
        self.records.reserve_ids(count)
    }

    /// Store a record under `id`, replacing whatever was there.
    pub fn set(&mut self, id: Id, record: Record) {
        if let Record::Variable(var) = &record {
            self.result_types.insert(id, var.type_id);
        }
        self.records.set(id, record);
    }

    pub fn record(&self, id: Id) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn contains(&self, id: Id) -> bool {
        self.records.get(id).is_some()
    }

    typed_accessors!(Type, Type, get_type, get_type_mut, maybe_type);
    typed_accessors!(Variable, Variable, get_variable, get_variable_mut, maybe_variable);
    typed_accessors!(Constant, Constant, get_constant, get_constant_mut, maybe_constant);
    typed_accessors!(Function, Function, get_function, get_function_mut, maybe_function);
    typed_accessors!(Undef, Undef, get_undef, get_undef_mut, maybe_undef);

    pub fn ext_inst_set(&self, id: Id) -> Option<ExtInstSet> {
        match self.records.get(id) {
            Some(Record::ExtInstImport(set)) => Some(*set),
            _ => None,
        }
    }

    /// All records in module order, synthesized ones last.
    pub fn iter(&self) -> impl Iterator<Item = (Id, &Record)> {
        self.records.iter().map(|(id, r)| (*id, r))
    }

    pub fn variables(&self) -> impl Iterator<Item = (Id, &Variable)> {
        self.iter().filter_map(|(id, r)| match r {
            Record::Variable(v) => Some((id, v)),
            _ => None,
        })
    }

    pub fn types(&self) -> impl Iterator<Item = (Id, &Type)> {
        self.iter().filter_map(|(id, r)| match r {
            Record::Type(t) => Some((id, t)),
            _ => None,
        })
    }

    pub fn constants(&self) -> impl Iterator<Item = (Id, &Constant)> {
        self.iter().filter_map(|(id, r)| match r {
            Record::Constant(c) => Some((id, c)),
            _ => None,
        })
    }

    pub fn undefs(&self) -> impl Iterator<Item = (Id, &Undef)> {
        self.iter().filter_map(|(id, r)| match r {
            Record::Undef(u) => Some((id, u)),
            _ => None,
        })
    }

    pub fn function_ids(&self) -> Vec<Id> {
        self.iter()
            .filter_map(|(id, r)| matches!(r, Record::Function(_)).then_some(id))
            .collect()
    }

    /// Module-scope variables (everything not function-local).
    pub fn global_variables(&self) -> Vec<Id> {
        self.variables()
            .filter(|(_, v)| v.storage != StorageClass::Function)
            .map(|(id, _)| id)
            .collect()
    }

    // -------------------------------------------------------------------------
    // Result types
    // -------------------------------------------------------------------------

    pub fn set_result_type(&mut self, id: Id, type_id: Id) {
        self.result_types.insert(id, type_id);
    }

    /// Type id of any value: variable, constant, undef or instruction result.
    pub fn type_of(&self, id: Id) -> Option<Id> {
        match self.records.get(id) {
            Some(Record::Variable(v)) => Some(v.type_id),
            Some(Record::Constant(c)) => Some(c.type_id),
            Some(Record::Undef(u)) => Some(u.type_id),
            _ => self.result_types.get(&id).copied(),
        }
    }

    pub fn expression_type(&self, id: Id) -> Result<&Type> {
        let type_id = self.type_of(id).ok_or_else(|| err_internal!("id {} has no type", id))?;
        self.get_type(type_id)
    }

    /// Type a pointer points at; non-pointers are returned unchanged.
    pub fn pointee_type(&self, type_id: Id) -> Result<(Id, &Type)> {
        let ty = self.get_type(type_id)?;
        match (ty.pointer, ty.parent_type) {
            (true, Some(parent)) => Ok((parent, self.get_type(parent)?)),
            _ => Ok((type_id, ty)),
        }
    }

    pub fn variable_data_type(&self, var_id: Id) -> Result<(Id, &Type)> {
        let var = self.get_variable(var_id)?;
        self.pointee_type(var.type_id)
    }

    // -------------------------------------------------------------------------
    // Names and decorations
    // -------------------------------------------------------------------------

    pub fn meta(&self, id: Id) -> Option<&Meta> {
        self.meta.get(&id)
    }

    pub fn meta_mut(&mut self, id: Id) -> &mut Meta {
        self.meta.entry(id).or_default()
    }

    pub fn decorations(&self, id: Id) -> Option<&Decorations> {
        self.meta.get(&id).map(|m| &m.decoration)
    }

    pub fn member_decorations(&self, id: Id, index: u32) -> Option<&Decorations> {
        self.meta.get(&id).and_then(|m| m.member(index))
    }

    pub fn name(&self, id: Id) -> &str {
        self.decorations(id).map(|d| d.name.as_str()).unwrap_or("")
    }

    pub fn set_name(&mut self, id: Id, name: impl Into<String>) {
        self.meta_mut(id).decoration.name = name.into();
    }

    pub fn member_name(&self, id: Id, index: u32) -> &str {
        self.member_decorations(id, index).map(|d| d.name.as_str()).unwrap_or("")
    }

    pub fn set_member_name(&mut self, id: Id, index: u32, name: impl Into<String>) {
        self.meta_mut(id).member_mut(index).name = name.into();
    }

    pub fn has_decoration(&self, id: Id, decoration: Decoration) -> bool {
        self.decorations(id).is_some_and(|d| d.has(decoration))
    }

    pub fn get_decoration(&self, id: Id, decoration: Decoration) -> u32 {
        self.decorations(id).map(|d| d.get(decoration)).unwrap_or(0)
    }

    pub fn set_decoration(&mut self, id: Id, decoration: Decoration, value: u32) {
        self.meta_mut(id).decoration.set(decoration, value);
    }

    pub fn unset_decoration(&mut self, id: Id, decoration: Decoration) {
        self.meta_mut(id).decoration.unset(decoration);
    }

    pub fn has_member_decoration(&self, id: Id, index: u32, decoration: Decoration) -> bool {
        self.member_decorations(id, index).is_some_and(|d| d.has(decoration))
    }

    pub fn get_member_decoration(&self, id: Id, index: u32, decoration: Decoration) -> u32 {
        self.member_decorations(id, index).map(|d| d.get(decoration)).unwrap_or(0)
    }

    pub fn set_member_decoration(&mut self, id: Id, index: u32, decoration: Decoration, value: u32) {
        self.meta_mut(id).member_mut(index).set(decoration, value);
    }

    pub fn builtin(&self, id: Id) -> Option<BuiltIn> {
        self.decorations(id).and_then(|d| d.builtin)
    }

    pub fn member_builtin(&self, id: Id, index: u32) -> Option<BuiltIn> {
        self.member_decorations(id, index).and_then(|d| d.builtin)
    }

    /// True for a struct whose members are builtins (e.g. `gl_PerVertex`).
    pub fn is_builtin_block(&self, struct_id: Id) -> bool {
        self.meta(struct_id).is_some_and(|m| m.members.iter().any(|d| d.builtin.is_some()))
    }

    pub fn is_member_packed(&self, id: Id, index: u32) -> bool {
        self.member_decorations(id, index).is_some_and(|d| d.packed)
    }

    pub fn set_member_packed(&mut self, id: Id, index: u32) {
        self.meta_mut(id).member_mut(index).packed = true;
    }

    pub fn qualified_alias(&self, id: Id) -> Option<&str> {
        self.decorations(id).and_then(|d| d.qualified_alias.as_deref())
    }

    pub fn set_qualified_alias(&mut self, id: Id, alias: impl Into<String>) {
        self.meta_mut(id).decoration.qualified_alias = Some(alias.into());
    }

    pub fn member_qualified_alias(&self, id: Id, index: u32) -> Option<&str> {
        self.member_decorations(id, index).and_then(|d| d.qualified_alias.as_deref())
    }

    pub fn set_member_qualified_alias(&mut self, id: Id, index: u32, alias: impl Into<String>) {
        self.meta_mut(id).member_mut(index).qualified_alias = Some(alias.into());
    }

    // -------------------------------------------------------------------------
    // Entry points
    // -------------------------------------------------------------------------

    pub fn entry_point(&self) -> Result<&EntryPoint> {
        self.entry_points
            .get(&self.default_entry_point)
            .ok_or_else(|| err_internal!("no entry point {}", self.default_entry_point))
    }

    pub fn execution_model(&self) -> Result<ExecutionModel> {
        Ok(self.entry_point()?.model)
    }

    pub fn constant_u32(&self, id: Id) -> Result<u32> {
        self.get_constant(id)?
            .scalar_u32()
            .ok_or_else(|| err_internal!("constant {} is not a scalar", id))
    }
}
