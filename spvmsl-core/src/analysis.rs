//! Reflection over the loaded module: call graph, active interface
//! variables and active builtins of an entry point.

use std::collections::{HashMap, HashSet};

use rspirv::spirv::{BuiltIn, Op, StorageClass};

use crate::bail_unsupported;
use crate::error::Result;
use crate::ir::{Id, Ir};

/// Functions reachable from an entry point.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    /// Post-order: every callee precedes its callers, the entry point is last.
    pub order: Vec<Id>,
    /// Direct callees per function, in first-call order.
    pub callees: HashMap<Id, Vec<Id>>,
}

impl CallGraph {
    pub fn callees_of(&self, func: Id) -> &[Id] {
        self.callees.get(&func).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Open,
    Done,
}

/// Build the call graph with an explicit worklist. Recursion is rejected.
pub fn call_graph(ir: &Ir, entry: Id) -> Result<CallGraph> {
    let mut graph = CallGraph::default();
    let mut state: HashMap<Id, Visit> = HashMap::new();
    // (function, index of the next callee to visit)
    let mut stack: Vec<(Id, usize)> = vec![(entry, 0)];
    state.insert(entry, Visit::Open);

    while let Some(&(func, next)) = stack.last() {
        if next == 0 && !graph.callees.contains_key(&func) {
            graph.callees.insert(func, direct_callees(ir, func)?);
        }
        let callee = graph.callees[&func].get(next).copied();
        match callee {
            Some(callee) => {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match state.get(&callee) {
                    Some(Visit::Open) => {
                        bail_unsupported!(
                            "recursive call from function {} to {} cannot be expressed in MSL",
                            func,
                            callee
                        )
                    }
                    Some(Visit::Done) => {}
                    None => {
                        state.insert(callee, Visit::Open);
                        stack.push((callee, 0));
                    }
                }
            }
            None => {
                stack.pop();
                state.insert(func, Visit::Done);
                graph.order.push(func);
            }
        }
    }
    Ok(graph)
}

fn direct_callees(ir: &Ir, func: Id) -> Result<Vec<Id>> {
    let mut callees = Vec::new();
    for inst in ir.get_function(func)?.instructions() {
        if inst.op != Op::FunctionCall {
            continue;
        }
        if let Some(&callee) = inst.refs.first() {
            if !callees.contains(&callee) {
                callees.push(callee);
            }
        }
    }
    Ok(callees)
}

fn is_global_variable(ir: &Ir, id: Id) -> bool {
    ir.maybe_variable(id).is_some_and(|v| v.storage != StorageClass::Function)
}

/// Module-scope variables referenced by any function reachable from `entry`.
pub fn active_interface_variables(ir: &Ir, entry: Id) -> Result<HashSet<Id>> {
    let graph = call_graph(ir, entry)?;
    let mut active = HashSet::new();
    for func in &graph.order {
        for inst in ir.get_function(*func)?.instructions() {
            for &id in &inst.refs {
                if is_global_variable(ir, id) {
                    active.insert(id);
                }
            }
        }
    }
    Ok(active)
}

/// Builtins read or written by the entry point, split by direction.
#[derive(Debug, Clone, Default)]
pub struct ActiveBuiltins {
    pub inputs: HashSet<BuiltIn>,
    pub outputs: HashSet<BuiltIn>,
}

impl ActiveBuiltins {
    pub fn is_active(&self, builtin: BuiltIn, storage: StorageClass) -> bool {
        match storage {
            StorageClass::Input => self.inputs.contains(&builtin),
            StorageClass::Output => self.outputs.contains(&builtin),
            _ => false,
        }
    }

    fn add(&mut self, builtin: BuiltIn, storage: StorageClass) {
        match storage {
            StorageClass::Input => {
                self.inputs.insert(builtin);
            }
            StorageClass::Output => {
                self.outputs.insert(builtin);
            }
            _ => {}
        }
    }
}

pub fn active_builtins(ir: &Ir, entry: Id) -> Result<ActiveBuiltins> {
    let graph = call_graph(ir, entry)?;
    let mut builtins = ActiveBuiltins::default();

    for func in &graph.order {
        for inst in ir.get_function(*func)?.instructions() {
            let Some(&base) = inst.refs.first() else { continue };
            let Some(var) = ir.maybe_variable(base) else { continue };
            if !var.builtin {
                continue;
            }
            if let Some(builtin) = ir.builtin(base) {
                builtins.add(builtin, var.storage);
                continue;
            }

            // Builtin block: only members selected by a constant index count.
            let (_, block) = ir.variable_data_type(base)?;
            let block_id = block.base_id;
            let member_count = block.member_types.len() as u32;
            match inst.op {
                Op::AccessChain | Op::InBoundsAccessChain => {
                    let member = inst.refs.get(1).and_then(|&idx| ir.constant_u32(idx).ok());
                    if let Some(builtin) = member.and_then(|m| ir.member_builtin(block_id, m)) {
                        builtins.add(builtin, var.storage);
                    }
                }
                _ => {
                    for member in 0..member_count {
                        if let Some(builtin) = ir.member_builtin(block_id, member) {
                            builtins.add(builtin, var.storage);
                        }
                    }
                }
            }
        }
    }
    Ok(builtins)
}
