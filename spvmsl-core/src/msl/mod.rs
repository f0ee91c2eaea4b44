//! Metal Shading Language backend.
//!
//! Compilation runs in bounded passes. Each pass rebuilds the output text
//! from scratch; discoveries that must survive a pass (pragmas, helper
//! functions, typedefs, extra headers) live in the [`Session`], and IR
//! decorations persist in the store itself. A discovery made after the header
//! has been written flags the pass for recompilation.

mod builtins;
mod constants;
mod emit;
mod flow;
mod globals;
mod helpers;
mod interface;
mod layout;
mod names;
mod preprocess;
mod textures;
mod translate;
mod types;

#[cfg(test)]
mod globals_tests;
#[cfg(test)]
mod helpers_tests;
#[cfg(test)]
mod interface_tests;
#[cfg(test)]
mod layout_tests;
#[cfg(test)]
mod pass_tests;
#[cfg(test)]
mod translate_tests;

use std::collections::{BTreeSet, HashMap, HashSet};

use log::debug;
use rspirv::spirv::{BuiltIn, ExecutionModel, Op};

use crate::analysis::{self, ActiveBuiltins, CallGraph};
use crate::bail_internal;
use crate::error::Result;
use crate::ir::{Id, Ir};
use crate::options::{Options, ResourceBinding, VertexAttr};

pub use helpers::HelperTag;
pub use layout::{declared_struct_size, member_alignment, member_size};

/// Hard cap on compilation attempts.
const MAX_PASSES: u32 = 3;

pub(crate) const PRAGMA_MISSING_PROTOTYPES: &str = "#pragma clang diagnostic ignored \"-Wmissing-prototypes\"";
pub(crate) const PRAGMA_UNUSED_VARIABLE: &str = "#pragma clang diagnostic ignored \"-Wunused-variable\"";

/// Discoveries that accumulate across passes. Every set only grows.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pragmas: BTreeSet<String>,
    helpers: BTreeSet<HelperTag>,
    typedefs: BTreeSet<String>,
    headers: BTreeSet<String>,
}

impl Session {
    /// Returns true when the pragma was not known yet.
    pub fn add_pragma(&mut self, line: &str) -> bool {
        self.pragmas.insert(line.to_string())
    }

    /// Register a helper together with everything it depends on. Returns
    /// true when anything new was registered.
    pub fn add_helper(&mut self, tag: HelperTag) -> bool {
        let mut added = false;
        for implied in tag.closure() {
            added |= self.helpers.insert(implied);
        }
        added
    }

    pub fn add_typedef(&mut self, line: &str) -> bool {
        self.typedefs.insert(line.to_string())
    }

    pub fn add_header(&mut self, line: &str) -> bool {
        self.headers.insert(line.to_string())
    }

    pub fn has_helper(&self, tag: HelperTag) -> bool {
        self.helpers.contains(&tag)
    }

    pub fn pragmas(&self) -> impl Iterator<Item = &str> {
        self.pragmas.iter().map(|s| s.as_str())
    }

    /// Helpers in catalog order.
    pub fn helpers(&self) -> impl Iterator<Item = HelperTag> + '_ {
        self.helpers.iter().copied()
    }

    pub fn typedefs(&self) -> impl Iterator<Item = &str> {
        self.typedefs.iter().map(|s| s.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter().map(|s| s.as_str())
    }
}

/// Argument-table slot kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
}

/// Everything that is rebuilt at the start of a pass.
#[derive(Debug, Default)]
pub struct PassState {
    pub(crate) buffer: String,
    pub(crate) indent: usize,
    pub(crate) force_recompile: bool,
    pub(crate) header_emitted: bool,

    next_buffer_index: u32,
    next_texture_index: u32,
    next_sampler_index: u32,
    resource_indices: HashMap<(Id, ResourceKind), u32>,

    /// Forwarded expressions and names of emitted temporaries.
    pub(crate) expressions: HashMap<Id, String>,
    /// Pointer-valued results and the variable they point into.
    pub(crate) backing: HashMap<Id, Id>,
    /// `OpSampledImage` results: (image, sampler).
    pub(crate) sampled_images: HashMap<Id, (Id, Id)>,
    /// Results declared up front instead of at their definition.
    pub(crate) hoisted: HashSet<Id>,
    /// Access chains ending in a row-major matrix member.
    pub(crate) row_major: HashSet<Id>,
    /// Access chains ending in a packed member.
    pub(crate) packed: HashSet<Id>,
    /// Row-major loads whose stored (transposed) value is still in scope.
    pub(crate) transposed: HashMap<Id, String>,
    pub(crate) previous_op: Option<Op>,
    pub(crate) current_function: Option<Id>,
    /// Structured constructs enclosing the block being emitted.
    pub(crate) constructs: Vec<flow::Construct>,

    pub(crate) uses_atomics: bool,
    pub(crate) uses_resource_write: bool,
}

impl PassState {
    /// Mark the pass as stale; the orchestrator will run another one.
    pub fn request_recompile(&mut self) {
        self.force_recompile = true;
    }

    pub fn needs_recompile(&self) -> bool {
        self.force_recompile
    }

    pub fn output(&self) -> &str {
        &self.buffer
    }
}

/// Compiles one entry point of a loaded module to MSL.
pub struct CompilerMsl {
    pub(crate) ir: Ir,
    pub(crate) options: Options,
    pub(crate) session: Session,
    pub(crate) state: PassState,

    pub(crate) entry: Id,
    pub(crate) model: ExecutionModel,
    pub(crate) call_graph: CallGraph,
    pub(crate) active_vars: HashSet<Id>,
    pub(crate) active_builtins: ActiveBuiltins,

    pub(crate) stage_in_var: Option<Id>,
    pub(crate) stage_out_var: Option<Id>,
    /// Struct types synthesized for the stage interface.
    pub(crate) interface_structs: HashSet<Id>,
    /// Builtin input variables, found or synthesized.
    pub(crate) builtin_vars: HashMap<BuiltIn, Id>,
    pub(crate) aux_buffer: Option<Id>,
    pub(crate) qual_pos_var_name: String,
    pub(crate) rasterization_disabled: bool,
    pub(crate) uses_swizzle: bool,
    /// Image variables sampled with a depth comparison.
    pub(crate) comparison_vars: HashSet<Id>,
    /// Vertex inputs whose interface member was retyped to match the host
    /// attribute format.
    pub(crate) converted_inputs: HashSet<Id>,

    /// Private variables kept at module scope as constant lookup tables.
    pub(crate) lut_variables: HashSet<Id>,
    /// Module variables moved into the entry function, in declaration order.
    pub(crate) localized_vars: Vec<Id>,
    pub(crate) packable_structs: BTreeSet<Id>,
    /// Variables and parameters written through a store, atomic or call.
    pub(crate) written_vars: HashSet<Id>,

    pass_count: u32,
    prepared: bool,
}

impl CompilerMsl {
    pub fn new(ir: Ir, options: Options) -> Self {
        let entry = ir.default_entry_point;
        let model = ir.execution_model().unwrap_or(ExecutionModel::Vertex);
        CompilerMsl {
            ir,
            options,
            session: Session::default(),
            state: PassState::default(),
            entry,
            model,
            call_graph: CallGraph::default(),
            active_vars: HashSet::new(),
            active_builtins: ActiveBuiltins::default(),
            stage_in_var: None,
            stage_out_var: None,
            interface_structs: HashSet::new(),
            builtin_vars: HashMap::new(),
            aux_buffer: None,
            qual_pos_var_name: String::new(),
            rasterization_disabled: false,
            uses_swizzle: false,
            comparison_vars: HashSet::new(),
            converted_inputs: HashSet::new(),
            lut_variables: HashSet::new(),
            localized_vars: Vec::new(),
            packable_structs: BTreeSet::new(),
            written_vars: HashSet::new(),
            pass_count: 0,
            prepared: false,
        }
    }

    /// Compile the entry point to MSL source.
    pub fn compile(&mut self) -> Result<String> {
        self.compile_passes(&mut |_| {})
    }

    /// Pass loop with a hook run after every pass.
    pub(crate) fn compile_passes(&mut self, after_pass: &mut dyn FnMut(&mut PassState)) -> Result<String> {
        if !self.prepared {
            self.prepare()?;
            self.prepared = true;
        }

        self.pass_count = 0;
        loop {
            if self.pass_count >= MAX_PASSES {
                bail_internal!("Over {} compilation loops detected", MAX_PASSES);
            }
            self.pass_count += 1;
            debug!("compilation pass {} for entry point {}", self.pass_count, self.entry);

            self.state = PassState::default();
            self.emit_pass()?;
            after_pass(&mut self.state);

            if !self.state.force_recompile {
                break;
            }
            debug!("pass {} discovered new requirements, recompiling", self.pass_count);
        }
        Ok(std::mem::take(&mut self.state.buffer))
    }

    /// One-time transformations of the store ahead of the first pass.
    fn prepare(&mut self) -> Result<()> {
        let ep = self.ir.entry_point()?;
        self.entry = ep.id;
        self.model = ep.model;

        self.replace_illegal_names()?;
        self.call_graph = analysis::call_graph(&self.ir, self.entry)?;
        self.active_vars = analysis::active_interface_variables(&self.ir, self.entry)?;
        self.active_builtins = analysis::active_builtins(&self.ir, self.entry)?;

        self.rasterization_disabled = self.options.disable_rasterization || self.capture_output();

        self.analyze_sampled_image_usage()?;
        self.build_implicit_builtins()?;
        self.fixup_image_load_store_access()?;
        self.mark_written_variables()?;

        self.qual_pos_var_name.clear();
        self.stage_out_var = self.add_interface_block(rspirv::spirv::StorageClass::Output)?;
        self.stage_in_var = self.add_interface_block(rspirv::spirv::StorageClass::Input)?;
        if self.model == ExecutionModel::Vertex && self.stage_out_var.is_none() {
            debug!("vertex entry point has no stage output, rasterization disabled");
            self.rasterization_disabled = true;
        }

        self.localize_global_variables()?;
        self.extract_global_variables_from_functions()?;
        self.mark_packable_structs()?;
        self.add_entry_fixups()?;
        Ok(())
    }

    fn emit_pass(&mut self) -> Result<()> {
        self.preprocess()?;
        self.emit_header();
        self.state.header_emitted = true;
        self.emit_specialization_constants_and_structs()?;
        self.emit_module_constants()?;
        if let Some(var) = self.stage_out_var {
            self.emit_interface_block(var)?;
        }
        if let Some(var) = self.stage_in_var {
            self.emit_interface_block(var)?;
        }
        self.emit_helpers();
        self.emit_functions()?;
        Ok(())
    }

    pub(crate) fn capture_output(&self) -> bool {
        self.options.capture_output_to_buffer && self.model == ExecutionModel::Vertex
    }

    /// Number of passes the last `compile` took.
    pub fn pass_count(&self) -> u32 {
        self.pass_count
    }

    pub fn is_rasterization_disabled(&self) -> bool {
        self.rasterization_disabled
    }

    pub fn needs_aux_buffer(&self) -> bool {
        self.aux_buffer.is_some()
    }

    /// Vertex attribute table with `used_by_shader` updated by compilation.
    pub fn vertex_attributes(&self) -> &[VertexAttr] {
        &self.options.vertex_attributes
    }

    /// Resource binding table with `used_by_shader` updated by compilation.
    pub fn resource_bindings(&self) -> &[ResourceBinding] {
        &self.options.resource_bindings
    }

    pub fn ir(&self) -> &Ir {
        &self.ir
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // -------------------------------------------------------------------------
    // Discoveries
    // -------------------------------------------------------------------------

    fn discovered(&mut self, added: bool, what: &str) {
        if added && self.state.header_emitted {
            debug!("{} discovered after the header was emitted", what);
            self.state.force_recompile = true;
        }
    }

    pub(crate) fn require_helper(&mut self, tag: HelperTag) {
        let added = self.session.add_helper(tag);
        self.discovered(added, "helper function");
        let added = self.session.add_pragma(PRAGMA_MISSING_PROTOTYPES);
        self.discovered(added, "prototype pragma");
    }

    pub(crate) fn require_pragma(&mut self, line: &str) {
        let added = self.session.add_pragma(line);
        self.discovered(added, "pragma");
    }

    pub(crate) fn require_header(&mut self, line: &str) {
        let added = self.session.add_header(line);
        self.discovered(added, "header");
    }

    pub(crate) fn require_typedef(&mut self, line: &str) {
        let added = self.session.add_typedef(line);
        self.discovered(added, "typedef");
    }

    // -------------------------------------------------------------------------
    // Statement buffer
    // -------------------------------------------------------------------------

    pub(crate) fn statement(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.state.indent {
                self.state.buffer.push_str("    ");
            }
            self.state.buffer.push_str(text);
        }
        self.state.buffer.push('\n');
    }

    pub(crate) fn begin_scope(&mut self) {
        self.statement("{");
        self.state.indent += 1;
    }

    pub(crate) fn end_scope(&mut self) {
        self.state.indent = self.state.indent.saturating_sub(1);
        self.statement("}");
    }

    pub(crate) fn end_scope_decl(&mut self) {
        self.state.indent = self.state.indent.saturating_sub(1);
        self.statement("};");
    }

    /// Slot of a resource in its argument table, stable within a pass.
    pub(crate) fn resource_index(&mut self, var: Id, kind: ResourceKind) -> Result<u32> {
        if let Some(&index) = self.state.resource_indices.get(&(var, kind)) {
            return Ok(index);
        }
        let index = self.allocate_resource_index(var, kind)?;
        self.state.resource_indices.insert((var, kind), index);
        Ok(index)
    }

    fn allocate_resource_index(&mut self, var: Id, kind: ResourceKind) -> Result<u32> {
        use crate::options::{PUSH_CONSTANT_BINDING, PUSH_CONSTANT_DESCRIPTOR_SET};
        use rspirv::spirv::{Decoration, StorageClass};

        let storage = self.ir.get_variable(var)?.storage;
        let (set, binding) = if storage == StorageClass::PushConstant {
            (PUSH_CONSTANT_DESCRIPTOR_SET, PUSH_CONSTANT_BINDING)
        } else {
            (
                self.ir.get_decoration(var, Decoration::DescriptorSet),
                self.ir.get_decoration(var, Decoration::Binding),
            )
        };

        let model = self.model;
        let matched = self
            .options
            .resource_bindings
            .iter_mut()
            .find(|b| b.stage == model && b.desc_set == set && b.binding == binding);
        if let Some(entry) = matched {
            entry.used_by_shader = true;
            return Ok(match kind {
                ResourceKind::Buffer => entry.msl_buffer,
                ResourceKind::Texture => entry.msl_texture,
                ResourceKind::Sampler => entry.msl_sampler,
            });
        }

        if self.ir.has_decoration(var, Decoration::Binding) {
            return Ok(binding);
        }

        let (_, ty) = self.ir.variable_data_type(var)?;
        let count = self.array_element_count(ty)?.max(1);
        let counter = match kind {
            ResourceKind::Buffer => &mut self.state.next_buffer_index,
            ResourceKind::Texture => &mut self.state.next_texture_index,
            ResourceKind::Sampler => &mut self.state.next_sampler_index,
        };
        let index = *counter;
        *counter += count;
        Ok(index)
    }
}
