//! Builds the IR store from a parsed `rspirv` module.

use log::{debug, trace};
use rspirv::dr::{self, Operand};
use rspirv::spirv::{self, Decoration, ExecutionMode, Op, Word};

use crate::error::Result;
use crate::ir::{
    ArraySize, BaseType, Block, Constant, ConstantValue, EntryPoint, ExtInstSet, Function, ImageInfo,
    Instruction, Ir, Record, Type, Undef, Variable,
};
use crate::{bail_module, err_module};

/// Parse SPIR-V words and load them into a fresh store.
pub fn load_words(words: &[u32]) -> Result<Ir> {
    let module = dr::load_words(words).map_err(|e| err_module!("failed to parse SPIR-V: {:?}", e))?;
    from_module(&module)
}

/// Load an already parsed module.
pub fn from_module(module: &dr::Module) -> Result<Ir> {
    let declared = module.header.as_ref().map(|h| h.bound).unwrap_or(0);
    let bound = declared.max(compute_bound(module));
    let mut loader = Loader { ir: Ir::new(bound) };

    for inst in &module.ext_inst_imports {
        loader.ext_inst_import(inst)?;
    }
    for inst in &module.entry_points {
        loader.entry_point(inst)?;
    }
    for inst in &module.execution_modes {
        loader.execution_mode(inst)?;
    }
    for inst in &module.debug_names {
        loader.debug_name(inst)?;
    }
    for inst in &module.annotations {
        loader.annotation(inst)?;
    }
    for inst in &module.types_global_values {
        loader.global(inst)?;
    }
    for func in &module.functions {
        loader.function(func)?;
    }
    loader.finish()
}

fn compute_bound(module: &dr::Module) -> u32 {
    module.all_inst_iter().filter_map(|inst| inst.result_id).max().map(|id| id + 1).unwrap_or(1)
}

/// Flatten an instruction into its word encoding, minus the opcode.
pub fn instruction_words(inst: &dr::Instruction) -> Vec<u32> {
    let mut ops = Vec::with_capacity(inst.operands.len() + 2);
    ops.extend(inst.result_type);
    ops.extend(inst.result_id);
    for operand in &inst.operands {
        push_operand_words(operand, &mut ops);
    }
    ops
}

/// Ids named by id-typed operands.
pub fn referenced_ids(inst: &dr::Instruction) -> Vec<Word> {
    inst.operands
        .iter()
        .filter_map(|op| match op {
            Operand::IdRef(id) | Operand::IdScope(id) | Operand::IdMemorySemantics(id) => Some(*id),
            _ => None,
        })
        .collect()
}

fn push_operand_words(operand: &Operand, ops: &mut Vec<u32>) {
    match operand {
        Operand::IdRef(w)
        | Operand::IdScope(w)
        | Operand::IdMemorySemantics(w)
        | Operand::LiteralBit32(w)
        | Operand::LiteralExtInstInteger(w) => ops.push(*w),
        Operand::LiteralBit64(v) => {
            ops.push(*v as u32);
            ops.push((*v >> 32) as u32);
        }
        Operand::LiteralSpecConstantOpInteger(op) => ops.push(*op as u32),
        Operand::ImageOperands(mask) => ops.push(mask.bits()),
        Operand::MemoryAccess(mask) => ops.push(mask.bits()),
        Operand::SelectionControl(mask) => ops.push(mask.bits()),
        Operand::LoopControl(mask) => ops.push(mask.bits()),
        Operand::FunctionControl(mask) => ops.push(mask.bits()),
        Operand::MemorySemantics(mask) => ops.push(mask.bits()),
        Operand::StorageClass(sc) => ops.push(*sc as u32),
        Operand::Dim(dim) => ops.push(*dim as u32),
        Operand::Decoration(d) => ops.push(*d as u32),
        Operand::BuiltIn(b) => ops.push(*b as u32),
        Operand::Scope(s) => ops.push(*s as u32),
        Operand::ExecutionModel(m) => ops.push(*m as u32),
        Operand::ExecutionMode(m) => ops.push(*m as u32),
        Operand::ImageFormat(f) => ops.push(*f as u32),
        Operand::AccessQualifier(a) => ops.push(*a as u32),
        Operand::LiteralString(_) => {}
        other => trace!("dropping operand {:?}", other),
    }
}

fn id_operand(inst: &dr::Instruction, index: usize) -> Result<Word> {
    match inst.operands.get(index) {
        Some(Operand::IdRef(id)) => Ok(*id),
        other => Err(err_module!(
            "{:?}: expected id operand at {}, found {:?}",
            inst.class.opcode,
            index,
            other
        )),
    }
}

fn literal_operand(inst: &dr::Instruction, index: usize) -> Result<u32> {
    match inst.operands.get(index) {
        Some(Operand::LiteralBit32(v)) => Ok(*v),
        other => Err(err_module!(
            "{:?}: expected literal operand at {}, found {:?}",
            inst.class.opcode,
            index,
            other
        )),
    }
}

fn string_operand(inst: &dr::Instruction, index: usize) -> Result<String> {
    match inst.operands.get(index) {
        Some(Operand::LiteralString(s)) => Ok(s.clone()),
        other => Err(err_module!(
            "{:?}: expected string operand at {}, found {:?}",
            inst.class.opcode,
            index,
            other
        )),
    }
}

fn result_id(inst: &dr::Instruction) -> Result<Word> {
    inst.result_id.ok_or_else(|| err_module!("{:?} without result id", inst.class.opcode))
}

fn result_type(inst: &dr::Instruction) -> Result<Word> {
    inst.result_type.ok_or_else(|| err_module!("{:?} without result type", inst.class.opcode))
}

struct Loader {
    ir: Ir,
}

impl Loader {
    fn ext_inst_import(&mut self, inst: &dr::Instruction) -> Result<()> {
        let id = result_id(inst)?;
        let name = string_operand(inst, 0)?;
        let set = if name == "GLSL.std.450" {
            ExtInstSet::GlslStd450
        } else {
            ExtInstSet::Other
        };
        self.ir.set(id, Record::ExtInstImport(set));
        Ok(())
    }

    fn entry_point(&mut self, inst: &dr::Instruction) -> Result<()> {
        let model = match inst.operands.first() {
            Some(Operand::ExecutionModel(m)) => *m,
            other => bail_module!("OpEntryPoint without execution model: {:?}", other),
        };
        let func = id_operand(inst, 1)?;
        let name = string_operand(inst, 2)?;
        let mut entry = EntryPoint::new(func, name, model);
        for operand in &inst.operands[3..] {
            if let Operand::IdRef(id) = operand {
                entry.interface.push(*id);
            }
        }
        if self.ir.entry_points.is_empty() {
            self.ir.default_entry_point = func;
        }
        self.ir.entry_points.insert(func, entry);
        Ok(())
    }

    fn execution_mode(&mut self, inst: &dr::Instruction) -> Result<()> {
        let func = id_operand(inst, 0)?;
        let mode = match inst.operands.get(1) {
            Some(Operand::ExecutionMode(m)) => *m,
            other => bail_module!("OpExecutionMode without mode: {:?}", other),
        };
        let args: Vec<u32> = inst.operands[2..]
            .iter()
            .filter_map(|op| match op {
                Operand::LiteralBit32(v) => Some(*v),
                _ => None,
            })
            .collect();
        let entry = self
            .ir
            .entry_points
            .get_mut(&func)
            .ok_or_else(|| err_module!("execution mode for unknown entry point {}", func))?;
        if mode == ExecutionMode::LocalSize && args.len() == 3 {
            entry.workgroup_size = [args[0], args[1], args[2]];
        }
        entry.modes.insert(mode);
        Ok(())
    }

    fn debug_name(&mut self, inst: &dr::Instruction) -> Result<()> {
        match inst.class.opcode {
            Op::Name => {
                let id = id_operand(inst, 0)?;
                let name = string_operand(inst, 1)?;
                self.ir.set_name(id, name);
            }
            Op::MemberName => {
                let id = id_operand(inst, 0)?;
                let member = literal_operand(inst, 1)?;
                let name = string_operand(inst, 2)?;
                self.ir.set_member_name(id, member, name);
            }
            _ => {}
        }
        Ok(())
    }

    fn annotation(&mut self, inst: &dr::Instruction) -> Result<()> {
        match inst.class.opcode {
            Op::Decorate => {
                let id = id_operand(inst, 0)?;
                let (decoration, value) = decoration_operands(inst, 1)?;
                self.ir.set_decoration(id, decoration, value);
            }
            Op::MemberDecorate => {
                let id = id_operand(inst, 0)?;
                let member = literal_operand(inst, 1)?;
                let (decoration, value) = decoration_operands(inst, 2)?;
                self.ir.set_member_decoration(id, member, decoration, value);
            }
            op => trace!("ignoring annotation {:?}", op),
        }
        Ok(())
    }

    fn global(&mut self, inst: &dr::Instruction) -> Result<()> {
        let op = inst.class.opcode;
        match op {
            Op::TypeVoid
            | Op::TypeBool
            | Op::TypeInt
            | Op::TypeFloat
            | Op::TypeVector
            | Op::TypeMatrix
            | Op::TypeArray
            | Op::TypeRuntimeArray
            | Op::TypeStruct
            | Op::TypePointer
            | Op::TypeImage
            | Op::TypeSampledImage
            | Op::TypeSampler
            | Op::TypeFunction => {
                let id = result_id(inst)?;
                let ty = self.parse_type(inst, id)?;
                self.ir.set(id, Record::Type(ty));
            }
            Op::ConstantTrue | Op::ConstantFalse | Op::SpecConstantTrue | Op::SpecConstantFalse => {
                let value = matches!(op, Op::ConstantTrue | Op::SpecConstantTrue);
                let specialization = matches!(op, Op::SpecConstantTrue | Op::SpecConstantFalse);
                self.constant(inst, ConstantValue::Bool(value), specialization)?;
            }
            Op::Constant | Op::SpecConstant => {
                let bits = match inst.operands.first() {
                    Some(Operand::LiteralBit32(v)) => *v as u64,
                    Some(Operand::LiteralBit64(v)) => *v,
                    other => bail_module!("{:?} with operand {:?}", op, other),
                };
                self.constant(inst, ConstantValue::Scalar(bits), op == Op::SpecConstant)?;
            }
            Op::ConstantComposite | Op::SpecConstantComposite => {
                let ids = (0..inst.operands.len()).map(|i| id_operand(inst, i)).collect::<Result<Vec<_>>>()?;
                self.constant(inst, ConstantValue::Composite(ids), op == Op::SpecConstantComposite)?;
            }
            Op::ConstantNull => {
                self.constant(inst, ConstantValue::Null, false)?;
            }
            Op::SpecConstantOp => {
                let inner = match inst.operands.first() {
                    Some(Operand::LiteralSpecConstantOpInteger(inner)) => *inner,
                    other => bail_module!("OpSpecConstantOp with operand {:?}", other),
                };
                let mut words = Vec::new();
                for operand in &inst.operands[1..] {
                    push_operand_words(operand, &mut words);
                }
                self.constant(inst, ConstantValue::Op(inner, words), true)?;
            }
            Op::Undef => {
                let id = result_id(inst)?;
                let type_id = result_type(inst)?;
                self.ir.set(id, Record::Undef(Undef { type_id }));
            }
            Op::Variable => {
                let id = result_id(inst)?;
                let var = parse_variable(inst)?;
                self.ir.set(id, Record::Variable(var));
            }
            Op::Line | Op::NoLine | Op::String => {}
            other => debug!("ignoring global instruction {:?}", other),
        }
        Ok(())
    }

    fn constant(&mut self, inst: &dr::Instruction, value: ConstantValue, specialization: bool) -> Result<()> {
        let id = result_id(inst)?;
        let type_id = result_type(inst)?;
        self.ir.set(
            id,
            Record::Constant(Constant {
                type_id,
                value,
                specialization,
            }),
        );
        Ok(())
    }

    fn lookup_type(&self, id: Word) -> Result<&Type> {
        self.ir.maybe_type(id).ok_or_else(|| err_module!("type {} used before definition", id))
    }

    fn parse_type(&mut self, inst: &dr::Instruction, id: Word) -> Result<Type> {
        let mut ty = match inst.class.opcode {
            Op::TypeVoid => Type::new(BaseType::Void, 0),
            Op::TypeBool => Type::new(BaseType::Boolean, 32),
            Op::TypeInt => {
                let width = literal_operand(inst, 0)?;
                let signed = literal_operand(inst, 1)? != 0;
                let base = match width {
                    8 => BaseType::SByte,
                    16 => BaseType::Short,
                    32 => BaseType::Int,
                    64 => BaseType::Int64,
                    w => bail_module!("unsupported integer width {}", w),
                };
                Type::new(base.with_signedness(signed), width)
            }
            Op::TypeFloat => {
                let width = literal_operand(inst, 0)?;
                let base = match width {
                    16 => BaseType::Half,
                    32 => BaseType::Float,
                    64 => BaseType::Double,
                    w => bail_module!("unsupported float width {}", w),
                };
                Type::new(base, width)
            }
            Op::TypeVector => {
                let comp = id_operand(inst, 0)?;
                let mut ty = self.lookup_type(comp)?.clone();
                ty.vecsize = literal_operand(inst, 1)?;
                ty.parent_type = Some(comp);
                ty
            }
            Op::TypeMatrix => {
                let col = id_operand(inst, 0)?;
                let mut ty = self.lookup_type(col)?.clone();
                ty.columns = literal_operand(inst, 1)?;
                ty.parent_type = Some(col);
                ty
            }
            Op::TypeArray => {
                let elem = id_operand(inst, 0)?;
                let length = id_operand(inst, 1)?;
                let constant = self
                    .ir
                    .maybe_constant(length)
                    .ok_or_else(|| err_module!("array length {} is not a constant", length))?;
                let size = if constant.specialization {
                    self.ir.used_as_array_length.insert(length);
                    ArraySize::SpecConstant(length)
                } else {
                    ArraySize::Literal(constant.scalar_u32().unwrap_or(0))
                };
                Type::array_of(self.lookup_type(elem)?, elem, size)
            }
            Op::TypeRuntimeArray => {
                let elem = id_operand(inst, 0)?;
                Type::array_of(self.lookup_type(elem)?, elem, ArraySize::Literal(0))
            }
            Op::TypeStruct => {
                let mut ty = Type::new(BaseType::Struct, 0);
                ty.member_types =
                    (0..inst.operands.len()).map(|i| id_operand(inst, i)).collect::<Result<Vec<_>>>()?;
                ty
            }
            Op::TypePointer => {
                let storage = match inst.operands.first() {
                    Some(Operand::StorageClass(sc)) => *sc,
                    other => bail_module!("OpTypePointer with operand {:?}", other),
                };
                let pointee = id_operand(inst, 1)?;
                Type::pointer_to(self.lookup_type(pointee)?, pointee, storage)
            }
            Op::TypeImage => {
                let sampled_type = id_operand(inst, 0)?;
                let dim = match inst.operands.get(1) {
                    Some(Operand::Dim(d)) => *d,
                    other => bail_module!("OpTypeImage with dim {:?}", other),
                };
                let format = match inst.operands.get(6) {
                    Some(Operand::ImageFormat(f)) => *f,
                    _ => spirv::ImageFormat::Unknown,
                };
                let access = match inst.operands.get(7) {
                    Some(Operand::AccessQualifier(a)) => Some(*a),
                    _ => None,
                };
                let sampled_width = self.lookup_type(sampled_type)?.width;
                let mut ty = Type::new(BaseType::Image, sampled_width);
                ty.image = Some(ImageInfo {
                    sampled_type,
                    dim,
                    depth: literal_operand(inst, 2)? == 1,
                    arrayed: literal_operand(inst, 3)? != 0,
                    ms: literal_operand(inst, 4)? != 0,
                    sampled: literal_operand(inst, 5)?,
                    format,
                    access,
                });
                ty
            }
            Op::TypeSampledImage => {
                let image = id_operand(inst, 0)?;
                let mut ty = self.lookup_type(image)?.clone();
                ty.basetype = BaseType::SampledImage;
                ty.parent_type = Some(image);
                ty
            }
            Op::TypeSampler => Type::new(BaseType::Sampler, 0),
            Op::TypeFunction => {
                let mut ty = Type::new(BaseType::Unknown, 0);
                ty.member_types =
                    (0..inst.operands.len()).map(|i| id_operand(inst, i)).collect::<Result<Vec<_>>>()?;
                ty
            }
            op => bail_module!("not a type instruction: {:?}", op),
        };

        // Arrays and pointers share the identity of what they wrap.
        if !matches!(inst.class.opcode, Op::TypeArray | Op::TypeRuntimeArray | Op::TypePointer) {
            ty.base_id = id;
        }
        Ok(ty)
    }

    fn function(&mut self, func: &dr::Function) -> Result<()> {
        let def = func.def.as_ref().ok_or_else(|| err_module!("function without OpFunction"))?;
        let id = result_id(def)?;
        let return_type = result_type(def)?;
        let function_type = id_operand(def, 1)?;
        let mut function = Function::new(return_type, function_type);

        for param in &func.parameters {
            let param_id = result_id(param)?;
            let param_type = result_type(param)?;
            self.ir.set(
                param_id,
                Record::Variable(Variable {
                    type_id: param_type,
                    storage: spirv::StorageClass::Function,
                    initializer: None,
                    builtin: false,
                    base_variable: None,
                }),
            );
            function.add_parameter(param_id, param_type, false);
        }

        for block in &func.blocks {
            let label = block
                .label
                .as_ref()
                .and_then(|l| l.result_id)
                .ok_or_else(|| err_module!("block without label in function {}", id))?;
            let mut instructions = Vec::with_capacity(block.instructions.len());
            for inst in &block.instructions {
                match inst.class.opcode {
                    Op::Variable => {
                        let var_id = result_id(inst)?;
                        let var = parse_variable(inst)?;
                        self.ir.set(var_id, Record::Variable(var));
                        function.add_local_variable(var_id);
                    }
                    Op::Line | Op::NoLine => {}
                    op => {
                        if let (Some(rt), Some(rid)) = (inst.result_type, inst.result_id) {
                            self.ir.set_result_type(rid, rt);
                        }
                        instructions.push(Instruction::new(op, instruction_words(inst), referenced_ids(inst)));
                    }
                }
            }
            function.blocks.push(Block { label, instructions });
        }

        self.ir.set(id, Record::Function(function));
        Ok(())
    }

    fn finish(mut self) -> Result<Ir> {
        if self.ir.entry_points.is_empty() {
            bail_module!("module has no entry point");
        }

        // Builtin flags are derived from decorations on the variable or on the
        // members of the struct it points at.
        let vars: Vec<Word> = self.ir.variables().map(|(id, _)| id).collect();
        for var_id in vars {
            let (_, data_type) = self.ir.variable_data_type(var_id)?;
            let block_id = data_type.base_id;
            let builtin = self.ir.builtin(var_id).is_some()
                || (data_type.is_struct() && self.ir.is_builtin_block(block_id));
            self.ir.get_variable_mut(var_id)?.builtin = builtin;
        }

        debug!(
            "loaded module: bound {}, {} entry points",
            self.ir.bound(),
            self.ir.entry_points.len()
        );
        Ok(self.ir)
    }
}

fn parse_variable(inst: &dr::Instruction) -> Result<Variable> {
    let type_id = result_type(inst)?;
    let storage = match inst.operands.first() {
        Some(Operand::StorageClass(sc)) => *sc,
        other => bail_module!("OpVariable with operand {:?}", other),
    };
    let initializer = match inst.operands.get(1) {
        Some(Operand::IdRef(init)) => Some(*init),
        _ => None,
    };
    Ok(Variable {
        type_id,
        storage,
        initializer,
        builtin: false,
        base_variable: None,
    })
}

fn decoration_operands(inst: &dr::Instruction, index: usize) -> Result<(Decoration, u32)> {
    let decoration = match inst.operands.get(index) {
        Some(Operand::Decoration(d)) => *d,
        other => bail_module!("{:?} without decoration: {:?}", inst.class.opcode, other),
    };
    let value = match inst.operands.get(index + 1) {
        Some(Operand::LiteralBit32(v)) => *v,
        Some(Operand::BuiltIn(b)) => *b as u32,
        Some(Operand::IdRef(id)) => *id,
        _ => 0,
    };
    Ok((decoration, value))
}
