//! Non-type records held by the IR store.

use rspirv::spirv::{Op, StorageClass};

use super::types::{Id, Type};

/// A block instruction in word form: result type and result id (when the
/// opcode has them) followed by the operands, as in the binary encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub ops: Vec<u32>,
    /// Ids referenced by the operands (not the result), in operand order.
    pub refs: Vec<Id>,
}

impl Instruction {
    pub fn new(op: Op, ops: Vec<u32>, refs: Vec<Id>) -> Self {
        Instruction { op, ops, refs }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    /// Pointer type of the variable.
    pub type_id: Id,
    pub storage: StorageClass,
    pub initializer: Option<Id>,
    pub builtin: bool,
    /// Global this variable shadows when it was added as a parameter.
    pub base_variable: Option<Id>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Bool(bool),
    /// Raw bits, low word first for 64-bit scalars.
    Scalar(u64),
    Composite(Vec<Id>),
    Null,
    /// `OpSpecConstantOp`: the wrapped opcode and its operand words.
    Op(Op, Vec<u32>),
}

#[derive(Debug, Clone)]
pub struct Constant {
    pub type_id: Id,
    pub value: ConstantValue,
    pub specialization: bool,
}

impl Constant {
    pub fn scalar_u32(&self) -> Option<u32> {
        match self.value {
            ConstantValue::Scalar(bits) => Some(bits as u32),
            ConstantValue::Bool(b) => Some(b as u32),
            ConstantValue::Null => Some(0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Undef {
    pub type_id: Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtInstSet {
    GlslStd450,
    Other,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub id: Id,
    pub type_id: Id,
    /// Set for parameters added while threading globals through calls.
    pub alias_global_variable: bool,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub label: Id,
    /// Body instructions; the merge instruction (if any) and the terminator
    /// are the last entries.
    pub instructions: Vec<Instruction>,
}

impl Block {
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    pub fn merge(&self) -> Option<&Instruction> {
        let n = self.instructions.len();
        if n < 2 {
            return None;
        }
        let candidate = &self.instructions[n - 2];
        matches!(candidate.op, Op::SelectionMerge | Op::LoopMerge).then_some(candidate)
    }

    /// Instructions excluding merge and terminator.
    pub fn body(&self) -> &[Instruction] {
        let mut end = self.instructions.len().saturating_sub(1);
        if self.merge().is_some() {
            end -= 1;
        }
        &self.instructions[..end]
    }
}

/// Deferred statements attached to a function and interpreted when its body
/// is emitted. All operands are ids so the commands stay valid across passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fixup {
    /// `out.<member> = <initializer of var>;`
    InitializeOutput { var: Id },
    /// `var[.member][[index]] = in.<ib member>;`
    CopyInToLocal {
        var: Id,
        member: Option<u32>,
        index: Option<u32>,
        ib_var: Id,
        ib_member: u32,
    },
    /// `out.<ib member> = var[.member][[index]];`, widened when the interface
    /// member has more components than the local element.
    CopyLocalToOut {
        var: Id,
        member: Option<u32>,
        index: Option<u32>,
        ib_var: Id,
        ib_member: u32,
        components: u32,
    },
    /// `out.<ib member> = <widened var>;`
    PadOutput {
        var: Id,
        ib_var: Id,
        ib_member: u32,
        components: u32,
    },
    /// Bind the output struct to its slot in the capture buffer.
    BindCapturedOutput { ib_var: Id },
    /// `constant uint32_t& <var>Swzl = spvAuxBuffer.swizzleConst[<texture index>];`
    BindSwizzleConstant { var: Id },
    /// `float2 gl_SamplePosition = get_sample_position(gl_SampleID);`
    ComputeSamplePosition { var: Id },
}

#[derive(Debug, Clone)]
pub struct Function {
    pub return_type: Id,
    pub function_type: Id,
    pub parameters: Vec<Parameter>,
    pub local_variables: Vec<Id>,
    pub blocks: Vec<Block>,
    pub fixup_in: Vec<Fixup>,
    pub fixup_out: Vec<Fixup>,
}

impl Function {
    pub fn new(return_type: Id, function_type: Id) -> Self {
        Function {
            return_type,
            function_type,
            parameters: Vec::new(),
            local_variables: Vec::new(),
            blocks: Vec::new(),
            fixup_in: Vec::new(),
            fixup_out: Vec::new(),
        }
    }

    pub fn add_local_variable(&mut self, id: Id) {
        if !self.local_variables.contains(&id) {
            self.local_variables.push(id);
        }
    }

    pub fn add_parameter(&mut self, id: Id, type_id: Id, alias_global_variable: bool) {
        self.parameters.push(Parameter {
            id,
            type_id,
            alias_global_variable,
        });
    }

    pub fn block(&self, label: Id) -> Option<&Block> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }
}

/// One entry of the id-addressed store.
#[derive(Debug, Clone)]
pub enum Record {
    Type(Type),
    Variable(Variable),
    Constant(Constant),
    Function(Function),
    Undef(Undef),
    ExtInstImport(ExtInstSet),
}

impl Record {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Record::Type(_) => "type",
            Record::Variable(_) => "variable",
            Record::Constant(_) => "constant",
            Record::Function(_) => "function",
            Record::Undef(_) => "undef",
            Record::ExtInstImport(_) => "extended instruction set",
        }
    }
}
