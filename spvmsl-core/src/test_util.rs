//! Module fixtures for the unit tests.
//!
//! Shaders are assembled with `rspirv::dr::Builder` and loaded through the
//! regular loader, so every test exercises the same path as real input.

use rspirv::dr::{self, Operand};
use rspirv::spirv::{
    AddressingModel, BuiltIn, Capability, Decoration, ExecutionMode, ExecutionModel, FunctionControl, MemoryModel,
    StorageClass, Word,
};

use crate::error::Result;
use crate::ir::Ir;
use crate::loader;
use crate::msl::CompilerMsl;
use crate::options::Options;

pub(crate) struct ShaderBuilder {
    pub b: dr::Builder,
    pub model: ExecutionModel,
    pub glsl: Word,
    pub void: Word,
    pub bool_ty: Word,
    pub int: Word,
    pub uint: Word,
    pub float: Word,
    pub float2: Word,
    pub float3: Word,
    pub float4: Word,
    /// Label of the first block of `main`, set by `begin_main`.
    pub entry: Word,
    interface: Vec<Word>,
}

impl ShaderBuilder {
    pub fn new(model: ExecutionModel) -> Self {
        let mut b = dr::Builder::new();
        b.set_version(1, 0);
        b.capability(Capability::Shader);
        b.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        let glsl = b.ext_inst_import("GLSL.std.450");
        let void = b.type_void();
        let bool_ty = b.type_bool();
        let int = b.type_int(32, 1);
        let uint = b.type_int(32, 0);
        let float = b.type_float(32);
        let float2 = b.type_vector(float, 2);
        let float3 = b.type_vector(float, 3);
        let float4 = b.type_vector(float, 4);
        ShaderBuilder {
            b,
            model,
            glsl,
            void,
            bool_ty,
            int,
            uint,
            float,
            float2,
            float3,
            float4,
            entry: 0,
            interface: Vec::new(),
        }
    }

    pub fn pointer(&mut self, storage: StorageClass, pointee: Word) -> Word {
        self.b.type_pointer(None, storage, pointee)
    }

    pub fn float_const(&mut self, value: f32) -> Word {
        self.b.constant_bit32(self.float, value.to_bits())
    }

    pub fn int_const(&mut self, value: i32) -> Word {
        self.b.constant_bit32(self.int, value as u32)
    }

    pub fn uint_const(&mut self, value: u32) -> Word {
        self.b.constant_bit32(self.uint, value)
    }

    fn stage_variable(&mut self, storage: StorageClass, ty: Word, name: &str) -> Word {
        let ptr = self.pointer(storage, ty);
        let var = self.b.variable(ptr, None, storage, None);
        self.b.name(var, name);
        self.interface.push(var);
        var
    }

    pub fn input(&mut self, ty: Word, name: &str, location: u32) -> Word {
        let var = self.stage_variable(StorageClass::Input, ty, name);
        self.b.decorate(var, Decoration::Location, [Operand::LiteralBit32(location)]);
        var
    }

    pub fn output(&mut self, ty: Word, name: &str, location: u32) -> Word {
        let var = self.stage_variable(StorageClass::Output, ty, name);
        self.b.decorate(var, Decoration::Location, [Operand::LiteralBit32(location)]);
        var
    }

    pub fn builtin_input(&mut self, ty: Word, builtin: BuiltIn) -> Word {
        let var = self.stage_variable(StorageClass::Input, ty, &format!("{:?}", builtin));
        self.b.decorate(var, Decoration::BuiltIn, [Operand::BuiltIn(builtin)]);
        var
    }

    pub fn builtin_output(&mut self, ty: Word, builtin: BuiltIn) -> Word {
        let var = self.stage_variable(StorageClass::Output, ty, &format!("{:?}", builtin));
        self.b.decorate(var, Decoration::BuiltIn, [Operand::BuiltIn(builtin)]);
        var
    }

    /// Uniform or storage block with explicit member offsets.
    pub fn buffer_block(
        &mut self,
        storage: StorageClass,
        type_name: &str,
        var_name: &str,
        members: &[(Word, &str, u32)],
        binding: u32,
    ) -> (Word, Word) {
        let block = self.b.type_struct(members.iter().map(|m| m.0));
        self.b.name(block, type_name);
        self.b.decorate(block, Decoration::Block, std::iter::empty::<Operand>());
        for (index, (_, name, offset)) in members.iter().enumerate() {
            self.b.member_name(block, index as u32, *name);
            self.b
                .member_decorate(block, index as u32, Decoration::Offset, [Operand::LiteralBit32(*offset)]);
        }
        let ptr = self.pointer(storage, block);
        let var = self.b.variable(ptr, None, storage, None);
        self.b.name(var, var_name);
        self.b.decorate(var, Decoration::DescriptorSet, [Operand::LiteralBit32(0)]);
        self.b.decorate(var, Decoration::Binding, [Operand::LiteralBit32(binding)]);
        self.interface.push(var);
        (block, var)
    }

    /// Resource variable of an opaque type (image, sampler, sampled image).
    pub fn resource(&mut self, ty: Word, name: &str, binding: u32) -> Word {
        let ptr = self.pointer(StorageClass::UniformConstant, ty);
        let var = self.b.variable(ptr, None, StorageClass::UniformConstant, None);
        self.b.name(var, name);
        self.b.decorate(var, Decoration::DescriptorSet, [Operand::LiteralBit32(0)]);
        self.b.decorate(var, Decoration::Binding, [Operand::LiteralBit32(binding)]);
        self.interface.push(var);
        var
    }

    pub fn load(&mut self, ty: Word, ptr: Word) -> Word {
        self.b
            .load(ty, None, ptr, None, std::iter::empty::<Operand>())
            .expect("load")
    }

    pub fn store(&mut self, ptr: Word, value: Word) {
        self.b
            .store(ptr, value, None, std::iter::empty::<Operand>())
            .expect("store");
    }

    /// Start `void main()` and its first block.
    pub fn begin_main(&mut self) -> Word {
        let fn_type = self.b.type_function(self.void, std::iter::empty::<Word>());
        let main = self
            .b
            .begin_function(self.void, None, FunctionControl::NONE, fn_type)
            .expect("begin main");
        self.b.name(main, "main");
        self.entry = self.b.id();
        self.b.begin_block(Some(self.entry)).expect("entry block");
        main
    }

    /// Terminate the current block with `OpReturn` and close the function.
    pub fn end_void_function(&mut self) {
        self.b.ret().expect("return");
        self.b.end_function().expect("end function");
    }

    fn declare_entry(&mut self, main: Word) {
        self.b.entry_point(self.model, main, "main", self.interface.clone());
        match self.model {
            ExecutionModel::Fragment => self.b.execution_mode(main, ExecutionMode::OriginUpperLeft, []),
            ExecutionModel::GLCompute => self.b.execution_mode(main, ExecutionMode::LocalSize, [8, 8, 1]),
            _ => {}
        }
    }

    /// Declare the entry point and load the module.
    pub fn finish(mut self, main: Word) -> Ir {
        self.declare_entry(main);
        let module = self.b.module();
        loader::from_module(&module).expect("fixture loads")
    }

    /// Declare the entry point and encode the module as SPIR-V words.
    pub fn assemble(mut self, main: Word) -> Vec<u32> {
        use rspirv::binary::Assemble;

        self.declare_entry(main);
        self.b.module().assemble()
    }

    pub fn compile(self, main: Word, options: Options) -> Result<String> {
        let ir = self.finish(main);
        CompilerMsl::new(ir, options).compile()
    }
}

/// Compile with default options and panic on failure.
pub(crate) fn compile_ok(builder: ShaderBuilder, main: Word) -> String {
    match builder.compile(main, Options::default()) {
        Ok(msl) => msl,
        Err(e) => panic!("compilation failed: {}", e),
    }
}

/// Assert every line of `expected` appears, trimmed, in `msl`.
pub(crate) fn assert_lines(msl: &str, expected: &[&str]) {
    let lines: Vec<&str> = msl.lines().map(str::trim).collect();
    for want in expected {
        assert!(lines.contains(want), "missing line `{}` in:\n{}", want, msl);
    }
}
