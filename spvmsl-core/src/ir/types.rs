//! Type records.
//!
//! Derived types (vectors, matrices, arrays, pointers) copy the shape of the
//! type they wrap, so a pointer to a `float3[4]` still answers `vecsize == 3`
//! and `array.len() == 1`. `parent_type` links back to the wrapped type and
//! `base_id` always names the innermost non-array, non-pointer type, which is
//! where struct member metadata lives.

use rspirv::spirv::{AccessQualifier, Dim, ImageFormat, StorageClass, Word};

pub type Id = Word;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseType {
    Unknown,
    Void,
    Boolean,
    SByte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Int64,
    UInt64,
    Half,
    Float,
    Double,
    Struct,
    Image,
    SampledImage,
    Sampler,
}

impl BaseType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            BaseType::SByte
                | BaseType::UByte
                | BaseType::Short
                | BaseType::UShort
                | BaseType::Int
                | BaseType::UInt
                | BaseType::Int64
                | BaseType::UInt64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(self, BaseType::SByte | BaseType::Short | BaseType::Int | BaseType::Int64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, BaseType::Half | BaseType::Float | BaseType::Double)
    }

    pub fn is_opaque(self) -> bool {
        matches!(self, BaseType::Image | BaseType::SampledImage | BaseType::Sampler)
    }

    /// Signed/unsigned integer of the same width.
    pub fn with_signedness(self, signed: bool) -> BaseType {
        match (self, signed) {
            (BaseType::SByte | BaseType::UByte, true) => BaseType::SByte,
            (BaseType::SByte | BaseType::UByte, false) => BaseType::UByte,
            (BaseType::Short | BaseType::UShort, true) => BaseType::Short,
            (BaseType::Short | BaseType::UShort, false) => BaseType::UShort,
            (BaseType::Int64 | BaseType::UInt64, true) => BaseType::Int64,
            (BaseType::Int64 | BaseType::UInt64, false) => BaseType::UInt64,
            (BaseType::Int | BaseType::UInt, true) => BaseType::Int,
            (BaseType::Int | BaseType::UInt, false) => BaseType::UInt,
            (other, _) => other,
        }
    }
}

/// One array dimension. `Literal(0)` is a runtime-sized array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArraySize {
    Literal(u32),
    SpecConstant(Id),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub sampled_type: Id,
    pub dim: Dim,
    pub depth: bool,
    pub arrayed: bool,
    pub ms: bool,
    /// 1 = used with a sampler, 2 = storage image.
    pub sampled: u32,
    pub format: ImageFormat,
    pub access: Option<AccessQualifier>,
}

#[derive(Debug, Clone)]
pub struct Type {
    pub basetype: BaseType,
    /// Bit width of the scalar component.
    pub width: u32,
    pub vecsize: u32,
    pub columns: u32,
    /// Array dimensions, innermost first.
    pub array: Vec<ArraySize>,
    pub pointer: bool,
    pub storage: StorageClass,
    pub parent_type: Option<Id>,
    pub base_id: Id,
    pub member_types: Vec<Id>,
    pub image: Option<ImageInfo>,
}

impl Type {
    pub fn new(basetype: BaseType, width: u32) -> Self {
        Type {
            basetype,
            width,
            vecsize: 1,
            columns: 1,
            array: Vec::new(),
            pointer: false,
            storage: StorageClass::Generic,
            parent_type: None,
            base_id: 0,
            member_types: Vec::new(),
            image: None,
        }
    }

    pub fn vector(basetype: BaseType, width: u32, vecsize: u32) -> Self {
        Type {
            vecsize,
            ..Type::new(basetype, width)
        }
    }

    /// Pointer to `pointee`, which is stored at `pointee_id`.
    pub fn pointer_to(pointee: &Type, pointee_id: Id, storage: StorageClass) -> Self {
        Type {
            pointer: true,
            storage,
            parent_type: Some(pointee_id),
            ..pointee.clone()
        }
    }

    /// Array of `elem` with one more (outermost) dimension.
    pub fn array_of(elem: &Type, elem_id: Id, size: ArraySize) -> Self {
        let mut ty = elem.clone();
        ty.array.push(size);
        ty.pointer = false;
        ty.parent_type = Some(elem_id);
        ty
    }

    pub fn is_scalar(&self) -> bool {
        self.vecsize == 1 && self.columns == 1 && self.array.is_empty() && !self.is_struct()
    }

    pub fn is_vector(&self) -> bool {
        self.vecsize > 1 && self.columns == 1 && self.array.is_empty()
    }

    pub fn is_matrix(&self) -> bool {
        self.columns > 1 && self.array.is_empty()
    }

    pub fn is_array(&self) -> bool {
        !self.array.is_empty()
    }

    pub fn is_struct(&self) -> bool {
        self.basetype == BaseType::Struct
    }

    pub fn is_opaque(&self) -> bool {
        self.basetype.is_opaque()
    }

    /// Size of the outermost array dimension, if it is a literal.
    pub fn outer_array_literal(&self) -> Option<u32> {
        match self.array.last() {
            Some(ArraySize::Literal(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn is_runtime_array(&self) -> bool {
        matches!(self.array.last(), Some(ArraySize::Literal(0)))
    }

    pub fn dim(&self) -> Option<Dim> {
        self.image.as_ref().map(|img| img.dim)
    }
}
