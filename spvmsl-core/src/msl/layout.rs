//! Struct member size, alignment and packing under Metal's layout rules.
//!
//! Metal aligns and sizes three-component vectors like four-component ones,
//! while SPIR-V offsets may place them tighter. Members that would overrun
//! their declared slot are marked packed; members that sit further out than
//! Metal would place them get explicit padding.
//!
//! Members are always visited in ascending declared offset (builtins last),
//! never by declaration index, and their indices are never changed.

use log::trace;
use rspirv::spirv::Decoration;

use crate::error::Result;
use crate::ir::{ArraySize, BaseType, Id, Ir, Type};
use crate::{bail_module, bail_unsupported};

/// Number of elements of a single array dimension; runtime arrays count as
/// zero and specialization constants use their default value.
pub fn array_size_literal(ir: &Ir, size: ArraySize) -> u32 {
    match size {
        ArraySize::Literal(n) => n,
        ArraySize::SpecConstant(id) => ir.constant_u32(id).unwrap_or(0),
    }
}

fn member_type(ir: &Ir, struct_id: Id, index: u32) -> Result<(Id, &Type)> {
    let st = ir.get_type(struct_id)?;
    let type_id = *st
        .member_types
        .get(index as usize)
        .ok_or_else(|| crate::err_internal!("struct {} has no member {}", struct_id, index))?;
    Ok((type_id, ir.get_type(type_id)?))
}

fn member_offset(ir: &Ir, struct_id: Id, index: u32) -> u32 {
    ir.get_member_decoration(struct_id, index, Decoration::Offset)
}

/// Declared array stride of an array member.
pub fn member_array_stride(ir: &Ir, struct_id: Id, index: u32) -> Result<u32> {
    let (type_id, _) = member_type(ir, struct_id, index)?;
    if !ir.has_decoration(type_id, Decoration::ArrayStride) {
        bail_module!("struct {} member {} does not have ArrayStride set", struct_id, index);
    }
    Ok(ir.get_decoration(type_id, Decoration::ArrayStride))
}

/// Member indices in ascending declared offset, builtins last.
pub fn members_by_offset(ir: &Ir, struct_id: Id) -> Result<Vec<u32>> {
    let count = ir.get_type(struct_id)?.member_types.len() as u32;
    let mut order: Vec<u32> = (0..count).collect();
    order.sort_by_key(|&i| {
        (
            ir.member_builtin(struct_id, i).is_some(),
            member_offset(ir, struct_id, i),
        )
    });
    Ok(order)
}

/// Size of a struct as the offset of its last member plus that member's size.
pub fn declared_struct_size(ir: &Ir, struct_id: Id) -> Result<u32> {
    let order = members_by_offset(ir, struct_id)?;
    match order.last() {
        Some(&last) => Ok(member_offset(ir, struct_id, last) + member_size(ir, struct_id, last)?),
        None => Ok(0),
    }
}

/// Byte size of a member as Metal lays it out.
pub fn member_size(ir: &Ir, struct_id: Id, index: u32) -> Result<u32> {
    let (_, ty) = member_type(ir, struct_id, index)?;
    if ty.is_opaque() || matches!(ty.basetype, BaseType::Void | BaseType::Unknown) {
        bail_unsupported!("Querying size of opaque object.");
    }

    if let Some(&outer) = ty.array.last() {
        let count = array_size_literal(ir, outer).max(1);
        return Ok(member_array_stride(ir, struct_id, index)? * count);
    }

    if ty.is_struct() {
        let size = declared_struct_size(ir, ty.base_id)?;
        let alignment = member_alignment(ir, struct_id, index)?;
        return Ok(align_up(size, alignment));
    }

    let component = ty.width / 8;
    let vecsize = if ty.vecsize == 3 && !ir.is_member_packed(struct_id, index) {
        4
    } else {
        ty.vecsize
    };
    Ok(component * vecsize * ty.columns)
}

/// Byte alignment of a member as Metal lays it out.
pub fn member_alignment(ir: &Ir, struct_id: Id, index: u32) -> Result<u32> {
    let (_, ty) = member_type(ir, struct_id, index)?;
    if ty.is_opaque() || matches!(ty.basetype, BaseType::Void | BaseType::Unknown) {
        bail_unsupported!("Querying alignment of opaque object.");
    }

    if ty.is_struct() {
        let inner = ty.base_id;
        let count = ir.get_type(inner)?.member_types.len() as u32;
        let mut alignment = 1;
        for i in 0..count {
            alignment = alignment.max(member_alignment(ir, inner, i)?);
        }
        return Ok(alignment);
    }

    let component = ty.width / 8;
    if ir.is_member_packed(struct_id, index) {
        // Packed scalar and two-component arrays are widened to four components.
        if ty.is_array() && ty.columns == 1 {
            return Ok(component * 4);
        }
        return Ok(component * if ty.columns == 3 { 4 } else { ty.columns });
    }
    Ok(component * if ty.vecsize == 3 { 4 } else { ty.vecsize })
}

/// Whether a member needs a narrower (or, for small arrays, wider) layout
/// than its natural Metal type gives it. `next_offset` is the declared offset
/// of the member that follows in offset order.
pub fn is_member_packable(ir: &Ir, struct_id: Id, index: u32, next_offset: Option<u32>) -> Result<bool> {
    if ir.is_member_packed(struct_id, index) {
        return Ok(true);
    }

    let (_, ty) = member_type(ir, struct_id, index)?;
    let component = ty.width / 8;
    let unpacked_size = component * if ty.vecsize == 3 { 4 } else { ty.vecsize } * ty.columns;
    let is_matrix = ty.columns > 1;

    // float[] and float2[] with a 16 byte stride.
    if ty.is_array() && !ty.is_struct() && ty.columns == 1 && ty.vecsize <= 2 {
        if member_array_stride(ir, struct_id, index)? == 4 * component {
            return Ok(true);
        }
    }

    // Array of structs whose declared stride exceeds the padded struct size.
    if ty.is_array() && ty.is_struct() {
        let alignment = member_alignment(ir, struct_id, index)?;
        let size = align_up(declared_struct_size(ir, ty.base_id)?, alignment);
        if member_array_stride(ir, struct_id, index)? > size {
            return Ok(true);
        }
    }

    if ty.vecsize == 1 || (is_matrix && ty.vecsize != 3) {
        return Ok(false);
    }
    if is_matrix && !ir.has_member_decoration(struct_id, index, Decoration::RowMajor) {
        return Ok(false);
    }

    if ty.is_array() {
        let inner: u32 = ty.array[..ty.array.len() - 1]
            .iter()
            .map(|&size| array_size_literal(ir, size).max(1))
            .product();
        return Ok(unpacked_size * inner > member_array_stride(ir, struct_id, index)?);
    }

    let offset = member_offset(ir, struct_id, index);
    if !is_matrix && offset % unpacked_size != 0 {
        return Ok(true);
    }
    match next_offset {
        Some(next) => Ok(unpacked_size > next.saturating_sub(offset)),
        None => Ok(is_matrix),
    }
}

/// Decide packing and padding for every member of a buffer struct.
///
/// Packing decisions persist on the member decorations; padding is
/// recomputed from them on every call, so repeated calls agree.
pub fn align_struct(ir: &mut Ir, struct_id: Id) -> Result<()> {
    let order = members_by_offset(ir, struct_id)?;

    for (pos, &index) in order.iter().enumerate() {
        let next = order.get(pos + 1).map(|&n| member_offset(ir, struct_id, n));
        if !ir.is_member_packed(struct_id, index) && is_member_packable(ir, struct_id, index, next)? {
            trace!("struct {} member {} packed", struct_id, index);
            ir.set_member_packed(struct_id, index);
        }
    }

    let mut current = 0u32;
    for (pos, &index) in order.iter().enumerate() {
        let alignment = member_alignment(ir, struct_id, index)?.max(1);
        let aligned = align_up(current, alignment);
        let offset = member_offset(ir, struct_id, index);
        let padding = if offset > aligned { offset - current } else { 0 };
        if padding > 0 {
            trace!("struct {} member {} padded by {} bytes", struct_id, index, padding);
        }
        ir.meta_mut(struct_id).member_mut(index).padding = padding;

        if pos + 1 < order.len() {
            current = offset + member_size(ir, struct_id, index)?;
        }
    }
    Ok(())
}

pub(crate) fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::align_up;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(4, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(13, 1), 13);
    }
}
