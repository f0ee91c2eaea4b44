//! Names and decorations attached to ids and struct members.

use std::collections::HashSet;

use rspirv::spirv::{BuiltIn, Decoration};

#[derive(Debug, Clone, Default)]
pub struct Decorations {
    pub name: String,
    flags: HashSet<Decoration>,
    pub builtin: Option<BuiltIn>,
    pub location: u32,
    pub component: u32,
    pub index: u32,
    pub binding: u32,
    pub set: u32,
    pub offset: u32,
    pub array_stride: u32,
    pub matrix_stride: u32,
    pub spec_id: u32,
    pub input_attachment: u32,

    // Backend-private tags.
    /// Member or variable narrowed to its declared layout.
    pub packed: bool,
    /// Expression used in place of the variable's own name, e.g. `in.color`.
    pub qualified_alias: Option<String>,
    /// Bytes of explicit padding emitted before this member.
    pub padding: u32,
}

impl Decorations {
    /// Empty decoration set carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Decorations {
            name: name.into(),
            ..Decorations::default()
        }
    }

    pub fn has(&self, decoration: Decoration) -> bool {
        self.flags.contains(&decoration)
    }

    pub fn get(&self, decoration: Decoration) -> u32 {
        if !self.has(decoration) {
            return 0;
        }
        match decoration {
            Decoration::BuiltIn => self.builtin.map(|b| b as u32).unwrap_or(0),
            Decoration::Location => self.location,
            Decoration::Component => self.component,
            Decoration::Index => self.index,
            Decoration::Binding => self.binding,
            Decoration::DescriptorSet => self.set,
            Decoration::Offset => self.offset,
            Decoration::ArrayStride => self.array_stride,
            Decoration::MatrixStride => self.matrix_stride,
            Decoration::SpecId => self.spec_id,
            Decoration::InputAttachmentIndex => self.input_attachment,
            _ => 1,
        }
    }

    pub fn set(&mut self, decoration: Decoration, value: u32) {
        self.flags.insert(decoration);
        match decoration {
            Decoration::BuiltIn => self.builtin = BuiltIn::from_u32(value),
            Decoration::Location => self.location = value,
            Decoration::Component => self.component = value,
            Decoration::Index => self.index = value,
            Decoration::Binding => self.binding = value,
            Decoration::DescriptorSet => self.set = value,
            Decoration::Offset => self.offset = value,
            Decoration::ArrayStride => self.array_stride = value,
            Decoration::MatrixStride => self.matrix_stride = value,
            Decoration::SpecId => self.spec_id = value,
            Decoration::InputAttachmentIndex => self.input_attachment = value,
            _ => {}
        }
    }

    pub fn unset(&mut self, decoration: Decoration) {
        self.flags.remove(&decoration);
        if decoration == Decoration::BuiltIn {
            self.builtin = None;
        }
    }

    /// Copy the interface-relevant decorations of `other` into `self`.
    pub fn inherit_interface(&mut self, other: &Decorations) {
        for decoration in [
            Decoration::Location,
            Decoration::Component,
            Decoration::Index,
            Decoration::BuiltIn,
            Decoration::Flat,
            Decoration::NoPerspective,
            Decoration::Centroid,
            Decoration::Sample,
        ] {
            if other.has(decoration) {
                self.set(decoration, other.get(decoration));
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Meta {
    pub decoration: Decorations,
    pub members: Vec<Decorations>,
}

impl Meta {
    pub fn member(&self, index: u32) -> Option<&Decorations> {
        self.members.get(index as usize)
    }

    pub fn member_mut(&mut self, index: u32) -> &mut Decorations {
        let index = index as usize;
        if self.members.len() <= index {
            self.members.resize_with(index + 1, Decorations::default);
        }
        &mut self.members[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_decorations_start_empty() {
        let mut d = Decorations::named("gl_Position");
        assert_eq!(d.name, "gl_Position");
        assert!(!d.has(Decoration::Location));
        d.set(Decoration::Location, 4);
        assert!(d.has(Decoration::Location));
        assert_eq!(d.get(Decoration::Location), 4);
        d.unset(Decoration::Location);
        assert_eq!(d.get(Decoration::Location), 0);
    }
}
