//! Identifier naming.
//!
//! Names come from debug names when present and fall back to `_<id>`.
//! Inside the entry point a variable that was moved into an interface
//! struct answers with its qualified alias instead (e.g. `in.uv`).

use log::trace;

use crate::error::Result;
use crate::ir::Id;

use super::CompilerMsl;

/// Identifiers that collide with MSL keywords or Metal library macros.
const RESERVED_NAMES: &[&str] = &[
    "kernel",
    "vertex",
    "fragment",
    "compute",
    "bias",
    "assert",
    "texture",
    "sampler",
    "constant",
    "device",
    "threadgroup",
    "thread",
    "VARIABLE_TRACEPOINT",
    "STATIC_DATA_TRACEPOINT",
    "STATIC_DATA_TRACEPOINT_V",
    "METAL_ALIGN",
    "METAL_ASM",
    "METAL_CONST",
    "METAL_DEPRECATED",
    "METAL_ENABLE_IF",
    "METAL_FUNC",
    "METAL_INTERNAL",
    "METAL_NON_NULL_RETURN",
    "METAL_NORETURN",
    "METAL_NOTHROW",
    "METAL_PURE",
    "METAL_UNAVAILABLE",
    "METAL_IMPLICIT",
    "METAL_EXPLICIT",
    "METAL_CONST_ARG",
    "METAL_ARG_UNIFORM",
    "METAL_ZERO_ARG",
    "METAL_VALID_LOD_ARG",
    "METAL_VALID_LEVEL_ARG",
    "METAL_VALID_STORE_ORDER",
    "METAL_VALID_LOAD_ORDER",
    "METAL_VALID_COMPARE_EXCHANGE_FAILURE_ORDER",
    "METAL_COMPATIBLE_COMPARE_EXCHANGE_ORDERS",
    "METAL_VALID_RENDER_TARGET",
    "is_function_constant_defined",
    "CHAR_BIT",
    "SCHAR_MAX",
    "SCHAR_MIN",
    "UCHAR_MAX",
    "CHAR_MAX",
    "CHAR_MIN",
    "USHRT_MAX",
    "SHRT_MAX",
    "SHRT_MIN",
    "UINT_MAX",
    "INT_MAX",
    "INT_MIN",
    "FLT_DIG",
    "FLT_MANT_DIG",
    "FLT_MAX",
    "FLT_MIN",
    "FLT_EPSILON",
    "FP_ILOGB0",
    "FP_ILOGBNAN",
    "INFINITY",
    "NAN",
    "MAXFLOAT",
    "HUGE_VALF",
    "MAXHALF",
    "M_PI_F",
    "M_E_F",
];

/// Function names that collide with Metal entry points or library functions.
const RESERVED_FUNCTION_NAMES: &[&str] = &[
    "main",
    "saturate",
    "assert",
    "kernel",
    "vertex",
    "fragment",
    "is_function_constant_defined",
    "INFINITY",
    "NAN",
];

pub(crate) fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

pub(crate) fn is_reserved_function(name: &str) -> bool {
    RESERVED_FUNCTION_NAMES.contains(&name)
}

/// Names of the form `_<digit>...` are reserved for temporaries; prefix them.
pub(crate) fn ensure_valid_name(name: &str, prefix: &str) -> String {
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'_' && bytes[1].is_ascii_digit() {
        format!("{}{}", prefix, name)
    } else {
        name.to_string()
    }
}

/// Map a debug name onto the identifier alphabet. Double underscores are
/// reserved in C++ and are collapsed.
pub(crate) fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '_' };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    if out.as_bytes().first().is_some_and(|b| b.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

impl CompilerMsl {
    /// Rename variables, members and functions whose names are not legal MSL.
    pub(crate) fn replace_illegal_names(&mut self) -> Result<()> {
        let var_ids: Vec<Id> = self.ir.variables().map(|(id, _)| id).collect();
        for id in var_ids {
            let name = sanitize(self.ir.name(id));
            if name.is_empty() {
                continue;
            }
            let name = if is_reserved(&name) { format!("{}0", name) } else { name };
            self.ir.set_name(id, name);
        }

        for id in self.ir.function_ids() {
            let name = sanitize(self.ir.name(id));
            if name.is_empty() {
                continue;
            }
            let name = if is_reserved_function(&name) || is_reserved(&name) {
                format!("{}0", name)
            } else {
                name
            };
            self.ir.set_name(id, name);
        }

        let struct_ids: Vec<Id> = self.ir.types().filter(|(_, t)| t.is_struct()).map(|(id, _)| id).collect();
        for id in struct_ids {
            let member_count = self.ir.get_type(id)?.member_types.len() as u32;
            for index in 0..member_count {
                let name = sanitize(self.ir.member_name(id, index));
                if name.is_empty() {
                    continue;
                }
                let name = if is_reserved(&name) { format!("{}0", name) } else { name };
                self.ir.set_member_name(id, index, name);
            }
            let name = sanitize(self.ir.name(id));
            if !name.is_empty() {
                let name = if is_reserved(&name) { format!("{}0", name) } else { name };
                self.ir.set_name(id, name);
            }
        }

        // The entry point keeps its declared name in sync with the function.
        let entry = self.entry;
        let mut name = sanitize(&self.ir.entry_point()?.name);
        if is_reserved_function(&name) || is_reserved(&name) {
            name.push('0');
        }
        trace!("entry point {} named {}", entry, name);
        if let Some(ep) = self.ir.entry_points.get_mut(&entry) {
            ep.name = name.clone();
        }
        self.ir.set_name(entry, name);
        Ok(())
    }

    pub(crate) fn in_entry_function(&self) -> bool {
        self.state.current_function == Some(self.entry)
    }

    /// Name of any id, honoring qualified aliases inside the entry point.
    pub(crate) fn to_name(&self, id: Id) -> String {
        if self.in_entry_function() {
            if let Some(alias) = self.ir.qualified_alias(id) {
                return alias.to_string();
            }
        }
        self.plain_name(id)
    }

    /// Name of an id ignoring aliases.
    pub(crate) fn plain_name(&self, id: Id) -> String {
        let name = self.ir.name(id);
        if name.is_empty() {
            format!("_{}", id)
        } else {
            name.to_string()
        }
    }

    pub(crate) fn member_name(&self, struct_id: Id, index: u32) -> String {
        let name = self.ir.member_name(struct_id, index);
        if name.is_empty() {
            format!("_m{}", index)
        } else {
            name.to_string()
        }
    }

    pub(crate) fn entry_name(&self) -> String {
        self.plain_name(self.entry)
    }

    /// Sampler paired with an image expression: `tex` -> `texSmplr`,
    /// `tex[2]` -> `texSmplr[2]`.
    pub(crate) fn to_sampler_expression(&self, id: Id) -> Result<String> {
        if let Some(&(_, sampler)) = self.state.sampled_images.get(&id) {
            return self.to_expression(sampler);
        }
        Ok(insert_suffix(&self.to_expression(id)?, "Smplr"))
    }

    pub(crate) fn to_swizzle_expression(&self, id: Id) -> Result<String> {
        let image = match self.state.sampled_images.get(&id) {
            Some(&(image, _)) => image,
            None => id,
        };
        Ok(insert_suffix(&self.to_expression(image)?.replace('.', "_"), "Swzl"))
    }
}

fn insert_suffix(expr: &str, suffix: &str) -> String {
    match expr.find('[') {
        Some(index) => format!("{}{}{}", &expr[..index], suffix, &expr[index..]),
        None => format!("{}{}", expr, suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_valid_name() {
        assert_eq!(ensure_valid_name("_12", "m"), "m_12");
        assert_eq!(ensure_valid_name("_x", "m"), "_x");
        assert_eq!(ensure_valid_name("color", "v"), "color");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a.b"), "a_b");
        assert_eq!(sanitize("x__y"), "x_y");
        assert_eq!(sanitize("3d"), "_3d");
    }

    #[test]
    fn test_insert_suffix_before_index() {
        assert_eq!(insert_suffix("tex", "Smplr"), "texSmplr");
        assert_eq!(insert_suffix("tex[2]", "Swzl"), "texSwzl[2]");
    }

    #[test]
    fn test_reserved() {
        assert!(is_reserved("texture"));
        assert!(is_reserved_function("main"));
        assert!(!is_reserved("color"));
    }
}
