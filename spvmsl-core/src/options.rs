//! Backend configuration.
//!
//! Options are plain data and deserialize from JSON so a driver can keep
//! per-pipeline settings in a file.

use rspirv::spirv::ExecutionModel;
use serde::Deserialize;

/// Descriptor set used to match push constant blocks in the binding table.
pub const PUSH_CONSTANT_DESCRIPTOR_SET: u32 = u32::MAX;
/// Binding used to match push constant blocks in the binding table.
pub const PUSH_CONSTANT_BINDING: u32 = 0;
/// Descriptor set of the synthesized swizzle side-channel buffer. Chosen so
/// it never collides with a user binding.
pub const AUX_BUFFER_DESCRIPTOR_SET: u32 = u32::MAX - 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    #[default]
    Macos,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    pub platform: Platform,
    /// `major * 10000 + minor * 100 + patch`.
    pub msl_version: u32,
    /// Width of the 2D textures standing in for texel buffers.
    pub texel_buffer_texture_width: u32,
    pub aux_buffer_index: u32,
    pub shader_output_buffer_index: u32,
    pub indirect_params_buffer_index: u32,
    pub enable_point_size_builtin: bool,
    pub disable_rasterization: bool,
    pub capture_output_to_buffer: bool,
    pub swizzle_texture_samples: bool,
    /// Widen fragment outputs to four components.
    pub pad_fragment_output_components: bool,
    /// Remap clip-space Z from [-w, w] to [0, w] after the position write.
    pub fixup_clipspace: bool,
    pub flip_vert_y: bool,
    pub vertex_attributes: Vec<VertexAttr>,
    pub resource_bindings: Vec<ResourceBinding>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            platform: Platform::Macos,
            msl_version: make_msl_version(1, 2, 0),
            texel_buffer_texture_width: 4096,
            aux_buffer_index: 0,
            shader_output_buffer_index: 28,
            indirect_params_buffer_index: 29,
            enable_point_size_builtin: true,
            disable_rasterization: false,
            capture_output_to_buffer: false,
            swizzle_texture_samples: false,
            pad_fragment_output_components: false,
            fixup_clipspace: false,
            flip_vert_y: false,
            vertex_attributes: Vec::new(),
            resource_bindings: Vec::new(),
        }
    }
}

pub fn make_msl_version(major: u32, minor: u32, patch: u32) -> u32 {
    major * 10000 + minor * 100 + patch
}

impl Options {
    pub fn is_ios(&self) -> bool {
        self.platform == Platform::Ios
    }

    pub fn is_macos(&self) -> bool {
        self.platform == Platform::Macos
    }

    pub fn set_msl_version(&mut self, major: u32, minor: u32, patch: u32) {
        self.msl_version = make_msl_version(major, minor, patch);
    }

    pub fn supports_msl_version(&self, major: u32, minor: u32) -> bool {
        self.msl_version >= make_msl_version(major, minor, 0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VertexFormat {
    #[default]
    Other,
    Uint8,
    Uint16,
}

/// Maps a vertex input location to its Metal buffer layout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VertexAttr {
    pub location: u32,
    pub msl_buffer: u32,
    pub msl_offset: u32,
    pub msl_stride: u32,
    pub per_instance: bool,
    pub format: VertexFormat,
    /// Set by the compiler when the shader reads this location.
    #[serde(skip)]
    pub used_by_shader: bool,
}

/// Maps a (stage, descriptor set, binding) triple to Metal argument slots.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceBinding {
    #[serde(with = "execution_model_name")]
    pub stage: ExecutionModel,
    pub desc_set: u32,
    pub binding: u32,
    #[serde(default)]
    pub msl_buffer: u32,
    #[serde(default)]
    pub msl_texture: u32,
    #[serde(default)]
    pub msl_sampler: u32,
    /// Set by the compiler when the shader uses this binding.
    #[serde(skip)]
    pub used_by_shader: bool,
}

mod execution_model_name {
    use rspirv::spirv::ExecutionModel;
    use serde::{Deserialize, Deserializer, de::Error};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ExecutionModel, D::Error> {
        let name = String::deserialize(deserializer)?;
        match name.to_ascii_lowercase().as_str() {
            "vertex" => Ok(ExecutionModel::Vertex),
            "fragment" => Ok(ExecutionModel::Fragment),
            "compute" | "kernel" | "glcompute" => Ok(ExecutionModel::GLCompute),
            "tesscontrol" => Ok(ExecutionModel::TessellationControl),
            "tessevaluation" => Ok(ExecutionModel::TessellationEvaluation),
            other => Err(D::Error::custom(format!("unknown stage '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Options::default();
        assert!(opts.is_macos());
        assert_eq!(opts.msl_version, 10200);
        assert!(opts.supports_msl_version(1, 2));
        assert!(!opts.supports_msl_version(2, 0));
        assert_eq!(opts.texel_buffer_texture_width, 4096);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{
            "platform": "ios",
            "msl_version": 20000,
            "resource_bindings": [
                { "stage": "fragment", "desc_set": 0, "binding": 1, "msl_texture": 3 }
            ],
            "vertex_attributes": [ { "location": 2, "format": "uint8" } ]
        }"#;
        let opts: Options = serde_json::from_str(json).unwrap();
        assert!(opts.is_ios());
        assert!(opts.supports_msl_version(2, 0));
        assert!(opts.enable_point_size_builtin);
        assert_eq!(opts.resource_bindings[0].stage, ExecutionModel::Fragment);
        assert_eq!(opts.resource_bindings[0].msl_texture, 3);
        assert!(!opts.resource_bindings[0].used_by_shader);
        assert_eq!(opts.vertex_attributes[0].format, VertexFormat::Uint8);
    }

    #[test]
    fn test_unknown_stage_is_rejected() {
        let json = r#"{ "resource_bindings": [ { "stage": "mesh", "desc_set": 0, "binding": 0 } ] }"#;
        assert!(serde_json::from_str::<Options>(json).is_err());
    }
}
