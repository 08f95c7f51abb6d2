use quarry_nbt::NbtLimits;
use serde::Deserialize;

/// Size ceilings applied to untrusted input.
#[derive(Debug, Clone, Deserialize)]
pub struct CodecLimits {
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    #[serde(default = "default_max_string_len")]
    pub max_string_len: usize,
    #[serde(default = "default_max_byte_array_len")]
    pub max_byte_array_len: usize,
    #[serde(default = "default_nbt_max_depth")]
    pub nbt_max_depth: usize,
    #[serde(default = "default_nbt_max_bytes")]
    pub nbt_max_bytes: usize,
}

fn default_max_frame_len() -> usize {
    2 * 1024 * 1024
}

fn default_max_string_len() -> usize {
    crate::MAX_STRING_LEN
}

fn default_max_byte_array_len() -> usize {
    1024 * 1024
}

fn default_nbt_max_depth() -> usize {
    512
}

fn default_nbt_max_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_frame_len: default_max_frame_len(),
            max_string_len: default_max_string_len(),
            max_byte_array_len: default_max_byte_array_len(),
            nbt_max_depth: default_nbt_max_depth(),
            nbt_max_bytes: default_nbt_max_bytes(),
        }
    }
}

impl CodecLimits {
    pub fn nbt(&self) -> NbtLimits {
        NbtLimits::new(self.nbt_max_depth, self.nbt_max_bytes)
    }
}
