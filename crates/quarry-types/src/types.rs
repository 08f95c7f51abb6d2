use quarry_nbt::NbtValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const XZ_BITS: u32 = 26;
const Y_BITS: u32 = 12;
const XZ_MASK: u64 = (1 << XZ_BITS) - 1;
const Y_MASK: u64 = (1 << Y_BITS) - 1;
const X_SHIFT: u32 = XZ_BITS + Y_BITS;
const Z_SHIFT: u32 = Y_BITS;

/// A block position in the world (x, y, z integers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const MIN_XZ: i32 = -(1 << (XZ_BITS - 1));
    pub const MAX_XZ: i32 = (1 << (XZ_BITS - 1)) - 1;
    pub const MIN_Y: i32 = -(1 << (Y_BITS - 1));
    pub const MAX_Y: i32 = (1 << (Y_BITS - 1)) - 1;

    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Whether every coordinate fits its packed field.
    pub fn is_packable(&self) -> bool {
        (Self::MIN_XZ..=Self::MAX_XZ).contains(&self.x)
            && (Self::MIN_XZ..=Self::MAX_XZ).contains(&self.z)
            && (Self::MIN_Y..=Self::MAX_Y).contains(&self.y)
    }

    /// Encode as a 64-bit long (protocol format).
    /// x: 26 bits, z: 26 bits, y: 12 bits
    ///
    /// Out-of-range coordinates are truncated to their field width; check
    /// [`BlockPos::is_packable`] first when that matters.
    pub fn encode(&self) -> u64 {
        ((self.x as u64 & XZ_MASK) << X_SHIFT)
            | ((self.z as u64 & XZ_MASK) << Z_SHIFT)
            | (self.y as u64 & Y_MASK)
    }

    pub fn decode(val: u64) -> Self {
        Self {
            x: sign_extend(val >> X_SHIFT, XZ_BITS),
            z: sign_extend((val >> Z_SHIFT) & XZ_MASK, XZ_BITS),
            y: sign_extend(val & Y_MASK, Y_BITS),
        }
    }
}

fn sign_extend(field: u64, bits: u32) -> i32 {
    let shift = 64 - bits;
    ((field << shift) as i64 >> shift) as i32
}

/// A 3D position with double precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3d {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A 3D vector with single precision (velocities, rotations).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3f {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3f {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("invalid character in identifier namespace")]
    InvalidNamespace,
    #[error("invalid character in identifier path")]
    InvalidPath,
}

/// A namespaced key (e.g., "minecraft:stone").
///
/// The namespace is implicit when it equals [`Identifier::DEFAULT_NAMESPACE`],
/// so `stone` and `minecraft:stone` name the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub namespace: String,
    pub path: String,
}

impl Identifier {
    pub const DEFAULT_NAMESPACE: &'static str = "minecraft";

    /// Build an identifier from parts that are already known to be valid.
    pub fn new(namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            path: path.into(),
        }
    }

    pub fn minecraft(path: impl Into<String>) -> Self {
        Self::new(Self::DEFAULT_NAMESPACE, path)
    }

    /// Parse and validate `namespace:path` or a bare `path`.
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let (namespace, path) = match s.split_once(':') {
            Some((ns, path)) => (ns, path),
            None => (Self::DEFAULT_NAMESPACE, s),
        };
        if path.is_empty() || namespace.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if !namespace.bytes().all(is_namespace_char) {
            return Err(IdentifierError::InvalidNamespace);
        }
        if !path.bytes().all(is_path_char) {
            return Err(IdentifierError::InvalidPath);
        }
        Ok(Self::new(namespace, path))
    }

    pub fn is_default_namespace(&self) -> bool {
        self.namespace == Self::DEFAULT_NAMESPACE
    }

    /// The wire form: the bare path in the default namespace, else `namespace:path`.
    pub fn to_wire_string(&self) -> String {
        if self.is_default_namespace() {
            self.path.clone()
        } else {
            self.to_string()
        }
    }
}

fn is_namespace_char(c: u8) -> bool {
    matches!(c, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' | b'.')
}

fn is_path_char(c: u8) -> bool {
    is_namespace_char(c) || c == b'/'
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl std::str::FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A player's game profile (UUID + name + properties).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameProfile {
    pub uuid: Uuid,
    pub name: String,
    pub properties: Vec<ProfileProperty>,
}

impl GameProfile {
    /// Offline-mode profile: a name-based UUID derived from the
    /// player name, with no properties.
    pub fn offline(name: impl Into<String>) -> Self {
        let name = name.into();
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("OfflinePlayer:{}", name).as_bytes());
        Self {
            uuid,
            name,
            properties: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    pub signature: Option<String>,
}

/// Text component for chat messages (simplified JSON text).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextComponent {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub extra: Vec<TextComponent>,
}

impl TextComponent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: None,
            bold: None,
            extra: Vec::new(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"text":""}"#.to_string())
    }
}

/// An item stack in an inventory slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemStack {
    /// Item registry ID.
    pub item_id: i32,
    /// Number of items in this stack (1-127).
    pub count: i8,
    /// Extra item data, carried opaquely.
    pub tag: Option<NbtValue>,
}

impl ItemStack {
    pub fn new(item_id: i32, count: i8) -> Self {
        Self {
            item_id,
            count,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: NbtValue) -> Self {
        self.tag = Some(tag);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_block_pos_layout() {
        let pos = BlockPos::new(1, 2, 3);
        assert_eq!(pos.encode(), (1u64 << 38) | (3u64 << 12) | 2);
    }

    #[test]
    fn test_block_pos_extremes() {
        let corners = [
            BlockPos::new(BlockPos::MIN_XZ, BlockPos::MIN_Y, BlockPos::MIN_XZ),
            BlockPos::new(BlockPos::MAX_XZ, BlockPos::MAX_Y, BlockPos::MAX_XZ),
            BlockPos::new(BlockPos::MIN_XZ, BlockPos::MAX_Y, BlockPos::MAX_XZ),
            BlockPos::new(-1, -1, -1),
        ];
        for pos in corners {
            assert!(pos.is_packable());
            assert_eq!(BlockPos::decode(pos.encode()), pos);
        }
    }

    #[test]
    fn test_block_pos_out_of_range() {
        assert!(!BlockPos::new(BlockPos::MAX_XZ + 1, 0, 0).is_packable());
        assert!(!BlockPos::new(0, BlockPos::MIN_Y - 1, 0).is_packable());
    }

    #[test]
    fn test_identifier_default_namespace() {
        let id: Identifier = "stone".parse().unwrap();
        assert_eq!(id, Identifier::minecraft("stone"));
        assert_eq!(id.to_wire_string(), "stone");

        let modded = Identifier::parse("quarry:drill/head").unwrap();
        assert_eq!(modded.to_wire_string(), "quarry:drill/head");
    }

    #[test]
    fn test_identifier_rejects_bad_chars() {
        assert_eq!(Identifier::parse("Upper:case"), Err(IdentifierError::InvalidNamespace));
        assert_eq!(Identifier::parse("ns:bad path"), Err(IdentifierError::InvalidPath));
        assert_eq!(Identifier::parse(":x"), Err(IdentifierError::Empty));
    }

    #[test]
    fn test_offline_profile_is_stable() {
        let a = GameProfile::offline("Steve");
        let b = GameProfile::offline("Steve");
        assert_eq!(a.uuid, b.uuid);
        assert_ne!(a.uuid, GameProfile::offline("Alex").uuid);
    }

    proptest! {
        #[test]
        fn block_pos_bijection(
            x in BlockPos::MIN_XZ..=BlockPos::MAX_XZ,
            y in BlockPos::MIN_Y..=BlockPos::MAX_Y,
            z in BlockPos::MIN_XZ..=BlockPos::MAX_XZ,
        ) {
            let pos = BlockPos::new(x, y, z);
            prop_assert_eq!(BlockPos::decode(pos.encode()), pos);
        }

        #[test]
        fn packed_long_bijection(raw in any::<u64>()) {
            prop_assert_eq!(BlockPos::decode(raw).encode(), raw);
        }
    }
}
