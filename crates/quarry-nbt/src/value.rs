use crate::tag::TagType;

/// One node of an NBT tree.
///
/// Compounds keep their entries in insertion order so a tree written back
/// out matches what was read.
#[derive(Debug, Clone, PartialEq)]
pub enum NbtValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(Vec<NbtValue>),
    Compound(Vec<(String, NbtValue)>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl NbtValue {
    /// An empty compound.
    pub fn compound() -> Self {
        NbtValue::Compound(Vec::new())
    }

    pub fn tag_type(&self) -> TagType {
        match self {
            NbtValue::Byte(_) => TagType::Byte,
            NbtValue::Short(_) => TagType::Short,
            NbtValue::Int(_) => TagType::Int,
            NbtValue::Long(_) => TagType::Long,
            NbtValue::Float(_) => TagType::Float,
            NbtValue::Double(_) => TagType::Double,
            NbtValue::ByteArray(_) => TagType::ByteArray,
            NbtValue::String(_) => TagType::String,
            NbtValue::List(_) => TagType::List,
            NbtValue::Compound(_) => TagType::Compound,
            NbtValue::IntArray(_) => TagType::IntArray,
            NbtValue::LongArray(_) => TagType::LongArray,
        }
    }

    /// Look up a key in a compound. Returns `None` for other tag types.
    pub fn get(&self, key: &str) -> Option<&NbtValue> {
        self.entries()?
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Set `key` in a compound, replacing an existing entry in place.
    /// Returns the previous value. Does nothing on other tag types.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<NbtValue>) -> Option<NbtValue> {
        let NbtValue::Compound(entries) = self else {
            return None;
        };
        let key = key.into();
        let value = value.into();
        match entries.iter_mut().find(|(name, _)| *name == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                entries.push((key, value));
                None
            }
        }
    }

    pub fn entries(&self) -> Option<&[(String, NbtValue)]> {
        match self {
            NbtValue::Compound(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[NbtValue]> {
        match self {
            NbtValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Integer value of any integral tag that fits an `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            NbtValue::Byte(v) => Some(v.into()),
            NbtValue::Short(v) => Some(v.into()),
            NbtValue::Int(v) => Some(v),
            NbtValue::Long(v) => i32::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            NbtValue::Long(v) => Some(v),
            _ => self.as_i32().map(i64::from),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            NbtValue::Float(v) => Some(v.into()),
            NbtValue::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NbtValue::String(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for NbtValue {
                fn from(v: $ty) -> Self {
                    NbtValue::$variant(v)
                }
            }
        )*
    };
}

from_primitive! {
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<i8> => ByteArray,
    Vec<i32> => IntArray,
    Vec<i64> => LongArray,
}

impl From<bool> for NbtValue {
    fn from(v: bool) -> Self {
        NbtValue::Byte(v as i8)
    }
}

impl From<&str> for NbtValue {
    fn from(v: &str) -> Self {
        NbtValue::String(v.to_string())
    }
}

/// Build a compound tag. Values go through `NbtValue::from`.
#[macro_export]
macro_rules! nbt_compound {
    ($($key:expr => $val:expr),* $(,)?) => {
        $crate::NbtValue::Compound(vec![
            $(($key.into(), $crate::NbtValue::from($val))),*
        ])
    };
}

/// Build a list tag. Values go through `NbtValue::from`.
#[macro_export]
macro_rules! nbt_list {
    ($($val:expr),* $(,)?) => {
        $crate::NbtValue::List(vec![$($crate::NbtValue::from($val)),*])
    };
}
