//! Value types shared by the frontend and every backend.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

/// Access mode of a series handle. Fixed for the handle's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Open existing data, no modification.
    ReadOnly,
    /// Open existing data and allow modification.
    ReadWrite,
    /// Create new data, truncating whatever existed.
    Create,
    /// Add to existing data without parsing what is already there.
    Append,
}

impl Access {
    /// Returns true for [`Access::ReadOnly`].
    pub fn is_read_only(self) -> bool {
        self == Access::ReadOnly
    }

    /// Returns true for every mode that may stage write operations.
    pub fn is_writable(self) -> bool {
        !self.is_read_only()
    }

    /// Returns true if opening in this mode parses existing content.
    pub fn reads_existing(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::ReadOnly => write!(f, "read-only"),
            Access::ReadWrite => write!(f, "read-write"),
            Access::Create => write!(f, "create"),
            Access::Append => write!(f, "append"),
        }
    }
}

/// How far a flush pass goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlushLevel {
    /// Flush requested by the user: stage everything and execute the queue.
    #[default]
    UserFlush,
    /// Flush issued by the library itself, e.g. during read discovery.
    InternalFlush,
    /// Stage structure only; chunk payloads stay in memory and the
    /// queue is not executed.
    SkeletonOnly,
}

/// Parameters handed down a flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushParams {
    /// Flush level.
    pub level: FlushLevel,
}

impl FlushParams {
    /// Parameters for a user-requested flush.
    pub const USER: FlushParams = FlushParams {
        level: FlushLevel::UserFlush,
    };

    /// Parameters for flushes issued internally while reading.
    pub const INTERNAL: FlushParams = FlushParams {
        level: FlushLevel::InternalFlush,
    };

    /// Parameters for a structure-only pass.
    pub const SKELETON: FlushParams = FlushParams {
        level: FlushLevel::SkeletonOnly,
    };

    /// Returns true if chunk payloads should be staged in this pass.
    pub fn stages_payload(&self) -> bool {
        self.level != FlushLevel::SkeletonOnly
    }
}

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl Datatype {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Datatype::I8 | Datatype::U8 => 1,
            Datatype::I16 | Datatype::U16 => 2,
            Datatype::I32 | Datatype::U32 | Datatype::F32 => 4,
            Datatype::I64 | Datatype::U64 | Datatype::F64 => 8,
        }
    }

    /// Returns true for the floating point types.
    pub fn is_float(self) -> bool {
        matches!(self, Datatype::F32 | Datatype::F64)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Datatype::I8 => "i8",
            Datatype::I16 => "i16",
            Datatype::I32 => "i32",
            Datatype::I64 => "i64",
            Datatype::U8 => "u8",
            Datatype::U16 => "u16",
            Datatype::U32 => "u32",
            Datatype::U64 => "u64",
            Datatype::F32 => "f32",
            Datatype::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Shape of a dataset or of a chunk within it.
pub type Extent = Vec<u64>;

/// Number of elements covered by `extent`, `None` on overflow. An empty
/// extent holds one element.
pub fn num_elements(extent: &[u64]) -> Option<u64> {
    extent.iter().try_fold(1u64, |n, &d| n.checked_mul(d))
}

/// Bytes needed for `extent` elements of `dtype`, `None` if that does not
/// fit in `usize`.
pub fn byte_len(extent: &[u64], dtype: Datatype) -> Option<usize> {
    num_elements(extent)
        .and_then(|n| usize::try_from(n).ok())
        .and_then(|n| n.checked_mul(dtype.size()))
}

/// Attribute value attached to a group or dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    F64(f64),
    I64(i64),
    U64(u64),
    String(String),
    F64Array(Vec<f64>),
    I64Array(Vec<i64>),
    U64Array(Vec<u64>),
    StringArray(Vec<String>),
}

impl AttrValue {
    /// Numeric scalar as `f64`, if this is a numeric scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::F64(v) => Some(*v),
            AttrValue::I64(v) => Some(*v as f64),
            AttrValue::U64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Non-negative integer scalar as `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttrValue::U64(v) => Some(*v),
            AttrValue::I64(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Extent-like value: a `u64` array, or a non-negative `i64` array.
    pub fn as_extent(&self) -> Option<Extent> {
        match self {
            AttrValue::U64Array(v) => Some(v.clone()),
            AttrValue::I64Array(v) => v.iter().map(|&x| u64::try_from(x).ok()).collect(),
            _ => None,
        }
    }

    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::F64(_) => "f64",
            AttrValue::I64(_) => "i64",
            AttrValue::U64(_) => "u64",
            AttrValue::String(_) => "string",
            AttrValue::F64Array(_) => "f64[]",
            AttrValue::I64Array(_) => "i64[]",
            AttrValue::U64Array(_) => "u64[]",
            AttrValue::StringArray(_) => "string[]",
        }
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::F64(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::I64(v)
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        AttrValue::U64(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::String(v)
    }
}

/// A primitive that can be stored in a dataset.
///
/// Payloads travel through the queue as little-endian byte buffers.
pub trait Element: Copy + PartialEq + fmt::Debug + 'static {
    /// Dataset element type for `Self`.
    const DATATYPE: Datatype;

    /// Encode `values` as little-endian bytes.
    fn encode(values: &[Self]) -> Vec<u8>;

    /// Decode little-endian bytes. Trailing bytes that do not form a whole
    /// element are ignored.
    fn decode(bytes: &[u8]) -> Vec<Self>;

    /// Convert a numeric attribute into `Self`.
    fn from_attr(value: &AttrValue) -> Option<Self>;

    /// Convert `self` into the attribute form used for constant components.
    fn to_attr(self) -> AttrValue;
}

macro_rules! impl_element_byteorder {
    ($t:ty, $dt:ident, $size:expr, $write:ident, $read:ident, $attr:ident, $attr_ty:ty) => {
        impl Element for $t {
            const DATATYPE: Datatype = Datatype::$dt;

            fn encode(values: &[Self]) -> Vec<u8> {
                let mut out = vec![0u8; values.len() * $size];
                LittleEndian::$write(values, &mut out);
                out
            }

            fn decode(bytes: &[u8]) -> Vec<Self> {
                let n = bytes.len() / $size;
                let mut out = vec![<$t>::default(); n];
                LittleEndian::$read(&bytes[..n * $size], &mut out);
                out
            }

            fn from_attr(value: &AttrValue) -> Option<Self> {
                match value {
                    AttrValue::F64(v) => Some(*v as $t),
                    AttrValue::I64(v) => Some(*v as $t),
                    AttrValue::U64(v) => Some(*v as $t),
                    _ => None,
                }
            }

            fn to_attr(self) -> AttrValue {
                AttrValue::$attr(self as $attr_ty)
            }
        }
    };
}

impl_element_byteorder!(i16, I16, 2, write_i16_into, read_i16_into, I64, i64);
impl_element_byteorder!(i32, I32, 4, write_i32_into, read_i32_into, I64, i64);
impl_element_byteorder!(i64, I64, 8, write_i64_into, read_i64_into, I64, i64);
impl_element_byteorder!(u16, U16, 2, write_u16_into, read_u16_into, U64, u64);
impl_element_byteorder!(u32, U32, 4, write_u32_into, read_u32_into, U64, u64);
impl_element_byteorder!(u64, U64, 8, write_u64_into, read_u64_into, U64, u64);
impl_element_byteorder!(f32, F32, 4, write_f32_into, read_f32_into, F64, f64);
impl_element_byteorder!(f64, F64, 8, write_f64_into, read_f64_into, F64, f64);

impl Element for u8 {
    const DATATYPE: Datatype = Datatype::U8;

    fn encode(values: &[Self]) -> Vec<u8> {
        values.to_vec()
    }

    fn decode(bytes: &[u8]) -> Vec<Self> {
        bytes.to_vec()
    }

    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::F64(v) => Some(*v as u8),
            AttrValue::I64(v) => Some(*v as u8),
            AttrValue::U64(v) => Some(*v as u8),
            _ => None,
        }
    }

    fn to_attr(self) -> AttrValue {
        AttrValue::U64(u64::from(self))
    }
}

impl Element for i8 {
    const DATATYPE: Datatype = Datatype::I8;

    fn encode(values: &[Self]) -> Vec<u8> {
        values.iter().map(|&v| v as u8).collect()
    }

    fn decode(bytes: &[u8]) -> Vec<Self> {
        bytes.iter().map(|&b| b as i8).collect()
    }

    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::F64(v) => Some(*v as i8),
            AttrValue::I64(v) => Some(*v as i8),
            AttrValue::U64(v) => Some(*v as i8),
            _ => None,
        }
    }

    fn to_attr(self) -> AttrValue {
        AttrValue::I64(i64::from(self))
    }
}

/// Datatype recorded for a constant component whose value is `value`.
pub fn datatype_of_attr(value: &AttrValue) -> Option<Datatype> {
    match value {
        AttrValue::F64(_) => Some(Datatype::F64),
        AttrValue::I64(_) => Some(Datatype::I64),
        AttrValue::U64(_) => Some(Datatype::U64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datatype_sizes() {
        assert_eq!(Datatype::I8.size(), 1);
        assert_eq!(Datatype::U16.size(), 2);
        assert_eq!(Datatype::F32.size(), 4);
        assert_eq!(Datatype::F64.size(), 8);
        assert!(Datatype::F32.is_float());
        assert!(!Datatype::U64.is_float());
    }

    #[test]
    fn element_encoding_is_little_endian() {
        let bytes = u32::encode(&[1, 0x0102_0304]);
        assert_eq!(bytes, vec![1, 0, 0, 0, 4, 3, 2, 1]);
        assert_eq!(u32::decode(&bytes), vec![1, 0x0102_0304]);
    }

    #[test]
    fn decode_ignores_partial_trailing_element() {
        let mut bytes = f64::encode(&[2.5]);
        bytes.push(0xff);
        assert_eq!(f64::decode(&bytes), vec![2.5]);
    }

    #[test]
    fn element_from_attr() {
        assert_eq!(f32::from_attr(&AttrValue::F64(1.5)), Some(1.5));
        assert_eq!(i32::from_attr(&AttrValue::U64(7)), Some(7));
        assert_eq!(u8::from_attr(&AttrValue::String("x".into())), None);
        assert_eq!(3.0f32.to_attr(), AttrValue::F64(3.0));
        assert_eq!((-2i16).to_attr(), AttrValue::I64(-2));
    }

    #[test]
    fn attr_value_accessors() {
        assert_eq!(AttrValue::I64(4).as_u64(), Some(4));
        assert_eq!(AttrValue::I64(-4).as_u64(), None);
        assert_eq!(AttrValue::U64(2).as_f64(), Some(2.0));
        assert_eq!(AttrValue::from("groupBased").as_str(), Some("groupBased"));
        assert_eq!(
            AttrValue::I64Array(vec![2, 3]).as_extent(),
            Some(vec![2, 3])
        );
        assert_eq!(AttrValue::I64Array(vec![-1]).as_extent(), None);
    }

    #[test]
    fn access_modes() {
        assert!(Access::ReadOnly.is_read_only());
        assert!(Access::Append.is_writable());
        assert!(Access::ReadWrite.reads_existing());
        assert!(!Access::Create.reads_existing());
        assert_eq!(Access::Create.to_string(), "create");
    }

    #[test]
    fn num_elements_of_scalar_extent() {
        assert_eq!(num_elements(&[]), Some(1));
        assert_eq!(num_elements(&[2, 3, 4]), Some(24));
    }

    #[test]
    fn oversized_extents_do_not_overflow() {
        assert_eq!(num_elements(&[u64::MAX, 2]), None);
        assert_eq!(num_elements(&[u64::MAX, 0]), Some(0));
        assert_eq!(byte_len(&[u64::MAX], Datatype::F64), None);
        assert_eq!(byte_len(&[2, 3], Datatype::F32), Some(24));
    }

    #[test]
    fn skeleton_flush_skips_payload() {
        assert!(FlushParams::USER.stages_payload());
        assert!(!FlushParams::SKELETON.stages_payload());
        assert_eq!(FlushParams::default(), FlushParams::USER);
    }
}
