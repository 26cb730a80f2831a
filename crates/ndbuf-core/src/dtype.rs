use std::fmt;

use crate::error::{BufferError, BufferResult};

/// Element kinds a descriptor can hold.
///
/// The discriminants are the tags generated code passes across the C ABI.
/// They follow the NumPy type numbers so the generated code can reuse the
/// values it already emits for host arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ElementKind {
    /// Boolean, one byte
    Bool = 0,
    /// Signed 8-bit integer
    Int8 = 1,
    /// Signed 16-bit integer
    Int16 = 3,
    /// Signed 32-bit integer
    Int32 = 5,
    /// Signed 64-bit integer
    Int64 = 7,
    /// 32-bit IEEE 754 float
    Float32 = 11,
    /// 64-bit IEEE 754 float
    Float64 = 12,
}

impl ElementKind {
    /// Every registered kind, in tag order.
    pub const ALL: [ElementKind; 7] = [
        ElementKind::Bool,
        ElementKind::Int8,
        ElementKind::Int16,
        ElementKind::Int32,
        ElementKind::Int64,
        ElementKind::Float32,
        ElementKind::Float64,
    ];

    /// Size in bytes of one element.
    pub fn size(&self) -> usize {
        match self {
            ElementKind::Bool | ElementKind::Int8 => 1,
            ElementKind::Int16 => 2,
            ElementKind::Int32 | ElementKind::Float32 => 4,
            ElementKind::Int64 | ElementKind::Float64 => 8,
        }
    }

    /// Resolve a tag received from generated code.
    pub fn from_tag(tag: i32) -> BufferResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| *kind as i32 == tag)
            .ok_or(BufferError::InvalidElementKind(tag))
    }

    /// The tag generated code uses for this kind.
    pub fn tag(&self) -> i32 {
        *self as i32
    }

    /// Short name, matching the C type suffixes of the kernel entry points.
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Bool => "bool",
            ElementKind::Int8 => "int8",
            ElementKind::Int16 => "int16",
            ElementKind::Int32 => "int32",
            ElementKind::Int64 => "int64",
            ElementKind::Float32 => "float",
            ElementKind::Float64 => "double",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ElementKind::Int8 | ElementKind::Int16 | ElementKind::Int32 | ElementKind::Int64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ElementKind::Float32 | ElementKind::Float64)
    }
}

impl TryFrom<i32> for ElementKind {
    type Error = BufferError;

    fn try_from(tag: i32) -> BufferResult<Self> {
        ElementKind::from_tag(tag)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
