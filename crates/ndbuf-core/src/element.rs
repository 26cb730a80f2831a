//! Rust types that can be stored in a descriptor.

use crate::dtype::ElementKind;

/// Trait for types that can be array elements
pub trait ArrayElement: Copy + Send + Sync + 'static {
    /// Element kind the type is stored as
    const KIND: ElementKind;

    /// Convert from an integer position, wrapping like a C cast
    fn from_i64(value: i64) -> Self;
}

macro_rules! impl_array_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl ArrayElement for $ty {
                const KIND: ElementKind = ElementKind::$kind;

                fn from_i64(value: i64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_array_element!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
);

impl ArrayElement for bool {
    const KIND: ElementKind = ElementKind::Bool;

    fn from_i64(value: i64) -> Self {
        value != 0
    }
}
