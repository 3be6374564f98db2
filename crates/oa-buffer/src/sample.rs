//! Scalar sample types

use bytemuck::Pod;
use oa_core::SampleFormat;

/// A scalar type that can travel through a device stream.
///
/// `Pod` lets raw backend bytes be viewed as samples without copying.
pub trait Sample: Pod + Send + Sync + 'static {
    /// Encoding and width this type represents on the wire
    const FORMAT: SampleFormat;
    /// Value of silence
    const EQUILIBRIUM: Self;
}

macro_rules! impl_sample {
    ($($ty:ty => $format:ident, $equilibrium:expr;)*) => {
        $(
            impl Sample for $ty {
                const FORMAT: SampleFormat = SampleFormat::$format;
                const EQUILIBRIUM: Self = $equilibrium;
            }
        )*
    };
}

impl_sample! {
    i8 => I8, 0;
    i16 => I16, 0;
    i32 => I32, 0;
    i64 => I64, 0;
    u8 => U8, 1 << 7;
    u16 => U16, 1 << 15;
    u32 => U32, 1 << 31;
    u64 => U64, 1 << 63;
    f32 => F32, 0.0;
    f64 => F64, 0.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_matches_size() {
        fn check<T: Sample>() {
            assert_eq!(T::FORMAT.bytes(), std::mem::size_of::<T>());
        }
        check::<i8>();
        check::<i16>();
        check::<u32>();
        check::<u64>();
        check::<f32>();
        check::<f64>();
    }

    #[test]
    fn test_unsigned_equilibrium_is_midpoint() {
        assert_eq!(<u8 as Sample>::EQUILIBRIUM, 128);
        assert_eq!(<u16 as Sample>::EQUILIBRIUM, 32768);
        assert_eq!(<i16 as Sample>::EQUILIBRIUM, 0);
    }
}
