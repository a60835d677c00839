use std::fmt;

/// The format of a single sample, in native endianness.
///
/// Every supported format is signed or floating point, so the all-zeros bit
/// pattern is silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// 32-bit float.
    F32,
}

impl SampleFormat {
    /// The number of bytes used by one sample.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use audio_stream::SampleFormat;
    ///
    /// assert_eq!(SampleFormat::I16.bytes(), 2);
    /// assert_eq!(SampleFormat::F32.bytes(), 4);
    /// ```
    pub const fn bytes(self) -> usize {
        match self {
            SampleFormat::I8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 => 4,
            SampleFormat::F32 => 4,
        }
    }

    /// Test if the format is floating point.
    pub const fn is_float(self) -> bool {
        matches!(self, SampleFormat::F32)
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::I8 => write!(f, "i8"),
            SampleFormat::I16 => write!(f, "i16"),
            SampleFormat::I32 => write!(f, "i32"),
            SampleFormat::F32 => write!(f, "f32"),
        }
    }
}

/// Trait used to designate types which can be read from and written to a
/// [BufferView][crate::BufferView].
///
/// # Safety
///
/// The declared [FORMAT][Sample::FORMAT] must match the size and bit layout of
/// the implementing type, since it is used to reinterpret raw device memory.
pub unsafe trait Sample: Copy + Send + 'static {
    /// The format corresponding to this sample type.
    const FORMAT: SampleFormat;

    /// The silent sample.
    const ZERO: Self;

    /// A static description of the sample type.
    fn describe() -> &'static str;
}

macro_rules! implement {
    ($ty:ty, $format:ident, $zero:expr) => {
        unsafe impl Sample for $ty {
            const FORMAT: SampleFormat = SampleFormat::$format;
            const ZERO: Self = $zero;

            fn describe() -> &'static str {
                stringify!($ty)
            }
        }
    };
}

implement!(i8, I8, 0);
implement!(i16, I16, 0);
implement!(i32, I32, 0);
implement!(f32, F32, 0.0);
