//! Disk-backed n-dimensional arrays.

use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn};

use super::view::MappedView;
use crate::error::{MediaError, MediaResult};

/// Element type of a disk array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Plain-old-data types an array can be viewed as.
///
/// # Safety
///
/// Implementors must be valid for every bit pattern and have no padding.
pub unsafe trait Element: Copy + Send + Sync + 'static {
    const TYPE: ElementType;
}

macro_rules! element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(unsafe impl Element for $ty {
            const TYPE: ElementType = ElementType::$variant;
        })*
    };
}

element!(u8 => U8, u16 => U16, i16 => I16, u32 => U32, i32 => I32, f32 => F32, f64 => F64);

/// Bytes needed for `shape` elements of `element_type`.
pub(crate) fn byte_len(shape: &[usize], element_type: ElementType) -> MediaResult<usize> {
    let len = shape
        .iter()
        .try_fold(element_type.size(), |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| MediaError::invalid_input(format!("array shape {shape:?} overflows")))?;
    if len == 0 {
        return Err(MediaError::invalid_input(format!(
            "array shape {shape:?} has no elements"
        )));
    }
    Ok(len)
}

/// A memory-mapped array whose contents live in a file.
#[derive(Debug, Clone)]
pub struct DiskArray {
    view: MappedView,
    shape: Vec<usize>,
    element_type: ElementType,
    byte_len: usize,
}

impl DiskArray {
    pub(crate) fn new(
        view: MappedView,
        shape: Vec<usize>,
        element_type: ElementType,
        byte_len: usize,
    ) -> MediaResult<Self> {
        if view.len() < byte_len {
            return Err(MediaError::mapping(
                view.path(),
                format!(
                    "file holds {} bytes, array needs {}",
                    view.len(),
                    byte_len
                ),
            ));
        }
        Ok(Self {
            view,
            shape,
            element_type,
            byte_len,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.byte_len / self.element_type.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_writable(&self) -> bool {
        self.view.mode().is_writable()
    }

    fn check_type<T: Element>(&self) -> MediaResult<()> {
        if T::TYPE != self.element_type {
            return Err(MediaError::invalid_input(format!(
                "array holds {:?}, requested {:?}",
                self.element_type,
                T::TYPE
            )));
        }
        Ok(())
    }

    fn misaligned(&self) -> MediaError {
        MediaError::mapping(self.view.path(), "mapping is not aligned for element type")
    }

    /// Run `f` over a read-only ndarray view of the contents.
    pub fn with_view<T: Element, R>(&self, f: impl FnOnce(ArrayViewD<'_, T>) -> R) -> MediaResult<R> {
        self.check_type::<T>()?;
        let guard = self.view.read();
        let bytes = &guard[..self.byte_len];
        // SAFETY: `Element` types accept any bit pattern.
        let (prefix, body, suffix) = unsafe { bytes.align_to::<T>() };
        if !prefix.is_empty() || !suffix.is_empty() {
            return Err(self.misaligned());
        }
        let array = ArrayViewD::from_shape(IxDyn(&self.shape), body)
            .map_err(|e| MediaError::internal(format!("array shape: {e}")))?;
        Ok(f(array))
    }

    /// Run `f` over a mutable ndarray view. Fails for read-only arrays.
    ///
    /// Changes reach the file once [`flush`](Self::flush) returns.
    pub fn with_view_mut<T: Element, R>(
        &self,
        f: impl FnOnce(ArrayViewMutD<'_, T>) -> R,
    ) -> MediaResult<R> {
        self.check_type::<T>()?;
        let mut guard = self.view.write()?;
        let bytes = &mut guard[..self.byte_len];
        // SAFETY: `Element` types accept any bit pattern.
        let (prefix, body, suffix) = unsafe { bytes.align_to_mut::<T>() };
        if !prefix.is_empty() || !suffix.is_empty() {
            return Err(self.misaligned());
        }
        let array = ArrayViewMutD::from_shape(IxDyn(&self.shape), body)
            .map_err(|e| MediaError::internal(format!("array shape: {e}")))?;
        Ok(f(array))
    }

    pub fn flush(&self) -> MediaResult<()> {
        self.view.flush()
    }
}
