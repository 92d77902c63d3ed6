//! Dense array descriptor
//!
//! Layout matches the C side: `(rank, dimension sizes, data)`, row-major.
//! The descriptor only borrows; allocation and release belong to the caller.

use core::fmt;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OifArrayF64 {
    /// Number of dimensions
    pub nd: i32,
    /// Size of each axis, `nd` entries
    pub dimensions: *mut i64,
    /// First element
    pub data: *mut f64,
}

impl OifArrayF64 {
    /// Describe caller-owned dimension sizes and data.
    ///
    /// The descriptor holds raw pointers: both slices must outlive every use of it.
    pub fn from_raw_parts(dimensions: &mut [i64], data: &mut [f64]) -> Self {
        Self {
            nd: i32::try_from(dimensions.len()).unwrap_or(i32::MAX),
            dimensions: dimensions.as_mut_ptr(),
            data: data.as_mut_ptr(),
        }
    }

    /// Validated dimension sizes.
    ///
    /// # Safety
    /// `dimensions` must point at `nd` readable values.
    pub unsafe fn shape(&self) -> Result<Vec<usize>, ShapeError> {
        if self.nd < 0 {
            return Err(ShapeError::NegativeRank(self.nd));
        }
        if self.nd == 0 {
            return Ok(Vec::new());
        }
        if self.dimensions.is_null() {
            return Err(ShapeError::NullDimensions);
        }

        let raw = core::slice::from_raw_parts(self.dimensions, self.nd as usize);
        let mut shape = Vec::with_capacity(raw.len());
        for (axis, &size) in raw.iter().enumerate() {
            let size = usize::try_from(size).map_err(|_| ShapeError::NegativeDimension { axis, size })?;
            shape.push(size);
        }

        let count = element_count(&shape)?;
        if count > 0 && self.data.is_null() {
            return Err(ShapeError::NullData);
        }
        Ok(shape)
    }

    /// Number of elements (1 for rank 0).
    ///
    /// # Safety
    /// Same as [`OifArrayF64::shape`].
    pub unsafe fn element_count(&self) -> Result<usize, ShapeError> {
        element_count(&self.shape()?)
    }

    /// View the data as a flat slice.
    ///
    /// # Safety
    /// Same as [`OifArrayF64::shape`], and `data` must address that many
    /// initialized elements for `'b`.
    pub unsafe fn as_slice<'b>(&self) -> Result<&'b [f64], ShapeError> {
        let count = self.element_count()?;
        if count == 0 {
            return Ok(&[]);
        }
        Ok(core::slice::from_raw_parts(self.data, count))
    }
}

/// Elements addressed by `shape`; the empty shape is a scalar.
pub(crate) fn element_count(shape: &[usize]) -> Result<usize, ShapeError> {
    shape
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or(ShapeError::Overflow)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    NegativeRank(i32),
    NegativeDimension { axis: usize, size: i64 },
    NullDimensions,
    NullData,
    Overflow,
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeRank(nd) => write!(f, "negative rank {}", nd),
            Self::NegativeDimension { axis, size } => {
                write!(f, "axis {} has negative size {}", axis, size)
            }
            Self::NullDimensions => write!(f, "dimension sizes pointer is null"),
            Self::NullData => write!(f, "data pointer is null for a non-empty array"),
            Self::Overflow => write!(f, "element count overflows"),
        }
    }
}

impl std::error::Error for ShapeError {}
