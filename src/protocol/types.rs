//! Type tags and the tagged argument vector

use core::ffi::c_void;
use core::fmt;
use core::marker::PhantomData;
use std::ffi::{c_char, CStr};

use super::array::OifArrayF64;
use super::callback::OifCallback;
use crate::errors::{DispatchError, ErrorKind, Result};

/// Closed set of value tags understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ArgType {
    Int = 1,
    Float32 = 2,
    Float64 = 3,
    Float32Ptr = 4,
    ArrayF64 = 5,
    Str = 6,
    Callback = 7,
}

impl ArgType {
    pub const ALL: [ArgType; 7] = [
        Self::Int,
        Self::Float32,
        Self::Float64,
        Self::Float32Ptr,
        Self::ArrayF64,
        Self::Str,
        Self::Callback,
    ];

    /// Raw code used on the C side
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "OIF_INT",
            Self::Float32 => "OIF_FLOAT32",
            Self::Float64 => "OIF_FLOAT64",
            Self::Float32Ptr => "OIF_FLOAT32_P",
            Self::ArrayF64 => "OIF_ARRAY_F64",
            Self::Str => "OIF_STR",
            Self::Callback => "OIF_CALLBACK",
        }
    }
}

impl TryFrom<i32> for ArgType {
    type Error = i32;

    fn try_from(raw: i32) -> core::result::Result<Self, i32> {
        Self::ALL.into_iter().find(|t| t.code() == raw).ok_or(raw)
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Where an argument sits in a call, for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgPosition {
    pub direction: Direction,
    pub index: usize,
}

impl ArgPosition {
    pub const fn new(direction: Direction, index: usize) -> Self {
        Self { direction, index }
    }
}

impl fmt::Display for ArgPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.direction {
            Direction::Input => "input",
            Direction::Output => "output",
        };
        write!(f, "{} argument #{}", side, self.index)
    }
}

/// C view of an argument vector: parallel arrays of `num_args` tags and value pointers.
///
/// Tags stay raw `i32` so an out-of-range code coming from C is never
/// materialized as an `ArgType`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OifArgs {
    pub num_args: usize,
    pub arg_types: *const i32,
    pub arg_values: *const *mut c_void,
}

/// One decoded argument, pointing at caller storage
#[derive(Debug, Clone, Copy)]
pub enum ArgRef {
    Int(*mut i32),
    Float32(*mut f32),
    Float64(*mut f64),
    Float32Ptr(*mut *mut f32),
    ArrayF64(*mut OifArrayF64),
    Str(*const c_char),
    Callback(*mut OifCallback),
}

impl ArgRef {
    pub const fn tag(&self) -> ArgType {
        match self {
            Self::Int(_) => ArgType::Int,
            Self::Float32(_) => ArgType::Float32,
            Self::Float64(_) => ArgType::Float64,
            Self::Float32Ptr(_) => ArgType::Float32Ptr,
            Self::ArrayF64(_) => ArgType::ArrayF64,
            Self::Str(_) => ArgType::Str,
            Self::Callback(_) => ArgType::Callback,
        }
    }
}

/// Tagged argument vector borrowing caller storage for `'a`.
///
/// Array arguments follow the C convention: the value pointer addresses a
/// slot holding the descriptor pointer. Slots created by `push_array` are
/// boxed so their address survives later pushes.
pub struct ArgVector<'a> {
    tags: Vec<i32>,
    values: Vec<*mut c_void>,
    slots: Vec<Box<*mut OifArrayF64>>,
    _storage: PhantomData<&'a mut ()>,
}

impl<'a> ArgVector<'a> {
    pub fn new() -> Self {
        Self {
            tags: Vec::new(),
            values: Vec::new(),
            slots: Vec::new(),
            _storage: PhantomData,
        }
    }

    /// Borrow a vector described by C.
    ///
    /// # Safety
    /// `raw` must describe `num_args` readable tags and value pointers, and
    /// each value pointer must address storage matching its tag for `'a`.
    pub unsafe fn from_raw(raw: &'a OifArgs, direction: Direction) -> Result<Self> {
        let mut vector = Self::new();
        if raw.num_args == 0 {
            return Ok(vector);
        }
        if raw.arg_types.is_null() || raw.arg_values.is_null() {
            let position = ArgPosition::new(direction, 0);
            return Err(DispatchError::new(ErrorKind::NullArgument { position }));
        }
        let tags = core::slice::from_raw_parts(raw.arg_types, raw.num_args);
        let values = core::slice::from_raw_parts(raw.arg_values, raw.num_args);
        vector.tags.extend_from_slice(tags);
        vector.values.extend_from_slice(values);
        Ok(vector)
    }

    pub fn push_i32(&mut self, value: &'a mut i32) -> &mut Self {
        self.push_ptr(ArgType::Int, value as *mut i32 as *mut c_void)
    }

    pub fn push_f32(&mut self, value: &'a mut f32) -> &mut Self {
        self.push_ptr(ArgType::Float32, value as *mut f32 as *mut c_void)
    }

    pub fn push_f64(&mut self, value: &'a mut f64) -> &mut Self {
        self.push_ptr(ArgType::Float64, value as *mut f64 as *mut c_void)
    }

    pub fn push_f32_ptr(&mut self, value: &'a mut *mut f32) -> &mut Self {
        self.push_ptr(ArgType::Float32Ptr, value as *mut *mut f32 as *mut c_void)
    }

    pub fn push_array(&mut self, array: &'a mut OifArrayF64) -> &mut Self {
        let slot = Box::new(array as *mut OifArrayF64);
        let addr = &*slot as *const *mut OifArrayF64 as *mut c_void;
        self.slots.push(slot);
        self.push_ptr(ArgType::ArrayF64, addr)
    }

    /// Strings are passed as a pointer to their first byte.
    pub fn push_str(&mut self, value: &'a CStr) -> &mut Self {
        self.push_ptr(ArgType::Str, value.as_ptr() as *mut c_void)
    }

    pub fn push_callback(&mut self, callback: &'a mut OifCallback) -> &mut Self {
        self.push_ptr(ArgType::Callback, callback as *mut OifCallback as *mut c_void)
    }

    /// Push an arbitrary tag/value pair.
    ///
    /// # Safety
    /// If `tag` is a known code, `value` must address storage of that type for `'a`.
    pub unsafe fn push_raw(&mut self, tag: i32, value: *mut c_void) -> &mut Self {
        self.tags.push(tag);
        self.values.push(value);
        self
    }

    fn push_ptr(&mut self, tag: ArgType, value: *mut c_void) -> &mut Self {
        self.tags.push(tag.code());
        self.values.push(value);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn raw_tags(&self) -> &[i32] {
        &self.tags
    }

    /// Value pointers in order, pointing at caller storage
    pub fn values(&self) -> &[*mut c_void] {
        &self.values
    }

    /// Raw C view over this vector; valid while `self` is alive and unmodified.
    pub fn as_raw(&self) -> OifArgs {
        OifArgs {
            num_args: self.len(),
            arg_types: self.tags.as_ptr(),
            arg_values: self.values.as_ptr(),
        }
    }

    /// Check every tag against the closed set and reject null value pointers.
    pub fn validate(&self, direction: Direction) -> Result<Vec<ArgType>> {
        self.tags
            .iter()
            .zip(&self.values)
            .enumerate()
            .map(|(index, (&raw, value))| {
                let position = ArgPosition::new(direction, index);
                let tag = ArgType::try_from(raw)
                    .map_err(|raw| DispatchError::new(ErrorKind::UnknownTag { position, raw }))?;
                if value.is_null() {
                    return Err(DispatchError::new(ErrorKind::NullArgument { position }));
                }
                Ok(tag)
            })
            .collect()
    }

    /// Validate and decode every argument into a typed reference.
    pub fn decode(&self, direction: Direction) -> Result<Vec<ArgRef>> {
        let tags = self.validate(direction)?;
        tags.into_iter()
            .zip(&self.values)
            .enumerate()
            .map(|(index, (tag, &value))| {
                let decoded = match tag {
                    ArgType::Int => ArgRef::Int(value.cast()),
                    ArgType::Float32 => ArgRef::Float32(value.cast()),
                    ArgType::Float64 => ArgRef::Float64(value.cast()),
                    ArgType::Float32Ptr => ArgRef::Float32Ptr(value.cast()),
                    ArgType::ArrayF64 => {
                        // SAFETY: a validated ARRAY_F64 value addresses a descriptor slot.
                        let array = unsafe { *(value as *const *mut OifArrayF64) };
                        if array.is_null() {
                            let position = ArgPosition::new(direction, index);
                            return Err(DispatchError::new(ErrorKind::NullArgument { position }));
                        }
                        ArgRef::ArrayF64(array)
                    }
                    ArgType::Str => ArgRef::Str(value as *const c_char),
                    ArgType::Callback => ArgRef::Callback(value.cast()),
                };
                Ok(decoded)
            })
            .collect()
    }
}

impl Default for ArgVector<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ArgVector<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgVector")
            .field("tags", &self.tags)
            .field("values", &self.values)
            .finish()
    }
}
