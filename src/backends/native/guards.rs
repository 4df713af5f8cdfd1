//! Scoped owners for memory crossing the native boundary
//!
//! Each guard releases exactly one allocation with its paired free function
//! when dropped. Locals holding guards drop in reverse declaration order, so
//! a call site that acquires them top to bottom unwinds them in reverse order
//! of acquisition on every exit path.

use super::abi::{FreeResultFn, FreeVersionFn, OpaBuildResult, OpaVersion};
use crate::compilation::{CompilationError, CompilerVersion, Result};
use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr;

/// NUL-terminated string handed to the library.
#[derive(Debug)]
pub struct ForeignString(*mut c_char);

impl ForeignString {
    pub fn new(value: &str) -> Result<Self> {
        let value = CString::new(value).map_err(|_| {
            CompilationError::InvalidInput(format!("'{value}' contains a NUL byte"))
        })?;
        Ok(Self(value.into_raw()))
    }

    pub fn as_ptr(&self) -> *const c_char {
        self.0
    }
}

impl Drop for ForeignString {
    fn drop(&mut self) {
        // Safety: produced by CString::into_raw in `new` and released only here
        unsafe { drop(CString::from_raw(self.0)) };
    }
}

/// Pointer to an optional string, null when absent.
pub fn nullable(value: &Option<ForeignString>) -> *const c_char {
    value.as_ref().map_or(ptr::null(), ForeignString::as_ptr)
}

/// Array of individually allocated strings plus the pointer array the
/// library reads them through.
#[derive(Debug)]
pub struct ForeignStringArray {
    // dropped before `strings`, which it points into
    pointers: Box<[*const c_char]>,
    strings: Vec<ForeignString>,
}

impl ForeignStringArray {
    pub fn new<'a>(values: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let strings = values
            .into_iter()
            .map(ForeignString::new)
            .collect::<Result<Vec<_>>>()?;
        let pointers: Box<[*const c_char]> = strings.iter().map(ForeignString::as_ptr).collect();

        Ok(Self { pointers, strings })
    }

    /// Pointer to the array, null when empty.
    pub fn as_ptr(&self) -> *const *const c_char {
        if self.pointers.is_empty() {
            ptr::null()
        } else {
            self.pointers.as_ptr()
        }
    }

    pub fn len(&self) -> c_int {
        self.strings.len() as c_int
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Copy a library owned C string. Null and empty strings become `None`.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for the call.
pub unsafe fn copy_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }

    let value = CStr::from_ptr(ptr).to_string_lossy().into_owned();
    (!value.is_empty()).then_some(value)
}

/// Owner of an `OpaBuildResult` returned by the library.
pub struct BuildResultHandle {
    ptr: *mut OpaBuildResult,
    free: FreeResultFn,
}

impl BuildResultHandle {
    /// Take ownership of `ptr`; `None` when the library returned null.
    ///
    /// # Safety
    /// `ptr` must be null or a result allocated by the library that `free`
    /// belongs to, not yet released.
    pub unsafe fn new(ptr: *mut OpaBuildResult, free: FreeResultFn) -> Option<Self> {
        (!ptr.is_null()).then_some(Self { ptr, free })
    }

    /// Copy of the payload bytes; the library buffer dies with the handle.
    pub fn payload(&self) -> Vec<u8> {
        // Safety: non-null and owned by this handle
        let result = unsafe { &*self.ptr };
        if result.result.is_null() || result.result_len == 0 {
            return Vec::new();
        }

        // Safety: the library guarantees `result_len` readable bytes at `result`
        unsafe { std::slice::from_raw_parts(result.result, result.result_len) }.to_vec()
    }

    pub fn errors(&self) -> Option<String> {
        // Safety: non-null and owned by this handle
        unsafe { copy_c_string((*self.ptr).errors) }.filter(|e| !e.trim().is_empty())
    }

    pub fn log(&self) -> Option<String> {
        // Safety: non-null and owned by this handle
        unsafe { copy_c_string((*self.ptr).log) }
    }
}

impl Drop for BuildResultHandle {
    fn drop(&mut self) {
        // Safety: allocated by the library and released exactly once here
        unsafe { (self.free)(self.ptr) };
    }
}

/// Owner of an `OpaVersion` returned by the library.
pub struct VersionHandle {
    ptr: *mut OpaVersion,
    free: FreeVersionFn,
}

impl VersionHandle {
    /// # Safety
    /// Same contract as [`BuildResultHandle::new`], for `OpaVersion`.
    pub unsafe fn new(ptr: *mut OpaVersion, free: FreeVersionFn) -> Option<Self> {
        (!ptr.is_null()).then_some(Self { ptr, free })
    }

    pub fn to_version(&self) -> CompilerVersion {
        // Safety: non-null and owned by this handle; strings are copied out
        unsafe {
            let version = &*self.ptr;
            CompilerVersion {
                version: copy_c_string(version.lib_version),
                commit: copy_c_string(version.commit),
                go_version: copy_c_string(version.go_version),
                platform: copy_c_string(version.platform),
            }
        }
    }
}

impl Drop for VersionHandle {
    fn drop(&mut self) {
        // Safety: allocated by the library and released exactly once here
        unsafe { (self.free)(self.ptr) };
    }
}
