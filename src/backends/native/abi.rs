//! C ABI of the native OPA compiler library, version 1
//!
//! Strings crossing the boundary are NUL-terminated. Structures handed back by
//! the library are owned by it and must be released with the matching free
//! function once their contents have been copied out.

use std::ffi::{c_char, c_int};

/// The only ABI revision this crate speaks.
pub const ABI_VERSION: u32 = 1;

/// Build parameters passed to `OpaBuildEx`. Nullable strings may be null.
#[repr(C)]
#[derive(Debug)]
pub struct OpaBuildParams {
    pub abi_version: u32,
    pub source: *const c_char,
    pub target: *const c_char,
    pub capabilities_file: *const c_char,
    pub capabilities_version: *const c_char,
    pub bundle_mode: c_int,
    pub entrypoints: *const *const c_char,
    pub entrypoints_len: c_int,
    pub ignore: *const *const c_char,
    pub ignore_len: c_int,
    pub optimization_level: c_int,
    pub prune_unused: c_int,
    pub debug: c_int,
}

/// Result of `OpaBuildEx` and `OpaGetCapabilities`, released with `OpaFree`.
#[repr(C)]
#[derive(Debug)]
pub struct OpaBuildResult {
    pub result: *mut u8,
    pub result_len: usize,
    pub errors: *mut c_char,
    pub log: *mut c_char,
}

/// Result of `OpaGetVersion`, released with `OpaFreeVersion`.
#[repr(C)]
#[derive(Debug)]
pub struct OpaVersion {
    pub lib_version: *mut c_char,
    pub go_version: *mut c_char,
    pub commit: *mut c_char,
    pub platform: *mut c_char,
}

pub type AbiVersionFn = unsafe extern "C" fn() -> u32;
pub type GetVersionFn = unsafe extern "C" fn() -> *mut OpaVersion;
pub type FreeVersionFn = unsafe extern "C" fn(*mut OpaVersion);
pub type BuildFn = unsafe extern "C" fn(*const OpaBuildParams, *mut *mut OpaBuildResult) -> c_int;
pub type GetCapabilitiesFn =
    unsafe extern "C" fn(*const c_char, *mut *mut OpaBuildResult) -> c_int;
pub type FreeResultFn = unsafe extern "C" fn(*mut OpaBuildResult);

pub const SYM_ABI_VERSION: &[u8] = b"OpaAbiVersion\0";
pub const SYM_GET_VERSION: &[u8] = b"OpaGetVersion\0";
pub const SYM_FREE_VERSION: &[u8] = b"OpaFreeVersion\0";
pub const SYM_BUILD: &[u8] = b"OpaBuildEx\0";
pub const SYM_GET_CAPABILITIES: &[u8] = b"OpaGetCapabilities\0";
pub const SYM_FREE_RESULT: &[u8] = b"OpaFree\0";
