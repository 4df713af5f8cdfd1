use super::abi::*;
use crate::compilation::{CompilationError, Result};
use libloading::Library;
use std::path::Path;
use tracing::info;

/// Entry points of a loaded compiler library.
#[derive(Debug, Clone, Copy)]
pub struct NativeApi {
    pub abi_version: AbiVersionFn,
    pub get_version: GetVersionFn,
    pub free_version: FreeVersionFn,
    pub build: BuildFn,
    pub get_capabilities: GetCapabilitiesFn,
    pub free_result: FreeResultFn,
}

/// A compiler library whose ABI version has been checked.
pub struct NativeLibrary {
    api: NativeApi,
    // keeps the code behind `api` mapped
    _library: Option<Library>,
}

impl NativeLibrary {
    /// Load the shared library at `path` and resolve every exported symbol.
    pub fn open(path: &Path) -> Result<Self> {
        let unavailable = |reason: String| CompilationError::BackendUnavailable {
            backend: format!("native ({})", path.display()),
            reason,
        };

        // Safety: loading runs the library's initializers; the library is trusted
        let library = unsafe { Library::new(path) }.map_err(|e| unavailable(e.to_string()))?;

        // Safety: the symbol types below are the ABI version 1 signatures
        let api = unsafe {
            NativeApi {
                abi_version: *library
                    .get::<AbiVersionFn>(SYM_ABI_VERSION)
                    .map_err(|e| unavailable(e.to_string()))?,
                get_version: *library
                    .get::<GetVersionFn>(SYM_GET_VERSION)
                    .map_err(|e| unavailable(e.to_string()))?,
                free_version: *library
                    .get::<FreeVersionFn>(SYM_FREE_VERSION)
                    .map_err(|e| unavailable(e.to_string()))?,
                build: *library
                    .get::<BuildFn>(SYM_BUILD)
                    .map_err(|e| unavailable(e.to_string()))?,
                get_capabilities: *library
                    .get::<GetCapabilitiesFn>(SYM_GET_CAPABILITIES)
                    .map_err(|e| unavailable(e.to_string()))?,
                free_result: *library
                    .get::<FreeResultFn>(SYM_FREE_RESULT)
                    .map_err(|e| unavailable(e.to_string()))?,
            }
        };

        let loaded = Self::checked(api, Some(library))?;
        info!("Loaded native OPA compiler from {}", path.display());
        Ok(loaded)
    }

    /// Wrap an in-process implementation of the ABI.
    ///
    /// # Safety
    /// Every function in `api` must implement the ABI version 1 contract.
    pub unsafe fn from_api(api: NativeApi) -> Result<Self> {
        Self::checked(api, None)
    }

    fn checked(api: NativeApi, library: Option<Library>) -> Result<Self> {
        // Safety: takes no arguments and returns a plain integer
        let found = unsafe { (api.abi_version)() };
        if found != ABI_VERSION {
            return Err(CompilationError::IncompatibleAbi {
                expected: ABI_VERSION,
                found,
            });
        }

        Ok(Self {
            api,
            _library: library,
        })
    }

    pub fn api(&self) -> &NativeApi {
        &self.api
    }
}
