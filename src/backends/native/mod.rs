//! Compiler backend calling a natively compiled OPA library
//!
//! Calls are synchronous foreign calls; they run on tokio's blocking pool and
//! cannot be interrupted once started.

pub mod abi;
pub mod guards;
pub mod library;

pub use abi::ABI_VERSION;
pub use library::{NativeApi, NativeLibrary};

use crate::backends::cli::BUILD_TARGET;
use crate::compilation::{
    BuildOutput, BuildRequest, CompilationError, CompilerBackend, CompilerVersion, Result,
    SourceMaterialization,
};
use abi::{OpaBuildParams, OpaBuildResult};
use async_trait::async_trait;
use guards::{nullable, BuildResultHandle, ForeignString, ForeignStringArray, VersionHandle};
use std::ffi::c_int;
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct NativeBackend {
    library: Arc<NativeLibrary>,
}

impl NativeBackend {
    /// Load the compiler library at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_library(NativeLibrary::open(path)?))
    }

    pub fn from_library(library: NativeLibrary) -> Self {
        Self {
            library: Arc::new(library),
        }
    }

    async fn blocking<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&NativeLibrary) -> Result<T> + Send + 'static,
    {
        let library = Arc::clone(&self.library);
        tokio::task::spawn_blocking(move || call(&library))
            .await
            .map_err(|e| CompilationError::BackendUnavailable {
                backend: "native".to_string(),
                reason: format!("native call did not complete: {e}"),
            })?
    }
}

fn build_blocking(library: &NativeLibrary, request: &BuildRequest) -> Result<Vec<u8>> {
    if let Some(extra) = request.extra_arguments.as_deref() {
        warn!(
            "Native compiler ABI v{} takes no extra arguments, ignoring '{}'",
            ABI_VERSION, extra
        );
    }

    let source = ForeignString::new(&request.source_path)?;
    let target = ForeignString::new(BUILD_TARGET)?;
    let capabilities_file = request
        .capabilities_file
        .as_deref()
        .map(ForeignString::new)
        .transpose()?;
    // a capabilities file already carries any merged version baseline
    let capabilities_version = match &capabilities_file {
        Some(_) => None,
        None => request
            .capabilities_version
            .as_deref()
            .map(ForeignString::new)
            .transpose()?,
    };
    let entrypoints = ForeignStringArray::new(request.entrypoints.iter().map(String::as_str))?;
    let ignore = ForeignStringArray::new(request.ignore.iter().map(String::as_str))?;

    let params = OpaBuildParams {
        abi_version: ABI_VERSION,
        source: source.as_ptr(),
        target: target.as_ptr(),
        capabilities_file: nullable(&capabilities_file),
        capabilities_version: nullable(&capabilities_version),
        bundle_mode: request.bundle_mode as c_int,
        entrypoints: entrypoints.as_ptr(),
        entrypoints_len: entrypoints.len(),
        ignore: ignore.as_ptr(),
        ignore_len: ignore.len(),
        optimization_level: c_int::from(request.optimization_level),
        prune_unused: request.prune_unused as c_int,
        debug: request.debug as c_int,
    };

    let mut raw: *mut OpaBuildResult = ptr::null_mut();
    // Safety: every pointer in `params` is kept alive by the guards above
    let status = unsafe { (library.api().build)(&params, &mut raw) };
    // Safety: `raw` was just produced by the library and is released by the handle
    let handle = unsafe { BuildResultHandle::new(raw, library.api().free_result) };

    take_payload(handle, status, &request.source_path)
}

fn capabilities_blocking(library: &NativeLibrary, version: &str) -> Result<Vec<u8>> {
    let tag = ForeignString::new(version)?;

    let mut raw: *mut OpaBuildResult = ptr::null_mut();
    // Safety: `tag` outlives the call
    let status = unsafe { (library.api().get_capabilities)(tag.as_ptr(), &mut raw) };
    // Safety: `raw` was just produced by the library and is released by the handle
    let handle = unsafe { BuildResultHandle::new(raw, library.api().free_result) };

    take_payload(handle, status, &format!("capabilities {version}"))
}

fn version_blocking(library: &NativeLibrary) -> Result<CompilerVersion> {
    // Safety: takes no arguments; the result is released by the handle
    let handle = unsafe {
        VersionHandle::new((library.api().get_version)(), library.api().free_version)
    };

    handle
        .map(|h| h.to_version())
        .ok_or_else(|| CompilationError::BackendUnavailable {
            backend: "native".to_string(),
            reason: "failed to get version".to_string(),
        })
}

/// Map a library result onto the shared error contract, copying the payload
/// out before the handle is released.
fn take_payload(handle: Option<BuildResultHandle>, status: c_int, origin: &str) -> Result<Vec<u8>> {
    let Some(handle) = handle else {
        return Err(if status != 0 {
            CompilationError::compilation_failed(origin, format!("native call failed with status {status}"))
        } else {
            CompilationError::BadResult {
                origin: origin.to_string(),
            }
        });
    };

    if let Some(log) = handle.log() {
        for line in log.lines().filter(|l| !l.trim().is_empty()) {
            debug!("{}", line);
        }
    }

    if let Some(errors) = handle.errors() {
        return Err(CompilationError::compilation_failed(origin, errors));
    }

    if status != 0 {
        return Err(CompilationError::compilation_failed(
            origin,
            format!("Unknown compilation error (status {status})"),
        ));
    }

    let payload = handle.payload();
    if payload.is_empty() {
        return Err(CompilationError::BadResult {
            origin: origin.to_string(),
        });
    }

    Ok(payload)
}

#[async_trait]
impl CompilerBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn source_materialization(&self) -> SourceMaterialization {
        SourceMaterialization::RegoFile
    }

    async fn version(&self) -> Result<CompilerVersion> {
        self.blocking(version_blocking).await
    }

    async fn capabilities(&self, version: &str) -> Result<Vec<u8>> {
        let version = version.to_string();
        self.blocking(move |library| capabilities_blocking(library, &version))
            .await
    }

    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput> {
        let request = request.clone();
        let bytes = self
            .blocking(move |library| build_blocking(library, &request))
            .await?;

        debug!("Native build returned {} bytes", bytes.len());
        Ok(BuildOutput::Bytes(bytes))
    }
}
