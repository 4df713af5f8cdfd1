//! Compilation orchestration
//!
//! A compile call runs input resolution, capabilities resolution, artifact
//! provisioning, the backend build and output validation in that order. Every
//! temporary file it creates is tracked by an [`ArtifactStack`] and removed
//! when the call ends, whichever stage it ended in.

use super::{
    ArtifactKind, ArtifactStack, BackendConfig, BuildOutput, BuildRequest, CancelFlag,
    CapabilitiesSource, CompilationError, CompilationInput, CompilationParameters, CompiledBundle,
    CompilerBackend, CompilerConfig, CompilerVersion, Result, SourceMaterialization,
};
use crate::backends::{CliBackend, NativeBackend};
use crate::bundle::BundleWriter;
use crate::capabilities::merge_capabilities;
use crate::compilation::params::normalize_path;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info, info_span, warn, Instrument};

/// Entry name used when wrapping raw policy text into a bundle.
pub const SOURCE_ENTRY_NAME: &str = "policy.rego";

/// Compiles Rego policies into wasm bundles with the configured backend.
#[derive(Clone)]
pub struct RegoCompiler {
    config: CompilerConfig,
    backend: Arc<dyn CompilerBackend>,
}

#[derive(Debug, Default)]
struct ResolvedCapabilities {
    file: Option<String>,
    version: Option<String>,
}

impl RegoCompiler {
    /// Create a compiler using the backend selected by `config.backend`.
    pub fn new(config: CompilerConfig) -> Result<Self> {
        let backend: Arc<dyn CompilerBackend> = match &config.backend {
            BackendConfig::Cli {
                tool_path,
                extra_arguments,
            } => Arc::new(CliBackend::new(tool_path.clone(), extra_arguments.clone())),
            BackendConfig::Native { library_path } => Arc::new(NativeBackend::load(library_path)?),
        };

        Ok(Self::with_backend(config, backend))
    }

    /// Create a compiler around an already constructed backend.
    pub fn with_backend(config: CompilerConfig, backend: Arc<dyn CompilerBackend>) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn version(&self) -> Result<CompilerVersion> {
        self.backend.version().await
    }

    /// Compile a bundle directory or bundle archive.
    pub async fn compile_bundle<I, S>(
        &self,
        bundle_path: impl Into<PathBuf>,
        entrypoints: I,
        capabilities_file: Option<&Path>,
    ) -> Result<CompiledBundle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let capabilities = capabilities_file
            .map(|p| CapabilitiesSource::File(p.to_path_buf()))
            .unwrap_or_default();

        self.compile(
            CompilationParameters::bundle(bundle_path)
                .with_entrypoints(entrypoints)
                .with_capabilities(capabilities),
        )
        .await
    }

    /// Compile a single `.rego` file.
    pub async fn compile_file<I, S>(
        &self,
        source_path: impl Into<PathBuf>,
        entrypoints: I,
    ) -> Result<CompiledBundle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compile(CompilationParameters::file(source_path).with_entrypoints(entrypoints))
            .await
    }

    /// Compile bundle archive bytes read from `bundle`.
    pub async fn compile_stream<R, I, S>(
        &self,
        bundle: R,
        entrypoints: I,
        capabilities_json: Option<Vec<u8>>,
    ) -> Result<CompiledBundle>
    where
        R: AsyncRead + Send + Unpin + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let capabilities = capabilities_json
            .map(CapabilitiesSource::Inline)
            .unwrap_or_default();

        self.compile(
            CompilationParameters::archive(bundle)
                .with_entrypoints(entrypoints)
                .with_capabilities(capabilities),
        )
        .await
    }

    /// Compile raw policy source text.
    pub async fn compile_source<I, S>(&self, source: &str, entrypoints: I) -> Result<CompiledBundle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compile(CompilationParameters::source(source).with_entrypoints(entrypoints))
            .await
    }

    pub async fn compile(&self, params: CompilationParameters) -> Result<CompiledBundle> {
        self.compile_with_cancel(params, &CancelFlag::new()).await
    }

    /// Compile, checking `cancel` between stages.
    pub async fn compile_with_cancel(
        &self,
        params: CompilationParameters,
        cancel: &CancelFlag,
    ) -> Result<CompiledBundle> {
        let origin = params.input.describe();
        let span = info_span!("compile", origin = %origin, backend = self.backend.name());

        async {
            let mut artifacts = ArtifactStack::new(self.config.artifact_dir());
            let result = self.run(params, &origin, &mut artifacts, cancel).await;

            if let Err(e) = &result {
                warn!("Compilation failed: {}", e);
            }

            artifacts.cleanup_async().await;
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        params: CompilationParameters,
        origin: &str,
        artifacts: &mut ArtifactStack,
        cancel: &CancelFlag,
    ) -> Result<CompiledBundle> {
        let CompilationParameters {
            input,
            entrypoints,
            capabilities,
            prune_unused,
            debug,
            ignore,
            extra_arguments,
        } = params;

        cancel.check("input resolution")?;
        let (source_path, bundle_mode) = self.resolve_input(input, artifacts).await?;

        cancel.check("capabilities resolution")?;
        let resolved = self
            .resolve_capabilities(&capabilities, origin, artifacts)
            .await?;

        cancel.check("backend invocation")?;
        let output_path = artifacts.reserve(ArtifactKind::Output, "tar.gz");

        let ignore: BTreeSet<String> = self.config.ignore.union(&ignore).cloned().collect();
        let request = BuildRequest {
            source_path,
            bundle_mode,
            entrypoints: entrypoints.into_iter().collect(),
            capabilities_file: resolved.file,
            capabilities_version: resolved.version,
            optimization_level: self.config.optimization_level,
            prune_unused: prune_unused || self.config.prune_unused,
            debug: debug || self.config.debug,
            ignore: ignore.into_iter().collect(),
            extra_arguments,
            output_path,
        };

        debug!("Invoking {} backend with {:?}", self.backend.name(), request);
        let output = self.backend.build(&request).await?;

        self.finish(output, &request, origin, artifacts).await
    }

    /// Turn the input into a filesystem path the backend can load, writing
    /// in-memory input to a temp artifact.
    async fn resolve_input(
        &self,
        input: CompilationInput,
        artifacts: &mut ArtifactStack,
    ) -> Result<(String, bool)> {
        match input {
            CompilationInput::File(path) => Ok((normalize_path(&path), false)),
            CompilationInput::Bundle(path) => Ok((normalize_path(&path), true)),
            CompilationInput::Archive(mut reader) => {
                let path = artifacts.reserve(ArtifactKind::Source, "tar.gz");
                let mut file = tokio::fs::File::create(&path).await?;
                let copied = tokio::io::copy(&mut reader, &mut file).await?;
                file.sync_all().await?;

                debug!("Wrote {} byte bundle stream to {}", copied, path.display());
                Ok((normalize_path(&path), true))
            }
            CompilationInput::Source(source) => {
                if source.trim().is_empty() {
                    return Err(CompilationError::InvalidInput(
                        "policy source is empty".to_string(),
                    ));
                }

                match self.backend.source_materialization() {
                    SourceMaterialization::BundleArchive => {
                        let mut writer = BundleWriter::new(Vec::new(), None)?;
                        writer.write_entry(SOURCE_ENTRY_NAME, source.as_bytes())?;
                        let bundle = writer.into_inner()?;

                        let path = artifacts.reserve(ArtifactKind::Source, "tar.gz");
                        tokio::fs::write(&path, bundle).await?;
                        Ok((normalize_path(&path), true))
                    }
                    SourceMaterialization::RegoFile => {
                        let path = artifacts.reserve(ArtifactKind::Source, "rego");
                        tokio::fs::write(&path, source.as_bytes()).await?;
                        Ok((normalize_path(&path), false))
                    }
                }
            }
        }
    }

    /// Settle on at most one capabilities file plus an optional version tag.
    async fn resolve_capabilities(
        &self,
        source: &CapabilitiesSource,
        origin: &str,
        artifacts: &mut ArtifactStack,
    ) -> Result<ResolvedCapabilities> {
        let version = match source {
            CapabilitiesSource::Version(tag) => Some(tag.clone()),
            _ => self.config.capabilities_version.clone(),
        }
        .filter(|v| !v.trim().is_empty());

        let custom = match source {
            CapabilitiesSource::None | CapabilitiesSource::Version(_) => {
                return Ok(ResolvedCapabilities {
                    file: None,
                    version,
                })
            }
            CapabilitiesSource::File(path) => {
                if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                    return Err(CompilationError::CapabilitiesNotFound { path: path.clone() });
                }

                if version.is_none() {
                    return Ok(ResolvedCapabilities {
                        file: Some(normalize_path(path)),
                        version,
                    });
                }

                tokio::fs::read(path).await?
            }
            CapabilitiesSource::Inline(bytes) => bytes.clone(),
        };

        let document = match &version {
            Some(tag) => {
                let baseline = self.backend.capabilities(tag).await?;
                let merged = merge_capabilities(&baseline, &custom)
                    .map_err(|e| CompilationError::malformed_capabilities(origin, e))?;
                debug!("Merged custom capabilities with {} baseline", tag);
                merged
            }
            None => custom,
        };

        // always transient, even when build artifacts are preserved
        let path = artifacts.reserve(ArtifactKind::Capabilities, "json");
        tokio::fs::write(&path, document).await?;

        Ok(ResolvedCapabilities {
            file: Some(normalize_path(&path)),
            version,
        })
    }

    async fn finish(
        &self,
        output: BuildOutput,
        request: &BuildRequest,
        origin: &str,
        artifacts: &mut ArtifactStack,
    ) -> Result<CompiledBundle> {
        let preserve = self.config.preserve_build_artifacts;

        let path = match output {
            BuildOutput::File(path) => {
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(CompilationError::MissingOutputArtifact {
                        origin: origin.to_string(),
                        expected_path: path,
                    });
                }
                path
            }
            BuildOutput::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Err(CompilationError::BadResult {
                        origin: origin.to_string(),
                    });
                }

                if !preserve {
                    info!("Compilation succeeded ({} bytes)", bytes.len());
                    return Ok(CompiledBundle::from_bytes(bytes));
                }

                tokio::fs::write(&request.output_path, bytes).await?;
                request.output_path.clone()
            }
        };

        let bundle = CompiledBundle::open_file(&path, !preserve).await?;
        // the stream now owns the file, deleting it on close unless preserved
        artifacts.release(&path);

        info!("Compilation succeeded");
        Ok(bundle)
    }
}
