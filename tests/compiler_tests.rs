//! Orchestration tests against a scripted in-process backend

use async_trait::async_trait;
use rego_compile::compilation::{
    BuildOutput, BuildRequest, CancelFlag, CapabilitiesSource, CompilationError,
    CompilationParameters, CompilerBackend, CompilerConfig, CompilerVersion, RegoCompiler,
    Result, SourceMaterialization,
};
use rego_compile::BundleWriter;
use serde_json::{json, Value};
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Debug, Clone, Copy)]
enum Behavior {
    WriteBundle,
    Fail,
    SkipOutput,
    Bytes,
    EmptyBytes,
}

#[derive(Debug, Default)]
struct Observed {
    request: Option<BuildRequest>,
    capabilities_document: Option<Vec<u8>>,
    source_existed: bool,
}

struct ScriptedBackend {
    behavior: Behavior,
    materialization: SourceMaterialization,
    observed: Mutex<Observed>,
}

impl ScriptedBackend {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            materialization: SourceMaterialization::BundleArchive,
            observed: Mutex::new(Observed::default()),
        })
    }

    fn with_materialization(behavior: Behavior, materialization: SourceMaterialization) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            materialization,
            observed: Mutex::new(Observed::default()),
        })
    }

    fn request(&self) -> BuildRequest {
        self.observed.lock().unwrap().request.clone().unwrap()
    }
}

fn compiled_bundle_bytes() -> Vec<u8> {
    let mut writer = BundleWriter::new(Vec::new(), None).unwrap();
    writer.write_entry("/policy.wasm", b"\0asm\x01\0\0\0").unwrap();
    writer.write_entry("/data.json", b"{}").unwrap();
    writer.into_inner().unwrap()
}

#[async_trait]
impl CompilerBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn source_materialization(&self) -> SourceMaterialization {
        self.materialization
    }

    async fn version(&self) -> Result<CompilerVersion> {
        Ok(CompilerVersion {
            version: Some("0.53.1".to_string()),
            ..Default::default()
        })
    }

    async fn capabilities(&self, version: &str) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&json!({
            "builtins": [{"name": "plus"}],
            "wasm_abi_versions": [{"version": 1}],
            "tag": version,
        }))
        .unwrap())
    }

    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput> {
        {
            let mut observed = self.observed.lock().unwrap();
            observed.request = Some(request.clone());
            observed.capabilities_document = request
                .capabilities_file
                .as_ref()
                .map(|p| std::fs::read(p).unwrap());
            observed.source_existed = Path::new(&request.source_path).exists();
        }

        match self.behavior {
            Behavior::WriteBundle => {
                let file = File::create(&request.output_path)?;
                let mut writer = BundleWriter::new(file, None)?;
                writer.write_entry("/policy.wasm", b"\0asm\x01\0\0\0")?;
                writer.close()?;
                Ok(BuildOutput::File(request.output_path.clone()))
            }
            Behavior::Fail => Err(CompilationError::compilation_failed(
                &request.source_path,
                "1 error occurred: policy.rego:1: rego_parse_error: package expected",
            )),
            Behavior::SkipOutput => Ok(BuildOutput::File(request.output_path.clone())),
            Behavior::Bytes => Ok(BuildOutput::Bytes(compiled_bundle_bytes())),
            Behavior::EmptyBytes => Ok(BuildOutput::Bytes(Vec::new())),
        }
    }
}

fn compiler(backend: Arc<ScriptedBackend>, dir: &TempDir, preserve: bool) -> RegoCompiler {
    let config = CompilerConfig {
        output_path: Some(dir.path().to_path_buf()),
        preserve_build_artifacts: preserve,
        ..Default::default()
    };
    RegoCompiler::with_backend(config, backend)
}

fn file_count(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

const POLICY: &str = "package example\ndefault allow := false\n";

#[tokio::test]
async fn test_compiled_file_is_deleted_on_close() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(Behavior::WriteBundle);
    let compiler = compiler(backend.clone(), &dir, false);

    let mut bundle = compiler
        .compile_source(POLICY, ["example/allow"])
        .await
        .unwrap();

    // only the compiled bundle is left while the stream is open
    assert_eq!(file_count(&dir), 1);
    assert!(bundle.backing_path().is_some());
    assert!(bundle.persisted_path().is_none());
    assert!(bundle.bundle().unwrap().policy_wasm().is_some());

    bundle.close();
    assert_eq!(file_count(&dir), 0);

    let request = backend.request();
    assert!(request.bundle_mode);
    assert!(request.source_path.ends_with(".tar.gz"));
    assert_eq!(request.entrypoints, vec!["example/allow"]);
    assert!(backend.observed.lock().unwrap().source_existed);
}

#[tokio::test]
async fn test_preserved_bundle_survives_close() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler(ScriptedBackend::new(Behavior::WriteBundle), &dir, true);

    let bundle = compiler
        .compile_source(POLICY, ["example/allow"])
        .await
        .unwrap();
    let persisted = bundle.persisted_path().unwrap().to_path_buf();
    drop(bundle);

    assert_eq!(file_count(&dir), 1);
    assert!(persisted.exists());
}

#[tokio::test]
async fn test_failure_leaves_no_artifacts() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler(ScriptedBackend::new(Behavior::Fail), &dir, true);

    let err = compiler
        .compile_source("bad rego", ["example/allow"])
        .await
        .unwrap_err();

    match &err {
        CompilationError::CompilationFailed { diagnostics, .. } => {
            assert!(diagnostics.contains("rego_parse_error: package expected"));
        }
        other => panic!("Expected CompilationFailed, got {other:?}"),
    }
    assert_eq!(file_count(&dir), 0);
}

#[tokio::test]
async fn test_missing_output_artifact() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler(ScriptedBackend::new(Behavior::SkipOutput), &dir, false);

    let err = compiler.compile_source(POLICY, ["x"]).await.unwrap_err();

    assert!(matches!(err, CompilationError::MissingOutputArtifact { .. }));
    assert_eq!(file_count(&dir), 0);
}

#[tokio::test]
async fn test_empty_bytes_are_bad_result() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler(ScriptedBackend::new(Behavior::EmptyBytes), &dir, false);

    let err = compiler.compile_source(POLICY, ["x"]).await.unwrap_err();

    assert!(matches!(err, CompilationError::BadResult { .. }));
    assert_eq!(file_count(&dir), 0);
}

#[tokio::test]
async fn test_byte_output_stays_in_memory() {
    let dir = TempDir::new().unwrap();
    let backend =
        ScriptedBackend::with_materialization(Behavior::Bytes, SourceMaterialization::RegoFile);
    let compiler = compiler(backend.clone(), &dir, false);

    let mut bundle = compiler.compile_source(POLICY, ["x"]).await.unwrap();

    assert!(bundle.backing_path().is_none());
    assert_eq!(bundle.to_vec().unwrap(), compiled_bundle_bytes());
    assert_eq!(file_count(&dir), 0);

    let request = backend.request();
    assert!(!request.bundle_mode);
    assert!(request.source_path.ends_with(".rego"));
}

#[tokio::test]
async fn test_byte_output_is_written_when_preserved() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler(ScriptedBackend::new(Behavior::Bytes), &dir, true);

    let bundle = compiler.compile_source(POLICY, ["x"]).await.unwrap();
    let persisted = bundle.persisted_path().unwrap().to_path_buf();
    drop(bundle);

    assert_eq!(std::fs::read(persisted).unwrap(), compiled_bundle_bytes());
    assert_eq!(file_count(&dir), 1);
}

#[tokio::test]
async fn test_merged_capabilities_file_is_transient() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(Behavior::WriteBundle);
    let compiler = compiler(backend.clone(), &dir, true);
    let mut config = compiler.config().clone();
    config.capabilities_version = Some("v0.53.1".to_string());
    let compiler = RegoCompiler::with_backend(config, backend.clone());

    let custom = serde_json::to_vec(&json!({"builtins": [{"name": "custom.func"}]})).unwrap();
    let params = CompilationParameters::source(POLICY)
        .with_entrypoints(["example/allow"])
        .with_capabilities(CapabilitiesSource::Inline(custom));

    let bundle = compiler.compile(params).await.unwrap();
    drop(bundle);

    // preserved bundle only; the merged capabilities file is gone
    assert_eq!(file_count(&dir), 1);

    let request = backend.request();
    assert_eq!(request.capabilities_version.as_deref(), Some("v0.53.1"));

    let document = backend
        .observed
        .lock()
        .unwrap()
        .capabilities_document
        .clone()
        .unwrap();
    let merged: Value = serde_json::from_slice(&document).unwrap();
    let names: Vec<_> = merged["builtins"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["plus", "custom.func"]);
    assert_eq!(merged["tag"], "v0.53.1");
}

#[tokio::test]
async fn test_capabilities_file_without_version_is_passed_through() {
    let dir = TempDir::new().unwrap();
    let caps_dir = TempDir::new().unwrap();
    let caps = caps_dir.path().join("caps.json");
    std::fs::write(&caps, r#"{"builtins": []}"#).unwrap();

    let backend = ScriptedBackend::new(Behavior::WriteBundle);
    let compiler = compiler(backend.clone(), &dir, false);

    compiler
        .compile_bundle(dir.path().join("unused"), ["x"], Some(&caps))
        .await
        .unwrap();

    let request = backend.request();
    assert_eq!(
        request.capabilities_file.as_deref(),
        Some(caps.to_str().unwrap().replace('\\', "/").as_str())
    );
    assert!(caps.exists());
}

#[tokio::test]
async fn test_missing_capabilities_file() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler(ScriptedBackend::new(Behavior::WriteBundle), &dir, false);

    let err = compiler
        .compile_bundle(dir.path(), ["x"], Some(Path::new("/nonexistent/caps.json")))
        .await
        .unwrap_err();

    assert!(matches!(err, CompilationError::CapabilitiesNotFound { .. }));
}

#[tokio::test]
async fn test_malformed_custom_capabilities() {
    let dir = TempDir::new().unwrap();
    let config = CompilerConfig {
        output_path: Some(dir.path().to_path_buf()),
        capabilities_version: Some("v0.53.1".to_string()),
        ..Default::default()
    };
    let compiler = RegoCompiler::with_backend(config, ScriptedBackend::new(Behavior::WriteBundle));

    let params = CompilationParameters::source(POLICY)
        .with_capabilities(CapabilitiesSource::Inline(br#"{"tag": "x"}"#.to_vec()));

    let err = compiler.compile(params).await.unwrap_err();

    assert!(matches!(err, CompilationError::MalformedCapabilities { .. }));
    assert_eq!(file_count(&dir), 0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler(ScriptedBackend::new(Behavior::WriteBundle), &dir, false);

    let cancel = CancelFlag::new();
    cancel.cancel();
    let err = compiler
        .compile_with_cancel(CompilationParameters::source(POLICY), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, CompilationError::Cancelled { .. }));
    assert_eq!(file_count(&dir), 0);
}

#[tokio::test]
async fn test_empty_source_rejected() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler(ScriptedBackend::new(Behavior::WriteBundle), &dir, false);

    let err = compiler.compile_source("  \n", ["x"]).await.unwrap_err();
    assert!(matches!(err, CompilationError::InvalidInput(_)));
}

#[tokio::test]
async fn test_stream_input_is_spooled_and_removed() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(Behavior::WriteBundle);
    let compiler = compiler(backend.clone(), &dir, false);

    let mut writer = BundleWriter::new(Vec::new(), None).unwrap();
    writer.write_entry("policy.rego", POLICY.as_bytes()).unwrap();
    let archive = writer.into_inner().unwrap();

    let bundle = compiler
        .compile_stream(std::io::Cursor::new(archive), ["example/allow"], None)
        .await
        .unwrap();
    drop(bundle);

    let request = backend.request();
    assert!(request.bundle_mode);
    assert!(backend.observed.lock().unwrap().source_existed);
    assert!(!Path::new(&request.source_path).exists());
    assert_eq!(file_count(&dir), 0);
}

#[tokio::test]
async fn test_call_flags_combine_with_config() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(Behavior::WriteBundle);
    let config = CompilerConfig {
        output_path: Some(dir.path().to_path_buf()),
        prune_unused: true,
        ignore: ["*_test.rego".to_string()].into(),
        ..Default::default()
    };
    let compiler = RegoCompiler::with_backend(config, backend.clone());

    let params = CompilationParameters::file("policies/./main.rego")
        .with_entrypoints(["b/deny", "a/allow"])
        .with_debug(true)
        .with_ignore(["vendor"]);
    compiler.compile(params).await.unwrap();

    let request = backend.request();
    assert!(request.prune_unused);
    assert!(request.debug);
    assert!(!request.bundle_mode);
    assert_eq!(request.entrypoints, vec!["a/allow", "b/deny"]);
    assert_eq!(request.ignore, vec!["*_test.rego", "vendor"]);
}

#[tokio::test]
async fn test_concurrent_calls_share_output_directory() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler(ScriptedBackend::new(Behavior::WriteBundle), &dir, false);

    let (a, b, c, d) = tokio::join!(
        compiler.compile_source(POLICY, ["example/allow"]),
        compiler.compile_source(POLICY, ["example/deny"]),
        compiler.compile_source("package other\n", ["other/allow"]),
        compiler.compile(
            CompilationParameters::source(POLICY)
                .with_entrypoints(["example/allow"])
                .with_debug(true)
        ),
    );
    let mut bundles = vec![a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap()];

    let mut paths: Vec<_> = bundles
        .iter()
        .map(|b| b.backing_path().unwrap().to_path_buf())
        .collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 4);
    assert_eq!(file_count(&dir), 4);

    for bundle in &mut bundles {
        assert!(bundle.bundle().unwrap().policy_wasm().is_some());
    }

    drop(bundles);
    assert_eq!(file_count(&dir), 0);
}
