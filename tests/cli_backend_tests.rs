//! End to end tests of the `opa` subprocess backend against a stand-in script
//! that understands the `version`, `capabilities` and `build` commands.

#![cfg(unix)]

use once_cell::sync::Lazy;
use rego_compile::compilation::{
    BackendConfig, CapabilitiesSource, CompilationError, CompilationParameters, CompilerConfig,
    RegoCompiler,
};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tempfile::TempDir;

// tests spawn freshly written executables; serialize them to avoid ETXTBSY
static SPAWN_LOCK: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

const FAKE_OPA: &str = r#"#!/bin/sh
LOG="@LOG@"
cmd="$1"
shift
case "$cmd" in
  version)
    printf 'Version: 0.53.1\nBuild Commit: 8ec8b2d\nGo Version: go1.20.5\nPlatform: linux/amd64\n'
    exit 0
    ;;
  capabilities)
    printf '{"builtins":[{"name":"plus"}],"tag":"%s"}' "$2"
    exit 0
    ;;
  build)
    ;;
  *)
    echo "error: unknown command $cmd" >&2
    exit 2
    ;;
esac

echo "build $*" >> "$LOG"
out=""
source=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    --capabilities)
      if [ -f "$2" ]; then cat "$2" >> "$LOG"; echo >> "$LOG"; fi
      shift 2
      ;;
    -t|-e|--optimize|--ignore) shift 2 ;;
    *) source="$1"; shift ;;
  esac
done

echo "debug: loading $source" >&2

if [ -d "$source" ]; then
  reader="cat $source/*.rego"
elif [ "${source%.tar.gz}" != "$source" ]; then
  reader="gzip -dc $source"
else
  reader="cat $source"
fi

if ! $reader 2>/dev/null | grep -aq 'package'; then
  echo "error: 1 error occurred: policy.rego:1: rego_parse_error: package expected" >&2
  exit 1
fi

work=$(mktemp -d)
printf '\000asm\001\000\000\000' > "$work/policy.wasm"
tar -czf "$out" -C "$work" policy.wasm
rm -rf "$work"
"#;

struct FakeOpa {
    _dir: TempDir,
    tool: PathBuf,
    log: PathBuf,
}

impl FakeOpa {
    fn install() -> Self {
        let dir = TempDir::new().unwrap();
        let tool = dir.path().join("opa");
        let log = dir.path().join("calls.log");

        std::fs::write(&tool, FAKE_OPA.replace("@LOG@", &log.to_string_lossy())).unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            _dir: dir,
            tool,
            log,
        }
    }

    fn calls(&self) -> String {
        std::fs::read_to_string(&self.log).unwrap_or_default()
    }

    fn config(&self, output: &TempDir) -> CompilerConfig {
        CompilerConfig {
            backend: BackendConfig::Cli {
                tool_path: Some(self.tool.clone()),
                extra_arguments: None,
            },
            output_path: Some(output.path().to_path_buf()),
            ..Default::default()
        }
    }
}

fn file_count(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

const POLICY: &str = "package example\ndefault allow := false\n";

#[tokio::test]
async fn test_compile_policy_file() {
    let _guard = SPAWN_LOCK.lock().await;
    let opa = FakeOpa::install();
    let output = TempDir::new().unwrap();
    let sources = TempDir::new().unwrap();
    let policy = sources.path().join("policy.rego");
    std::fs::write(&policy, POLICY).unwrap();

    let compiler = RegoCompiler::new(opa.config(&output)).unwrap();
    let mut bundle = compiler
        .compile_file(&policy, ["example/allow"])
        .await
        .unwrap();

    let wasm = bundle.bundle().unwrap().policy_wasm().unwrap().to_vec();
    assert!(!wasm.is_empty());

    let calls = opa.calls();
    assert!(calls.contains("build -t wasm -e example/allow --optimize 0 -o"));
    assert!(!calls.contains(" -b "));

    drop(bundle);
    assert_eq!(file_count(&output), 0);
}

#[tokio::test]
async fn test_compile_bundle_directory() {
    let _guard = SPAWN_LOCK.lock().await;
    let opa = FakeOpa::install();
    let output = TempDir::new().unwrap();
    let sources = TempDir::new().unwrap();
    std::fs::write(sources.path().join("policy.rego"), POLICY).unwrap();

    let compiler = RegoCompiler::new(opa.config(&output)).unwrap();
    let mut bundle = compiler
        .compile_bundle(sources.path(), ["example/allow"], None)
        .await
        .unwrap();

    assert!(bundle.bundle().unwrap().policy_wasm().is_some());
    assert!(opa.calls().contains("build -t wasm -b -e example/allow"));
}

#[tokio::test]
async fn test_compile_source_text() {
    let _guard = SPAWN_LOCK.lock().await;
    let opa = FakeOpa::install();
    let output = TempDir::new().unwrap();

    let compiler = RegoCompiler::new(opa.config(&output)).unwrap();
    let mut bundle = compiler
        .compile_source(POLICY, ["example/allow"])
        .await
        .unwrap();

    assert!(bundle.bundle().unwrap().policy_wasm().is_some());
    // source archive is gone, only the open bundle remains
    assert_eq!(file_count(&output), 1);
}

#[tokio::test]
async fn test_bad_rego_fails_with_diagnostics() {
    let _guard = SPAWN_LOCK.lock().await;
    let opa = FakeOpa::install();
    let output = TempDir::new().unwrap();

    let mut config = opa.config(&output);
    config.preserve_build_artifacts = true;
    let compiler = RegoCompiler::new(config).unwrap();

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
    assert_eq!(file_count(&output), 0);
}

#[tokio::test]
async fn test_preserved_output_is_the_only_file_left() {
    let _guard = SPAWN_LOCK.lock().await;
    let opa = FakeOpa::install();
    let output = TempDir::new().unwrap();

    let mut config = opa.config(&output);
    config.preserve_build_artifacts = true;
    config.capabilities_version = Some("v0.53.1".to_string());
    let compiler = RegoCompiler::new(config).unwrap();

    let custom = br#"{"builtins":[{"name":"custom.func"}]}"#.to_vec();
    let params = CompilationParameters::source(POLICY)
        .with_entrypoints(["example/allow"])
        .with_capabilities(CapabilitiesSource::Inline(custom));
    let bundle = compiler.compile(params).await.unwrap();
    drop(bundle);

    assert_eq!(file_count(&output), 1);

    let calls = opa.calls();
    assert!(calls.contains(r#"{"name":"plus"}"#));
    assert!(calls.contains(r#"{"name":"custom.func"}"#));
    assert!(calls.find("plus").unwrap() < calls.find("custom.func").unwrap());
}

#[tokio::test]
async fn test_config_extra_arguments_are_forwarded() {
    let _guard = SPAWN_LOCK.lock().await;
    let opa = FakeOpa::install();
    let output = TempDir::new().unwrap();

    let mut config = opa.config(&output);
    config.backend = BackendConfig::Cli {
        tool_path: Some(opa.tool.clone()),
        extra_arguments: Some("--v1-compatible --scope 'a b'".to_string()),
    };
    let compiler = RegoCompiler::new(config).unwrap();

    compiler
        .compile_source(POLICY, ["example/allow"])
        .await
        .unwrap();

    assert!(opa.calls().contains("--v1-compatible --scope a b"));
}

#[tokio::test]
async fn test_version_info() {
    let _guard = SPAWN_LOCK.lock().await;
    let opa = FakeOpa::install();
    let output = TempDir::new().unwrap();

    let compiler = RegoCompiler::new(opa.config(&output)).unwrap();
    let version = compiler.version().await.unwrap();

    assert_eq!(version.version.as_deref(), Some("0.53.1"));
    assert_eq!(version.commit.as_deref(), Some("8ec8b2d"));
    assert_eq!(version.platform.as_deref(), Some("linux/amd64"));
}

#[tokio::test]
async fn test_missing_tool() {
    let output = TempDir::new().unwrap();
    let config = CompilerConfig {
        backend: BackendConfig::Cli {
            tool_path: Some(PathBuf::from("/nonexistent/bin/opa")),
            extra_arguments: None,
        },
        output_path: Some(output.path().to_path_buf()),
        ..Default::default()
    };
    let compiler = RegoCompiler::new(config).unwrap();

    let err = compiler
        .compile_source(POLICY, ["example/allow"])
        .await
        .unwrap_err();

    assert!(matches!(err, CompilationError::ToolNotFound { .. }));
    assert_eq!(file_count(&output), 0);
}
