use crate::compilation::{BuildRequest, CompilationError, Result};

/// Compilation target passed to `opa build`.
pub const BUILD_TARGET: &str = "wasm";

/// Argument list for `opa build`.
///
/// The order is fixed: target, bundle switch, entrypoints, capabilities,
/// optimization, pruning, debug, ignore patterns, output file, extra
/// arguments, and the source path last. A capabilities file wins over a
/// capabilities version.
pub fn build_arguments(request: &BuildRequest) -> Result<Vec<String>> {
    let mut args = vec!["build".to_string(), "-t".to_string(), BUILD_TARGET.to_string()];

    if request.bundle_mode {
        args.push("-b".to_string());
    }

    for entrypoint in &request.entrypoints {
        args.push("-e".to_string());
        args.push(entrypoint.clone());
    }

    let capabilities = request
        .capabilities_file
        .as_ref()
        .filter(|f| !f.trim().is_empty())
        .or(request
            .capabilities_version
            .as_ref()
            .filter(|v| !v.trim().is_empty()));
    if let Some(capabilities) = capabilities {
        args.push("--capabilities".to_string());
        args.push(capabilities.clone());
    }

    args.push("--optimize".to_string());
    args.push(request.optimization_level.to_string());

    if request.prune_unused {
        args.push("--prune-unused".to_string());
    }

    if request.debug {
        args.push("--debug".to_string());
    }

    for pattern in &request.ignore {
        args.push("--ignore".to_string());
        args.push(pattern.clone());
    }

    args.push("-o".to_string());
    args.push(request.output_path.to_string_lossy().replace('\\', "/"));

    if let Some(extra) = request.extra_arguments.as_deref() {
        let extra = shell_words::split(extra).map_err(|e| {
            CompilationError::InvalidInput(format!("invalid extra arguments '{extra}': {e}"))
        })?;
        args.extend(extra);
    }

    args.push(request.source_path.clone());
    Ok(args)
}
