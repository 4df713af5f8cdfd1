use crate::compilation::CompilerVersion;

/// Parse the `Key: Value` lines printed by `opa version`.
pub fn parse_version_output(output: &str) -> CompilerVersion {
    let mut version = CompilerVersion::default();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };

        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key.trim() {
            "Version" => version.version = Some(value.to_string()),
            "Build Commit" => version.commit = Some(value.to_string()),
            "Go Version" => version.go_version = Some(value.to_string()),
            "Platform" => version.platform = Some(value.to_string()),
            _ => {}
        }
    }

    version
}
