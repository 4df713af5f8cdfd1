use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

/// What is being compiled.
pub enum CompilationInput {
    /// A single `.rego` file, compiled outside bundle mode.
    File(PathBuf),
    /// A bundle directory or bundle archive on disk.
    Bundle(PathBuf),
    /// Bundle archive bytes read from a stream.
    Archive(Box<dyn AsyncRead + Send + Unpin>),
    /// Raw policy source text.
    Source(String),
}

impl CompilationInput {
    /// Identifier used in logs and error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) | Self::Bundle(path) => normalize_path(path),
            Self::Archive(_) => "<bundle stream>".to_string(),
            Self::Source(_) => "<policy source>".to_string(),
        }
    }
}

impl fmt::Debug for CompilationInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Bundle(path) => f.debug_tuple("Bundle").field(path).finish(),
            Self::Archive(_) => f.write_str("Archive(..)"),
            Self::Source(source) => f.debug_tuple("Source").field(&source.len()).finish(),
        }
    }
}

/// Where capabilities come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CapabilitiesSource {
    #[default]
    None,
    File(PathBuf),
    Inline(Vec<u8>),
    /// A capabilities version tag, such as `v0.53.1`, overriding the
    /// configured one.
    Version(String),
}

/// Parameters of a single compilation.
///
/// Flags set here are combined with the compiler configuration: booleans are
/// enabled when either side enables them, ignore patterns are unioned, and
/// extra arguments given here replace configured ones.
#[derive(Debug)]
pub struct CompilationParameters {
    pub input: CompilationInput,
    pub entrypoints: BTreeSet<String>,
    pub capabilities: CapabilitiesSource,
    pub prune_unused: bool,
    pub debug: bool,
    pub ignore: BTreeSet<String>,
    pub extra_arguments: Option<String>,
}

impl CompilationParameters {
    pub fn new(input: CompilationInput) -> Self {
        Self {
            input,
            entrypoints: BTreeSet::new(),
            capabilities: CapabilitiesSource::None,
            prune_unused: false,
            debug: false,
            ignore: BTreeSet::new(),
            extra_arguments: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(CompilationInput::File(path.into()))
    }

    pub fn bundle(path: impl Into<PathBuf>) -> Self {
        Self::new(CompilationInput::Bundle(path.into()))
    }

    pub fn archive(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::new(CompilationInput::Archive(Box::new(reader)))
    }

    pub fn source(source: impl Into<String>) -> Self {
        Self::new(CompilationInput::Source(source.into()))
    }

    pub fn with_entrypoints<I, S>(mut self, entrypoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoints.extend(entrypoints.into_iter().map(Into::into));
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitiesSource) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_prune_unused(mut self, prune_unused: bool) -> Self {
        self.prune_unused = prune_unused;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_ignore<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_extra_arguments(mut self, extra_arguments: impl Into<String>) -> Self {
        self.extra_arguments = Some(extra_arguments.into());
        self
    }
}

/// Render a filesystem path with forward slashes and without a leading `./`.
pub fn normalize_path(path: &Path) -> String {
    let unified = path.to_string_lossy().replace('\\', "/");
    match unified.strip_prefix("./") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => unified,
    }
}
