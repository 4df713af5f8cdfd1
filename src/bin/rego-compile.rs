use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rego_compile::compilation::{
    BackendConfig, CapabilitiesSource, CompilationParameters, CompilerConfig, RegoCompiler,
};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Cli,
    Native,
}

#[derive(Parser)]
#[command(name = "rego-compile")]
#[command(about = "Compile Rego policies into OPA wasm bundles")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct RegoCompileCli {
    /// Policy file, bundle directory or bundle archive
    source: Option<PathBuf>,

    /// Compiler configuration file (YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Compiler backend, overrides the configuration file
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Path to the opa executable
    #[arg(long)]
    opa: Option<PathBuf>,

    /// Path to the native compiler library
    #[arg(long)]
    library: Option<PathBuf>,

    /// Entrypoint to compile, may be repeated
    #[arg(short, long = "entrypoint")]
    entrypoints: Vec<String>,

    /// Custom capabilities JSON file
    #[arg(long)]
    capabilities: Option<PathBuf>,

    /// OPA capabilities version to build against
    #[arg(long)]
    capabilities_version: Option<String>,

    /// Treat SOURCE as a bundle
    #[arg(long)]
    bundle: bool,

    /// Where to write the compiled bundle
    #[arg(short, long, default_value = "bundle.tar.gz")]
    output: PathBuf,

    /// Print the compiler version and exit
    #[arg(long)]
    version_info: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RegoCompileCli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: RegoCompileCli) -> Result<()> {
    let config = load_config(&cli)?;
    let compiler = RegoCompiler::new(config).context("Failed to initialize compiler backend")?;

    if cli.version_info {
        let version = compiler.version().await?;
        println!("Backend: {}", compiler.backend_name());
        for (label, value) in [
            ("Version", &version.version),
            ("Build Commit", &version.commit),
            ("Go Version", &version.go_version),
            ("Platform", &version.platform),
        ] {
            println!("{label}: {}", value.as_deref().unwrap_or("unknown"));
        }
        return Ok(());
    }

    let Some(source) = cli.source.clone() else {
        bail!("No SOURCE given; run with --help for usage");
    };

    let mut params = if cli.bundle || source.is_dir() {
        CompilationParameters::bundle(source)
    } else {
        CompilationParameters::file(source)
    }
    .with_entrypoints(cli.entrypoints.iter().cloned());

    if let Some(path) = &cli.capabilities {
        params = params.with_capabilities(CapabilitiesSource::File(path.clone()));
    }

    let mut bundle = compiler.compile(params).await?;
    let bytes = bundle.to_vec()?;
    tokio::fs::write(&cli.output, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    info!("Wrote {} byte bundle to {}", bytes.len(), cli.output.display());
    Ok(())
}

fn load_config(cli: &RegoCompileCli) -> Result<CompilerConfig> {
    let mut config = match &cli.config {
        Some(path) => CompilerConfig::from_file(path)?,
        None => CompilerConfig::default(),
    };

    match cli.backend {
        Some(Backend::Native) => {
            let Some(library_path) = cli.library.clone() else {
                bail!("--backend native requires --library");
            };
            config.backend = BackendConfig::Native { library_path };
        }
        Some(Backend::Cli) if !matches!(config.backend, BackendConfig::Cli { .. }) => {
            config.backend = BackendConfig::default();
        }
        _ => {}
    }

    if let Some(opa) = &cli.opa {
        if let BackendConfig::Cli { tool_path, .. } = &mut config.backend {
            *tool_path = Some(opa.clone());
        }
    }

    if cli.capabilities_version.is_some() {
        config.capabilities_version = cli.capabilities_version.clone();
    }

    Ok(config)
}
