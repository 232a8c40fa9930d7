use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Result, bail};
use clap::{Args, Parser};
use esp_idf_bindings::{
    BindingsHeader,
    Chip,
    EspIdfComponents,
    EspIdfVersion,
    IdfConfiguration,
    cfg::{BuildArgs, CfgCollection},
    config::{self, BuildConfig},
    kconfig::Kconfig,
    matrix::{IdfTree, Matrix},
};
use strum::IntoEnumIterator;

mod git;

/// Releases `check-matrix` resolves the header for by default: the first
/// unsupported one, then the last patch release of every supported minor.
const DEFAULT_MATRIX: &[&str] = &[
    "4.3.1", "4.3.2", "4.3.7", "4.4.8", "5.0.7", "5.1.5", "5.2.3", "5.3.2", "5.4.1",
];

// ----------------------------------------------------------------------------
// Command-line Interface

#[derive(Debug, Parser)]
enum Cli {
    /// Print the headers bindings.h includes for a configuration.
    Resolve(ResolveArgs),
    /// Write bindings.h with its conditionals resolved for a configuration.
    Render(RenderArgs),
    /// Print the rustc cfgs of a configuration.
    Cfgs(ConfigArgs),
    /// Resolve bindings.h for many versions and chips.
    CheckMatrix(CheckMatrixArgs),
    /// Update the list of all cfgs any configuration can produce.
    CollectCfgs(CollectCfgsArgs),
    /// Generate Rust bindings for a configuration.
    #[cfg(feature = "bindgen")]
    GenerateBindings(GenerateBindingsArgs),
    /// Print the sdkconfig.defaults matching a cargo profile.
    SdkconfigDefaults(SdkconfigDefaultsArgs),
    /// Print the idf_component.yml for the extra components of a crate.
    ComponentManifest(ComponentManifestArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// ESP-IDF version, e.g. `5.1.2`.
    #[arg(long, default_value_t = EspIdfVersion::DEFAULT)]
    version: EspIdfVersion,
    /// Chip to target.
    #[arg(long, value_enum, env = "MCU")]
    chip: Chip,
    /// sdkconfig (or sdkconfig.json) with the Kconfig options.
    #[arg(long)]
    sdkconfig: Option<PathBuf>,
    /// Components that are part of the build (all of them if omitted).
    #[arg(long, value_delimiter = ',')]
    components: Option<Vec<String>>,
    /// ESP-IDF checkout to read the SoC capabilities from.
    #[arg(long, env = "IDF_PATH")]
    idf_path: Option<PathBuf>,
    /// bindings.h to use instead of the bundled one.
    #[arg(long)]
    header: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Print every active directive as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Where to write the header (stdout if omitted).
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CheckMatrixArgs {
    /// Versions to check.
    #[arg(long, value_delimiter = ',', default_values = DEFAULT_MATRIX)]
    versions: Vec<EspIdfVersion>,
    /// Chips to check.
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = Chip::iter())]
    chips: Vec<Chip>,
    /// sdkconfig shared by all configurations.
    #[arg(long)]
    sdkconfig: Option<PathBuf>,
    /// ESP-IDF checkout to look the selected headers up in. Only its own
    /// version is checked then.
    #[arg(long)]
    idf_path: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CollectCfgsArgs {
    /// File to update.
    #[arg(long, default_value = "esp-idf-bindings/collected_cfgs.txt")]
    output: PathBuf,
    /// Also add every release tagged in the ESP-IDF repository.
    #[arg(long)]
    git_tags: bool,
    #[arg(long, env = "ESP_IDF_REPOSITORY", default_value = config::DEFAULT_REPOSITORY)]
    repository: String,
}

#[cfg(feature = "bindgen")]
#[derive(Debug, Args)]
struct GenerateBindingsArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Directory to write the bindings to.
    #[arg(long)]
    out_dir: PathBuf,
    /// Include directories of the ESP-IDF build.
    #[arg(short = 'I', long = "include")]
    includes: Vec<PathBuf>,
    /// Sysroot of the GCC toolchain.
    #[arg(long)]
    sysroot: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SdkconfigDefaultsArgs {
    /// Cargo's `OPT_LEVEL`.
    #[arg(long, env = "OPT_LEVEL")]
    opt_level: String,
    /// Cargo's `DEBUG`.
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: String,
}

#[derive(Debug, Args)]
struct ComponentManifestArgs {
    /// Cargo.toml of the crate.
    manifest: PathBuf,
}

// ----------------------------------------------------------------------------
// Application

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_module("xtask", log::LevelFilter::Info)
        .filter_module("esp_idf_bindings", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let workspace = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let workspace = match workspace.parent() {
        Some(parent) => parent.canonicalize()?,
        None => bail!("xtask must live in a workspace"),
    };

    match Cli::parse() {
        Cli::Resolve(args) => resolve(args),
        Cli::Render(args) => render(args),
        Cli::Cfgs(args) => cfgs(args),
        Cli::CheckMatrix(args) => check_matrix(args),
        Cli::CollectCfgs(args) => collect_cfgs(&workspace, args),
        #[cfg(feature = "bindgen")]
        Cli::GenerateBindings(args) => generate_bindings(args),
        Cli::SdkconfigDefaults(args) => sdkconfig_defaults(args),
        Cli::ComponentManifest(args) => component_manifest(args),
    }
}

impl ConfigArgs {
    fn header(&self) -> Result<BindingsHeader> {
        match &self.header {
            Some(path) => BindingsHeader::from_path(path),
            None => Ok(BindingsHeader::esp_idf()),
        }
    }

    fn configuration(&self) -> Result<IdfConfiguration> {
        let mut config = IdfConfiguration::new(self.version, self.chip);

        if let Some(sdkconfig) = &self.sdkconfig {
            config = config.with_kconfig(Kconfig::load(sdkconfig)?);
        }

        if let Some(components) = &self.components {
            config = config.with_components(EspIdfComponents::from_enabled(components));
        }

        if let Some(idf_path) = &self.idf_path {
            config.load_soc_caps(idf_path)?;
        }

        Ok(config)
    }
}

// ----------------------------------------------------------------------------
// Subcommands

fn resolve(args: ResolveArgs) -> Result<()> {
    let config = args.config.configuration()?;
    let resolution = args.config.header()?.resolve(&config)?;

    let mut stdout = io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut stdout, &resolution)?;
        writeln!(stdout)?;
    } else {
        for include in resolution.includes() {
            writeln!(stdout, "{}", include.path)?;
        }
    }

    Ok(())
}

fn render(args: RenderArgs) -> Result<()> {
    let config = args.config.configuration()?;
    let header = args.config.header()?;

    match args.output {
        Some(path) => {
            header.flatten_to(&config, &path)?;
            log::info!("Wrote {}", path.display());
        }
        None => {
            let resolution = header.resolve(&config)?;
            print!("{}", header.render(&resolution, &config)?);
        }
    }

    Ok(())
}

fn cfgs(args: ConfigArgs) -> Result<()> {
    let build_args = BuildArgs::new(&args.configuration()?);

    for arg in &build_args.cfg_args.args {
        println!("{arg}");
    }

    Ok(())
}

fn check_matrix(args: CheckMatrixArgs) -> Result<()> {
    let tree = args.idf_path.as_deref().map(IdfTree::open).transpose()?;

    let versions = match &tree {
        Some(tree) => vec![tree.version()?],
        None => args.versions,
    };

    let mut template = IdfConfiguration::new(EspIdfVersion::DEFAULT, Chip::Esp32);
    if let Some(sdkconfig) = &args.sdkconfig {
        template = template.with_kconfig(Kconfig::load(sdkconfig)?);
    }

    let report = Matrix::new(versions)
        .with_chips(args.chips)
        .with_template(template)
        .run(&BindingsHeader::esp_idf(), tree.as_ref());

    print!("{report}");

    let failures = report.failures().collect::<Vec<_>>();
    if !failures.is_empty() {
        for (entry, failure) in &failures {
            log::error!("v{} {}: {failure}", entry.version, entry.chip);
        }
        bail!("{} configurations failed", failures.len());
    }

    Ok(())
}

fn collect_cfgs(workspace: &Path, args: CollectCfgsArgs) -> Result<()> {
    let path = workspace.join(&args.output);

    let mut collection = if path.exists() {
        CfgCollection::load(&path)?
    } else {
        CfgCollection::new().with_builtin()
    };

    let versions = if args.git_tags {
        git::release_versions(&args.repository)?
    } else {
        vec![EspIdfVersion::DEFAULT]
    };

    collection.add_configurations(&versions);
    collection.save(&path)?;
    log::info!("Wrote {} cfgs to {}", collection.len(), path.display());

    Ok(())
}

#[cfg(feature = "bindgen")]
fn generate_bindings(args: GenerateBindingsArgs) -> Result<()> {
    use esp_idf_bindings::bindgen::BindingsGenerator;

    let config = args.config.configuration()?;
    config.version.ensure_supported()?;

    let mut generator = BindingsGenerator::new(args.config.header()?, &config).with_clang_args(
        args.includes
            .iter()
            .map(|dir| format!("-I{}", dir.display())),
    );
    if let Some(sysroot) = args.sysroot {
        generator = generator.with_sysroot(sysroot);
    }

    fs::create_dir_all(&args.out_dir)?;
    let generated = generator.generate(&args.out_dir)?;

    log::info!(
        "Generated {} for ESP-IDF v{}",
        generated.bindings_file.display(),
        generated.version
    );

    Ok(())
}

fn sdkconfig_defaults(args: SdkconfigDefaultsArgs) -> Result<()> {
    print!("{}", config::optimization_sdkconfig(&args.opt_level, &args.debug)?);
    Ok(())
}

fn component_manifest(args: ComponentManifestArgs) -> Result<()> {
    let manifest = fs::read_to_string(&args.manifest)?;
    let manifest_dir = match args.manifest.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.canonicalize()?,
        _ => std::env::current_dir()?,
    };

    let config = BuildConfig::from_env()?.with_root_manifest(&manifest, &manifest_dir)?;

    for dir in config.extra_component_dirs()? {
        log::info!("Extra component: {}", dir.display());
    }

    match config.generate_idf_component_yml() {
        Some(yml) => print!("{yml}"),
        None => log::info!("No remote components"),
    }

    Ok(())
}
