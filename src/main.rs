use clap::{Parser, Subcommand, ValueEnum};
use image_variants::config::{self, ResolverConfig};
use image_variants::imaging::RustBackend;
use image_variants::source::{self, LibraryRepository};
use image_variants::{ImageReference, ItemId, VariantQuery, VariantResolver, cache, output};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "image-variants")]
#[command(version)]
#[command(about = "Resolve and cache resized image variants")]
#[command(long_about = "\
Resolve and cache resized image variants

Give an image (library item id or URL) and a target box; get back the URL and
size of the file to display. Images that already fit are returned as-is.
Larger ones are scaled (or cropped with --crop) into a derived file written
next to the source, which is reused on every later request:

  public/uploads/
  ├── sunset.jpg                   # source, 2000x1000
  ├── sunset-140x70.jpg            # --width 140 --height 110
  └── sunset-150x150-crop.jpg      # --size thumbnail

URLs are mapped onto document_root; item ids come from the library file,
built with 'image-variants index'.

Run 'image-variants gen-config' to generate a documented config.toml.
Set RUST_LOG (e.g. RUST_LOG=image_variants=debug) for more detail.")]
struct Cli {
    /// Config file (missing file = stock defaults)
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Which source image: a library item or a URL.
#[derive(clap::Args, Clone)]
struct ReferenceArgs {
    /// Library item id
    #[arg(long)]
    id: Option<u64>,

    /// Image URL (absolute, or a path under the document root)
    #[arg(long)]
    url: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
    Html,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve one image to the variant for a target box
    Resolve {
        #[command(flatten)]
        reference: ReferenceArgs,

        /// Named size from config (`full` = original)
        #[arg(long, conflicts_with_all = ["width", "height"])]
        size: Option<String>,

        /// Target box width
        #[arg(long, requires = "height")]
        width: Option<u32>,

        /// Target box height
        #[arg(long, requires = "width")]
        height: Option<u32>,

        /// Crop to the exact box instead of fitting inside it
        #[arg(long)]
        crop: bool,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Alt text for --format html
        #[arg(long, default_value = "")]
        alt: String,
    },
    /// Resolve every request in a JSON file (array of {id|url, size|width+height, crop})
    Batch { file: PathBuf },
    /// List the variants generated for an image
    Variants {
        #[command(flatten)]
        reference: ReferenceArgs,
    },
    /// Delete generated variants for one image, or everywhere with --all
    Purge {
        #[command(flatten)]
        reference: ReferenceArgs,

        /// Purge every variant under the document root. A file counts as a
        /// variant only if its source sits next to it and, for fit names, its
        /// size keeps the source's aspect ratio.
        #[arg(long, conflicts_with_all = ["id", "url"])]
        all: bool,
    },
    /// Rebuild the library file from images under the document root
    Index,
    /// Show the named sizes
    Sizes,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    // gen-config must work even when the current config file is broken.
    let config = if matches!(cli.command, Command::GenConfig) {
        ResolverConfig::default()
    } else {
        let config = config::load_config(&cli.config)?;
        tracing::debug!(config = %cli.config.display(), "configuration loaded");
        config
    };

    match cli.command {
        Command::Resolve {
            reference,
            size,
            width,
            height,
            crop,
            format,
            alt,
        } => {
            let resolver = build_resolver(&config)?;
            let query = VariantQuery {
                id: reference.id.map(ItemId),
                url: reference.url,
                size,
                width,
                height,
                crop,
            };
            let resolved = resolver.resolve_query(&query)?;
            match format {
                Format::Text => output::print_lines(&output::format_resolved(&resolved)),
                Format::Json => println!("{}", output::descriptor_json(&resolved.descriptor)?),
                Format::Html => println!("{}", output::img_tag(&resolved.descriptor, &alt)),
            }
        }
        Command::Batch { file } => {
            let content = std::fs::read_to_string(&file)?;
            let queries: Vec<VariantQuery> = serde_json::from_str(&content)?;
            init_thread_pool(&config.processing);
            let resolver = build_resolver(&config)?;
            let report = resolver.resolve_batch(&queries);
            output::print_lines(&output::format_batch(&queries, &report));
        }
        Command::Variants { reference } => {
            let resolver = build_resolver(&config)?;
            let source = resolver.source(&reference.to_reference()?)?;
            let variants = cache::list_variants(&source.path, source.original)?;
            output::print_lines(&output::format_variants(
                &source,
                &variants,
                &config.document_root,
            ));
        }
        Command::Purge { reference, all } => {
            let removed = if all {
                cache::purge_tree(&config.document_root, &RustBackend::new())?
            } else {
                let resolver = build_resolver(&config)?;
                let source = resolver.source(&reference.to_reference()?)?;
                cache::purge_variants(&source.path, source.original)?
            };
            output::print_lines(&output::format_purged(&removed, &config.document_root));
        }
        Command::Index => {
            let entries =
                source::build_library(&config.document_root, &config.site_url, &RustBackend::new())?;
            source::save_library(&config.library, &entries)?;
            output::print_lines(&output::format_index_output(&entries, &config.library));
        }
        Command::Sizes => {
            output::print_lines(&output::format_sizes(&config.sizes));
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

impl ReferenceArgs {
    fn to_reference(&self) -> Result<ImageReference, image_variants::ResolveError> {
        ImageReference::from_parts(self.id.map(ItemId), self.url.clone())
    }
}

fn build_resolver(
    config: &ResolverConfig,
) -> Result<VariantResolver<RustBackend, LibraryRepository>, source::LibraryError> {
    let library = load_library(&config.library)?;
    Ok(VariantResolver::from_config(
        RustBackend::new(),
        library,
        config,
    ))
}

fn load_library(path: &Path) -> Result<LibraryRepository, source::LibraryError> {
    let library = LibraryRepository::load_or_empty(path)?;
    tracing::debug!(path = %path.display(), items = library.len(), "library loaded");
    Ok(library)
}

/// Log to stderr; `RUST_LOG` overrides the default filter.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("image_variants=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores — user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
