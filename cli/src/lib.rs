use anyhow::{anyhow, Context, Error, Result};
use clap::{Parser, Subcommand};
use log::info;
use oxigraph::io::{RdfFormat, RdfParser, RdfSerializer};
use oxigraph::model::{Dataset, NamedNode};
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use widequad::config::Config;
use widequad::{
    BinaryMetadata, InteractionModel, MemorySession, ResourceMetadata, ResourceRecord,
    ResourceService,
};

#[derive(Debug, Parser)]
#[command(name = "widequad")]
#[command(about = "Store and inspect chunked binaries and resource quads")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose mode - sets the RUST_LOG level to info, defaults to warning level
    #[clap(long, short, action, default_value = "false", global = true)]
    verbose: bool,
    /// Debug mode - sets the RUST_LOG level to debug, defaults to warning level
    #[clap(long, action, default_value = "false", global = true)]
    debug: bool,
    /// Snapshot file holding the store's tables, created on first write
    #[clap(long, short, default_value = "widequad-store.json", global = true)]
    store: PathBuf,
    /// JSON configuration file; CASSANDRA_* environment variables override it
    #[clap(long, short, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Store the content of a file as a chunked binary
    PutBinary {
        /// IRI of the binary
        id: String,
        /// File to read the content from
        file: PathBuf,
        /// Maximum chunk size in bytes, defaults to the configured size
        #[clap(long)]
        chunk_size: Option<usize>,
    },
    /// Print the content of a binary, optionally only bytes FROM..=TO
    CatBinary {
        /// IRI of the binary
        id: String,
        #[clap(long, requires = "to")]
        from: Option<u64>,
        #[clap(long, requires = "from")]
        to: Option<u64>,
        /// Write to this file instead of stdout
        #[clap(long, short)]
        output: Option<PathBuf>,
    },
    /// Remove the content of a binary
    RmBinary {
        /// IRI of the binary
        id: String,
    },
    /// Create (or replace) a resource
    Create {
        /// IRI of the resource
        id: String,
        /// Interaction model, as an IRI or a local name such as BasicContainer
        #[clap(long, short, default_value = "RDFSource")]
        model: String,
        /// IRI of the parent container
        #[clap(long)]
        container: Option<String>,
        /// RDF file with the resource's statements (format from the extension)
        #[clap(long, short)]
        file: Option<PathBuf>,
        /// IRI of the binary holding the content of a NonRDFSource
        #[clap(long)]
        binary: Option<String>,
        #[clap(long)]
        mime_type: Option<String>,
        #[clap(long)]
        size: Option<u64>,
        /// Replace an existing resource, keeping its creation token
        #[clap(long, action, default_value = "false")]
        replace: bool,
    },
    /// Append statements to the immutable partition of a resource
    Add {
        /// IRI of the resource
        id: String,
        /// RDF file with the statements (format from the extension)
        file: PathBuf,
    },
    /// Bump the modification time of a resource
    Touch {
        /// IRI of the resource
        id: String,
    },
    /// Delete a resource and the content of its binary
    Delete {
        /// IRI of the resource
        id: String,
    },
    /// Print every quad of a resource as N-Quads
    Quads {
        /// IRI of the resource
        id: String,
        /// Write to this file instead of stdout
        #[clap(long, short)]
        output: Option<PathBuf>,
    },
    /// Print the header of a resource
    Info {
        /// IRI of the resource
        id: String,
        /// Output JSON instead of text
        #[clap(long, action, default_value = "false")]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Also save it to this file
        #[clap(long)]
        save: Option<PathBuf>,
    },
}

impl Commands {
    fn writes(&self) -> bool {
        matches!(
            self,
            Commands::PutBinary { .. }
                | Commands::RmBinary { .. }
                | Commands::Create { .. }
                | Commands::Add { .. }
                | Commands::Touch { .. }
                | Commands::Delete { .. }
        )
    }
}

pub fn run() -> Result<()> {
    widequad::init_logging();
    let cmd = Cli::parse();
    execute(cmd)
}

pub fn run_from_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    widequad::init_logging();
    let cmd = Cli::try_parse_from(args).map_err(Error::from)?;
    execute(cmd)
}

fn parse_iri(iri: &str) -> Result<NamedNode> {
    NamedNode::new(iri).map_err(|e| anyhow!("'{}' is not an IRI: {}", iri, e))
}

/// Reads an RDF file into a dataset, picking the format from the extension
/// and falling back to N-Quads.
fn read_dataset(path: &Path) -> Result<Dataset> {
    let format = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(RdfFormat::from_extension)
        .unwrap_or(RdfFormat::NQuads);
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut dataset = Dataset::new();
    for quad in RdfParser::from_format(format).for_reader(BufReader::new(file)) {
        let quad = quad.with_context(|| format!("cannot parse {}", path.display()))?;
        dataset.insert(&quad);
    }
    Ok(dataset)
}

fn open_output(output: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => Config::default(),
    };
    config.with_overrides(|key| std::env::var(key).ok())
}

fn print_record(record: &ResourceRecord) {
    println!("Identifier: {}", record.identifier().as_str());
    println!("Interaction model: {}", record.interaction_model());
    if let Some(container) = record.container() {
        println!("Container: {}", container.as_str());
    }
    println!("Has ACL: {}", record.has_acl());
    println!("Modified: {}", record.modified().to_rfc3339());
    println!("Created: {}", record.created());
    if let Some(binary) = record.binary() {
        println!("Binary: {}", binary.identifier.as_str());
        if let Some(mime_type) = &binary.mime_type {
            println!("  MIME type: {}", mime_type);
        }
        if let Some(size) = binary.size {
            println!("  Size: {}", size);
        }
    }
}

fn record_json(record: &ResourceRecord) -> serde_json::Value {
    serde_json::json!({
        "identifier": record.identifier().as_str(),
        "interactionModel": record.interaction_model().iri().as_str(),
        "container": record.container().map(|c| c.as_str()),
        "hasAcl": record.has_acl(),
        "modified": record.modified().to_rfc3339(),
        "created": record.created().to_string(),
        "binary": record.binary().map(|b| serde_json::json!({
            "identifier": b.identifier.as_str(),
            "mimeType": b.mime_type,
            "size": b.size,
        })),
    })
}

fn execute(cmd: Cli) -> Result<()> {
    // The RUST_LOG env var is set by `init_logging` if WIDEQUAD_LOG is present.
    // CLI flags for verbosity take precedence. If nothing is set, we default to "warn".
    if cmd.debug {
        std::env::set_var("RUST_LOG", "debug");
    } else if cmd.verbose {
        std::env::set_var("RUST_LOG", "info");
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    let _ = env_logger::try_init();

    let config = load_config(cmd.config.as_deref())?;
    if cmd.verbose || cmd.debug {
        config.print();
    }

    let session = Arc::new(
        MemorySession::open_or_create(&cmd.store)
            .with_context(|| format!("cannot open store {}", cmd.store.display()))?,
    );
    info!("Using store {}", cmd.store.display());
    let service = ResourceService::new(Arc::clone(&session), &config);
    let writes = cmd.command.writes();

    match cmd.command {
        Commands::PutBinary {
            id,
            file,
            chunk_size,
        } => {
            let id = parse_iri(&id)?;
            let reader = BufReader::new(
                File::open(&file).with_context(|| format!("cannot open {}", file.display()))?,
            );
            let chunk_size = chunk_size.unwrap_or(config.max_chunk_size);
            let summary = service.binaries().write(&id, reader, chunk_size)?;
            println!(
                "Stored {} bytes in {} chunk(s) as {}",
                summary.bytes,
                summary.chunks,
                id.as_str()
            );
        }
        Commands::CatBinary {
            id,
            from,
            to,
            output,
        } => {
            let id = parse_iri(&id)?;
            let mut out = open_output(output.as_deref())?;
            match (from, to) {
                (Some(from), Some(to)) => {
                    io::copy(&mut service.binaries().read_range(&id, from, to)?, &mut out)?;
                }
                _ => {
                    io::copy(&mut service.binaries().read(&id)?, &mut out)?;
                }
            }
            out.flush()?;
        }
        Commands::RmBinary { id } => {
            service.binaries().delete(&parse_iri(&id)?)?;
        }
        Commands::Create {
            id,
            model,
            container,
            file,
            binary,
            mime_type,
            size,
            replace,
        } => {
            let model: InteractionModel = model.parse()?;
            let mut metadata = ResourceMetadata::new(parse_iri(&id)?, model);
            if let Some(container) = container {
                metadata = metadata.with_container(parse_iri(&container)?);
            }
            if let Some(binary) = binary {
                metadata = metadata.with_binary(BinaryMetadata {
                    identifier: parse_iri(&binary)?,
                    mime_type,
                    size,
                });
            }
            let dataset = match file {
                Some(file) => read_dataset(&file)?,
                None => Dataset::new(),
            };
            let record = if replace {
                service.replace(&metadata, &dataset)?
            } else {
                service.create(&metadata, &dataset)?
            };
            println!("{} {}", record.identifier().as_str(), record.created());
        }
        Commands::Add { id, file } => {
            let dataset = read_dataset(&file)?;
            service.add(&parse_iri(&id)?, &dataset)?;
            println!("Added {} quad(s)", dataset.len());
        }
        Commands::Touch { id } => {
            let id = parse_iri(&id)?;
            if !service.touch(&id)? {
                return Err(anyhow!("Resource {} not found", id.as_str()));
            }
        }
        Commands::Delete { id } => {
            let id = parse_iri(&id)?;
            if !service.delete(&id)? {
                return Err(anyhow!("Resource {} not found", id.as_str()));
            }
        }
        Commands::Quads { id, output } => {
            let id = parse_iri(&id)?;
            let resource = service
                .get(&id)?
                .ok_or_else(|| anyhow!("Resource {} not found", id.as_str()))?;
            let mut serializer = RdfSerializer::from_format(RdfFormat::NQuads)
                .for_writer(open_output(output.as_deref())?);
            for quad in resource.stream()? {
                serializer.serialize_quad(&quad?)?;
            }
            serializer.finish()?.flush()?;
        }
        Commands::Info { id, json } => {
            let id = parse_iri(&id)?;
            let resource = service
                .get(&id)?
                .ok_or_else(|| anyhow!("Resource {} not found", id.as_str()))?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&record_json(resource.record()))?
                );
            } else {
                print_record(resource.record());
            }
        }
        Commands::Config { save } => {
            config.print();
            if let Some(path) = save {
                config.save_to_file(&path)?;
                println!("Saved configuration to {}", path.display());
            }
        }
    }

    if writes {
        session
            .save(&cmd.store)
            .with_context(|| format!("cannot save store {}", cmd.store.display()))?;
    }
    Ok(())
}
