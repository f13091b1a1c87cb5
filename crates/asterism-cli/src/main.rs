//! Asterism CLI
//!
//! Command-line interface for the schema-driven property-graph store:
//! - Managing the attribute-type registry and schemas
//! - Creating graphs, vertices and transactions, and editing attributes
//! - Importing legacy star exchange documents (background, cancellable)
//! - Exporting graphs back to the star format
//!
//! State lives in a JSON snapshot (`--store`), loaded before and saved
//! after every mutating command.

use anyhow::{anyhow, Context, Result};
use asterism_core::AttribKind;
use asterism_ingest_star::{import_document, to_star_document, ImportOptions, StarDocument};
use asterism_store::records::{DefFamily, DefOwner};
use asterism_store::GraphStore;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "asterism")]
#[command(author, version, about = "Asterism: schema-driven property-graph store")]
struct Cli {
    /// Store snapshot file; created on first mutating command.
    #[arg(long, global = true, default_value = "asterism.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attribute-type registry.
    Types {
        #[command(subcommand)]
        command: TypeCommands,
    },
    /// Schemas and their definition templates.
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
    /// Graphs.
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },
    /// Vertices.
    Vertex {
        #[command(subcommand)]
        command: VertexCommands,
    },
    /// Transactions.
    Transaction {
        #[command(subcommand)]
        command: TransactionCommands,
    },
    /// Import a star exchange document as a new graph.
    Import {
        /// Extracted star payload (JSON file).
        input: PathBuf,
        /// Graph title; defaults to the input file name.
        #[arg(long)]
        title: Option<String>,
        /// Records per write batch.
        #[arg(long, default_value_t = asterism_ingest_star::pipeline::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// Export a graph as a star exchange document.
    Export {
        /// Graph title.
        title: String,
        /// Output file.
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum TypeCommands {
    /// Register an attribute type.
    Add { label: String, kind: AttribKind },
    /// List registered attribute types.
    List,
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Create a schema.
    Add { label: String },
    /// List schemas.
    List,
    /// Add a definition template to a schema.
    Define {
        schema: String,
        #[arg(long, value_enum)]
        family: FamilyArg,
        label: String,
        /// Registered attribute-type label.
        r#type: String,
        #[arg(long)]
        descr: Option<String>,
        #[arg(long)]
        default: Option<String>,
    },
}

#[derive(Subcommand)]
enum GraphCommands {
    /// Create a graph, optionally from a schema.
    Create {
        title: String,
        #[arg(long)]
        schema: Option<String>,
    },
    /// List graphs.
    List,
    /// Print a graph's star-shaped projection.
    Show { title: String },
    /// Delete a graph and everything it owns.
    Delete { title: String },
    /// Set a graph attribute.
    Set {
        title: String,
        label: String,
        /// JSON value; bare words are treated as strings.
        value: String,
    },
}

#[derive(Subcommand)]
enum VertexCommands {
    /// Create a vertex in a graph.
    Add { graph: String },
    /// Set a vertex attribute.
    Set {
        graph: String,
        vx_id: i64,
        label: String,
        value: String,
    },
    /// Delete a vertex and its incident transactions.
    Delete { graph: String, vx_id: i64 },
}

#[derive(Subcommand)]
enum TransactionCommands {
    /// Create a transaction between two vertices.
    Add {
        graph: String,
        src: i64,
        dst: i64,
        #[arg(long)]
        directed: bool,
    },
    /// Set a transaction attribute.
    Set {
        graph: String,
        tx_id: i64,
        label: String,
        value: String,
    },
    /// Delete a transaction.
    Delete { graph: String, tx_id: i64 },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FamilyArg {
    Graph,
    Vertex,
    Transaction,
}

impl From<FamilyArg> for DefFamily {
    fn from(arg: FamilyArg) -> Self {
        match arg {
            FamilyArg::Graph => DefFamily::Graph,
            FamilyArg::Vertex => DefFamily::Vertex,
            FamilyArg::Transaction => DefFamily::Transaction,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = load_store(&cli.store)?;

    match cli.command {
        Commands::Types { command } => match command {
            TypeCommands::Add { label, kind } => {
                store.create_attrib_type(&label, kind)?;
                save_store(&store, &cli.store)?;
                println!("{} type {} ({kind})", "Added".green().bold(), label.bold());
            }
            TypeCommands::List => {
                for t in store.attrib_types() {
                    println!("{:<24} {}", t.label, t.kind);
                }
            }
        },
        Commands::Schema { command } => match command {
            SchemaCommands::Add { label } => {
                store.create_schema(&label)?;
                save_store(&store, &cli.store)?;
                println!("{} schema {}", "Added".green().bold(), label.bold());
            }
            SchemaCommands::List => {
                for s in store.schemas() {
                    let mut counts = Vec::new();
                    for family in DefFamily::ALL {
                        counts.push(format!(
                            "{}: {}",
                            family.name(),
                            store.definitions(DefOwner::Schema(s.id), family).len()
                        ));
                    }
                    println!("{:<24} {}", s.label, counts.join(", "));
                }
            }
            SchemaCommands::Define {
                schema,
                family,
                label,
                r#type,
                descr,
                default,
            } => {
                let schema = store.schema_by_label(&schema)?;
                store.define_attribute(
                    DefOwner::Schema(schema.id),
                    family.into(),
                    &label,
                    &r#type,
                    descr.as_deref(),
                    default.as_deref(),
                )?;
                save_store(&store, &cli.store)?;
                println!(
                    "{} {} template {} ({})",
                    "Defined".green().bold(),
                    DefFamily::from(family).name(),
                    label.bold(),
                    r#type
                );
            }
        },
        Commands::Graph { command } => match command {
            GraphCommands::Create { title, schema } => {
                let schema_id = match schema {
                    Some(label) => Some(store.schema_by_label(&label)?.id),
                    None => None,
                };
                let graph = store.create_graph(&title, schema_id)?;
                save_store(&store, &cli.store)?;
                println!("{} graph {} (id {})", "Created".green().bold(), title.bold(), graph.id);
            }
            GraphCommands::List => {
                for g in store.graphs() {
                    println!(
                        "{:<24} vertices: {:<6} transactions: {}",
                        g.title,
                        store.vertices(g.id).len(),
                        store.transactions(g.id).len()
                    );
                }
            }
            GraphCommands::Show { title } => {
                let graph = store.graph_by_title(&title)?;
                let projection = store.graph_projection(graph.id)?;
                println!("{}", serde_json::to_string_pretty(&projection)?);
            }
            GraphCommands::Delete { title } => {
                let graph = store.graph_by_title(&title)?;
                store.delete_graph(graph.id)?;
                save_store(&store, &cli.store)?;
                println!("{} graph {}", "Deleted".red().bold(), title.bold());
            }
            GraphCommands::Set { title, label, value } => {
                let graph = store.graph_by_title(&title)?;
                store.set_graph_attribute(graph.id, &label, &parse_value(&value))?;
                save_store(&store, &cli.store)?;
                println!("{} {} on {}", "Set".green().bold(), label.bold(), title);
            }
        },
        Commands::Vertex { command } => match command {
            VertexCommands::Add { graph } => {
                let graph = store.graph_by_title(&graph)?;
                let vertex = store.create_vertex(graph.id)?;
                save_store(&store, &cli.store)?;
                println!("{} vertex {}", "Created".green().bold(), vertex.vx_id);
            }
            VertexCommands::Set {
                graph,
                vx_id,
                label,
                value,
            } => {
                let graph = store.graph_by_title(&graph)?;
                store.set_vertex_attribute(graph.id, vx_id, &label, &parse_value(&value))?;
                save_store(&store, &cli.store)?;
                println!("{} {} on vertex {}", "Set".green().bold(), label.bold(), vx_id);
            }
            VertexCommands::Delete { graph, vx_id } => {
                let graph = store.graph_by_title(&graph)?;
                store.delete_vertex(graph.id, vx_id)?;
                save_store(&store, &cli.store)?;
                println!("{} vertex {}", "Deleted".red().bold(), vx_id);
            }
        },
        Commands::Transaction { command } => match command {
            TransactionCommands::Add {
                graph,
                src,
                dst,
                directed,
            } => {
                let graph = store.graph_by_title(&graph)?;
                let tx = store.create_transaction(graph.id, src, dst, directed)?;
                save_store(&store, &cli.store)?;
                println!(
                    "{} transaction {} ({src} {} {dst})",
                    "Created".green().bold(),
                    tx.tx_id,
                    if directed { "→" } else { "—" }
                );
            }
            TransactionCommands::Set {
                graph,
                tx_id,
                label,
                value,
            } => {
                let graph = store.graph_by_title(&graph)?;
                store.set_transaction_attribute(graph.id, tx_id, &label, &parse_value(&value))?;
                save_store(&store, &cli.store)?;
                println!("{} {} on transaction {}", "Set".green().bold(), label.bold(), tx_id);
            }
            TransactionCommands::Delete { graph, tx_id } => {
                let graph = store.graph_by_title(&graph)?;
                store.delete_transaction(graph.id, tx_id)?;
                save_store(&store, &cli.store)?;
                println!("{} transaction {}", "Deleted".red().bold(), tx_id);
            }
        },
        Commands::Import {
            input,
            title,
            chunk_size,
        } => {
            cmd_import(&store, &input, title.as_deref(), chunk_size)?;
            save_store(&store, &cli.store)?;
        }
        Commands::Export { title, out } => {
            cmd_export(&store, &title, &out)?;
        }
    }

    Ok(())
}

fn cmd_import(store: &GraphStore, input: &Path, title: Option<&str>, chunk_size: usize) -> Result<()> {
    let title = match title {
        Some(t) => t.to_string(),
        None => input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("input path has no file name: {}", input.display()))?,
    };
    println!("{} {}", "Importing".green().bold(), input.display());
    let text = fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let doc = StarDocument::parse(&text)?;
    let options = ImportOptions {
        chunk_size,
        ..Default::default()
    };
    let report = import_document(store, &title, &doc, &options)?;
    println!(
        "{} graph {} ({} vertices, {} transactions)",
        "Imported".green().bold(),
        report.title.bold(),
        report.vertices,
        report.transactions
    );
    Ok(())
}

fn cmd_export(store: &GraphStore, title: &str, out: &Path) -> Result<()> {
    let graph = store.graph_by_title(title)?;
    let projection = store.graph_projection(graph.id)?;
    let document = to_star_document(&projection);
    fs::write(out, serde_json::to_string_pretty(&document)?)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("{} {}", "Exported".green().bold(), out.display().to_string().bold());
    Ok(())
}

fn load_store(path: &Path) -> Result<GraphStore> {
    if path.exists() {
        GraphStore::load_snapshot(path)
            .with_context(|| format!("loading store {}", path.display()))
    } else {
        Ok(GraphStore::new())
    }
}

fn save_store(store: &GraphStore, path: &Path) -> Result<()> {
    store
        .save_snapshot(path)
        .with_context(|| format!("saving store {}", path.display()))
}

/// Parse a CLI value argument: valid JSON is taken as-is, anything else is
/// a bare string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
