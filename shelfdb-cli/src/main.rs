use clap::{Parser, Subcommand, ValueEnum};
use shelfdb::{DeleteOptions, FindOptions, PutResult, Store, StoreConfig, WriteMode};
use std::path::{Path, PathBuf};
use std::process;

/// shelfdb inspector: look into and edit a shelfdb store from the command line
#[derive(Parser)]
#[command(name = "shelfdb", version, about)]
struct Cli {
    /// Path to the database file
    #[arg(long, default_value = "db/data.db")]
    db: PathBuf,

    /// YAML store config; its storage setting replaces --db
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List collections that hold documents
    Collections,

    /// Get a single document by ID
    Get {
        /// Collection name
        collection: String,
        /// Document ID
        id: String,
    },

    /// Find documents with the filter DSL
    Find {
        /// Collection name
        collection: String,
        /// Filter (e.g. --filter "age>=40&&race=Siamese")
        #[arg(long)]
        filter: Option<String>,
        /// Sort (e.g. --sort "age>" or --sort age=desc)
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Count documents, optionally matching a filter
    Count {
        /// Collection name
        collection: String,
        #[arg(long)]
        filter: Option<String>,
    },

    /// Store a raw value under a key
    Put {
        /// Collection name
        collection: String,
        key: String,
        /// JSON value; anything that does not parse is stored as a string
        value: String,
        /// Leave an existing value untouched
        #[arg(long)]
        if_absent: bool,
    },

    /// Save a document, generating an ID when it has none
    Save {
        /// Collection name
        collection: String,
        /// Field values (e.g. --field name="Alice Chen")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Whole document as JSON, merged under the --field values
        #[arg(long)]
        json: Option<String>,
    },

    /// Delete documents by ID or filter
    Delete {
        /// Collection name
        collection: String,
        #[arg(long, conflicts_with = "filter", required_unless_present = "filter")]
        id: Option<String>,
        #[arg(long)]
        filter: Option<String>,
        /// Delete at most this many matches
        #[arg(long)]
        limit: Option<usize>,
        /// Show what would be deleted without actually deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Import JSON files (an array of documents or a single document each)
    Import {
        /// Collection name
        collection: String,
        /// Glob pattern (e.g. "data/cats-*.json")
        pattern: String,
    },

    /// Bulk export a collection
    Export {
        /// Collection name
        collection: String,
        #[arg(long)]
        sort: Option<String>,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn open_store(cli: &Cli) -> CliResult<Store> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::file(&cli.db),
    };
    // one-shot process: write inline and skip the watch pool
    config.write_mode = WriteMode::Sync;
    config.watchers = false;
    Ok(Store::open(config)?)
}

fn run(cli: Cli) -> CliResult<()> {
    let store = open_store(&cli)?;

    match &cli.command {
        Command::Collections => {
            let names = store.collection_names()?;
            print_output(&serde_json::json!(names), &cli.format)?;
        }

        Command::Get { collection, id } => {
            let docs = store.collection(collection)?;
            let doc: serde_json::Value = docs
                .find_by_id(id)?
                .ok_or_else(|| format!("Document '{id}' not found in '{collection}'"))?;
            print_output(&doc, &cli.format)?;
        }

        Command::Find {
            collection,
            filter,
            sort,
            limit,
            offset,
        } => {
            let mut options = FindOptions::new().offset(*offset);
            if let Some(filter) = filter {
                options = options.filter(filter);
            }
            if let Some(sort) = sort {
                options = options.sort(sort);
            }
            if let Some(limit) = limit {
                options = options.limit(*limit);
            }
            let docs: Vec<serde_json::Value> = store.collection(collection)?.find(options)?;
            print_output(&serde_json::Value::Array(docs), &cli.format)?;
        }

        Command::Count { collection, filter } => {
            let docs = store.collection(collection)?;
            let count = match filter {
                Some(filter) => docs.count_where(filter)?,
                None => docs.count()?,
            };
            print_output(&serde_json::json!({ "count": count }), &cli.format)?;
        }

        Command::Put {
            collection,
            key,
            value,
            if_absent,
        } => {
            let docs = store.collection(collection)?;
            let value = parse_value(value);
            let result = if *if_absent {
                docs.put_if_absent(key, &value)?
            } else {
                docs.put(key, &value)?
            };
            let output = match result {
                PutResult::Stored(stored) => serde_json::json!({ "ok": true, "key": key, "value": stored }),
                PutResult::AlreadyExists => serde_json::json!({ "ok": false, "key": key, "exists": true }),
            };
            print_output(&output, &cli.format)?;
        }

        Command::Save {
            collection,
            fields,
            json,
        } => {
            let mut doc = build_document(json.as_deref(), fields)?;
            let id = store.collection(collection)?.save_value(&mut doc)?;
            print_output(&serde_json::json!({ "id": id, "document": doc }), &cli.format)?;
        }

        Command::Delete {
            collection,
            id,
            filter,
            limit,
            dry_run,
        } => {
            let docs = store.collection(collection)?;
            if *dry_run {
                let matches: Vec<serde_json::Value> = match (id, filter) {
                    (Some(id), _) => docs.find_by_id(id)?.into_iter().collect(),
                    (None, Some(filter)) => {
                        let mut options = FindOptions::new().filter(filter);
                        if let Some(limit) = limit {
                            options = options.limit(*limit);
                        }
                        docs.find(options)?
                    }
                    (None, None) => Vec::new(),
                };
                print_output(
                    &serde_json::json!({ "dry_run": true, "would_delete": matches }),
                    &cli.format,
                )?;
            } else {
                let deleted = match (id, filter) {
                    (Some(id), _) => usize::from(docs.delete_by_id(id)?),
                    (None, Some(filter)) => {
                        let mut options = DeleteOptions::new().filter(filter);
                        if let Some(limit) = limit {
                            options = options.limit(*limit);
                        }
                        docs.delete(options)?
                    }
                    (None, None) => 0,
                };
                print_output(&serde_json::json!({ "ok": true, "deleted": deleted }), &cli.format)?;
            }
        }

        Command::Import { collection, pattern } => {
            let docs = store.collection(collection)?;
            let mut imported = Vec::new();
            for entry in glob::glob(pattern)? {
                let path = entry?;
                let mut batch = read_documents(&path)?;
                let ids = docs.save_many_values(&mut batch)?;
                log::info!("imported {} document(s) from {}", ids.len(), path.display());
                imported.push(serde_json::json!({ "file": path.display().to_string(), "saved": ids.len() }));
            }
            print_output(&serde_json::json!({ "ok": true, "files": imported }), &cli.format)?;
        }

        Command::Export { collection, sort } => {
            let mut options = FindOptions::new();
            if let Some(sort) = sort {
                options = options.sort(sort);
            }
            let docs: Vec<serde_json::Value> = store.collection(collection)?.find(options)?;
            print_output(&serde_json::Value::Array(docs), &cli.format)?;
        }
    }

    store.close()?;
    Ok(())
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// JSON when it parses, a plain string otherwise.
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn build_document(json: Option<&str>, fields: &[(String, String)]) -> CliResult<serde_json::Value> {
    let mut map = match json {
        Some(text) => match serde_json::from_str(text)? {
            serde_json::Value::Object(map) => map,
            _ => return Err("--json must be a JSON object".into()),
        },
        None => serde_json::Map::new(),
    };
    for (key, val) in fields {
        map.insert(key.clone(), parse_value(val));
    }
    Ok(serde_json::Value::Object(map))
}

fn read_documents(path: &Path) -> CliResult<Vec<serde_json::Value>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {e}", path.display()))?;
    match serde_json::from_str(&content)? {
        serde_json::Value::Array(docs) => Ok(docs),
        doc @ serde_json::Value::Object(_) => Ok(vec![doc]),
        _ => Err(format!("'{}' holds neither a document nor an array of documents", path.display()).into()),
    }
}
