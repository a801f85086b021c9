//! docbridge CLI Client
//!
//! Command-line interface for reading and writing documents through the
//! docbridge access layer.

use std::time::Duration;

use clap::{Parser, Subcommand};
use docbridge::{
    BridgeError, CancelToken, Client, Config, Direction, Document, Fields, QueryFilter, Result,
    Value,
};
use tracing_subscriber::{fmt, EnvFilter};

/// docbridge CLI
#[derive(Parser, Debug)]
#[command(name = "docbridge-cli")]
#[command(about = "CLI for docbridge document stores")]
struct Args {
    /// Server address (default: $DOCBRIDGE_ENDPOINT or 127.0.0.1:7450)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Project id (default: $DOCBRIDGE_PROJECT_ID)
    #[arg(short, long)]
    project: Option<String>,

    /// Credentials file (default: $DOCBRIDGE_CREDENTIALS_PATH)
    #[arg(short, long)]
    credentials: Option<String>,

    /// Max attempts per read
    #[arg(long, default_value = "3")]
    attempts: u32,

    /// Give up after this many milliseconds (0 = no deadline)
    #[arg(long, default_value = "0")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a document
    Get {
        collection: String,
        id: String,
    },

    /// Query a collection
    Query {
        collection: String,

        /// Filter such as "domain==apis"; repeat to AND several
        #[arg(short, long = "where")]
        filters: Vec<String>,

        /// Max documents returned
        #[arg(short, long)]
        limit: Option<usize>,

        /// Field to order by
        #[arg(short, long)]
        order_by: Option<String>,

        /// Order descending
        #[arg(long)]
        desc: bool,
    },

    /// Create or overwrite a document from field=value pairs
    Set {
        collection: String,
        id: String,
        fields: Vec<String>,
    },

    /// Merge field=value pairs into an existing document
    Update {
        collection: String,
        id: String,
        fields: Vec<String>,
    },

    /// Delete a document
    Delete {
        collection: String,
        id: String,
    },

    /// Ping the server
    Ping,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(project) = args.project {
        config.project_id = project;
    }
    if let Some(credentials) = args.credentials {
        config.credentials_path = credentials.into();
    }
    config.max_retry_attempts = args.attempts;
    config.read_workers = 1;

    let client = Client::connect(config)?;
    let client = if args.timeout_ms > 0 {
        client.with_cancellation(CancelToken::with_timeout(Duration::from_millis(args.timeout_ms)))
    } else {
        client
    };

    match args.command {
        Commands::Get { collection, id } => match client.get_document(&collection, &id)? {
            Some(doc) => print_document(&doc),
            None => println!("(not found)"),
        },
        Commands::Query {
            collection,
            filters,
            limit,
            order_by,
            desc,
        } => {
            let mut builder = client.query_builder(collection);
            for expr in &filters {
                builder = builder.with_filter(QueryFilter::parse(expr)?);
            }
            if let Some(limit) = limit {
                builder = builder.limit(limit);
            }
            if let Some(field) = order_by {
                let direction = if desc {
                    Direction::Descending
                } else {
                    Direction::Ascending
                };
                builder = builder.order_by(field, direction);
            }

            let docs = client.query(&builder.build()?)?;
            let count = docs.len();
            for doc in docs {
                print_document(&doc);
            }
            println!("({} documents)", count);
        }
        Commands::Set {
            collection,
            id,
            fields,
        } => {
            let fields = parse_fields(&fields)?;
            client.batch(|batch| batch.set(&collection, &id, fields).map(|_| ()))?;
            println!("OK");
        }
        Commands::Update {
            collection,
            id,
            fields,
        } => {
            let fields = parse_fields(&fields)?;
            client.batch(|batch| batch.update(&collection, &id, fields).map(|_| ()))?;
            println!("OK");
        }
        Commands::Delete { collection, id } => {
            client.batch(|batch| batch.delete(&collection, &id).map(|_| ()))?;
            println!("OK");
        }
        Commands::Ping => {
            client.ping()?;
            println!("PONG");
        }
    }

    Ok(())
}

/// Parse `field=value` pairs
fn parse_fields(pairs: &[String]) -> Result<Fields> {
    pairs
        .iter()
        .map(|pair| {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                BridgeError::Configuration(format!("expected field=value, got '{}'", pair))
            })?;
            Ok((name.trim().to_string(), Value::parse_literal(value)))
        })
        .collect()
}

fn print_document(doc: &Document) {
    println!("{} {}", doc.key(), Value::Map(doc.fields().clone()));
}
