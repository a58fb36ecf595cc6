use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crmdesk_client::{ClientConfig, QueryClient, ServiceRegistry};
use crmdesk_query::{Direction, FilterMode, RequestDescriptor, ResponseShape};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

mod formatter;

use formatter::{render, ColorMode, OutputFormat};

/// Query the CRM ticket workspace from the command line
#[derive(Parser)]
#[command(name = "crmdesk")]
#[command(about = "Cached OData queries against the CRM ticket workspace", long_about = None)]
struct Cli {
    /// Service root of the OData API
    #[arg(long, env = "CRMDESK_BASE_URL", global = true)]
    base_url: Option<Url>,

    /// Bearer token
    #[arg(long, env = "CRMDESK_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Serve requests from fixture files in this directory
    #[arg(long, env = "CRMDESK_FIXTURES", global = true)]
    fixtures: Option<PathBuf>,

    /// Output format (json, compact, pretty)
    #[arg(long, default_value = "pretty", global = true)]
    format: String,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    color: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read an entity set, a record, a child collection or a raw property
    Get(GetArgs),

    /// Create a record
    Insert {
        /// Entity set, e.g. incidents
        endpoint: String,

        /// JSON body
        #[arg(long)]
        data: String,
    },

    /// Change fields of an existing record
    Update {
        /// Entity set, e.g. incidents
        endpoint: String,

        /// Record id
        id: String,

        /// JSON body
        #[arg(long)]
        data: String,
    },
}

#[derive(clap::Args, Debug, Default)]
struct GetArgs {
    /// Entity set, e.g. incidents
    endpoint: String,

    /// Address a single record
    #[arg(long)]
    id: Option<String>,

    /// Child collection of the record given by --id
    #[arg(long, requires = "id")]
    child: Option<String>,

    /// Raw value of one property of the record given by --id
    #[arg(long, requires = "id", conflicts_with = "child")]
    value: Option<String>,

    /// Fields to select
    #[arg(long, value_delimiter = ',')]
    select: Vec<String>,

    /// Filter clause, combined with "and"
    #[arg(long)]
    filter: Vec<String>,

    /// Filter clause, combined with "or"
    #[arg(long)]
    or_filter: Vec<String>,

    /// Replace all filter clauses with this one
    #[arg(long)]
    search: Option<String>,

    /// Sort clause, e.g. "modifiedon desc"
    #[arg(long)]
    order_by: Vec<String>,

    /// Maximum number of records
    #[arg(long)]
    top: Option<u32>,

    /// Expansion as relation:field,field
    #[arg(long)]
    expand: Vec<String>,

    /// Extra dependency tag
    #[arg(long)]
    depends_on: Vec<String>,

    /// Refresh interval in seconds while watching
    #[arg(long)]
    refresh: Option<u64>,

    /// Keep printing new values until interrupted
    #[arg(long, conflicts_with = "all_pages")]
    watch: bool,

    /// Follow @odata.nextLink until the last page
    #[arg(long)]
    all_pages: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::from_str(&cli.format);
    let colorize = ColorMode::from_str(&cli.color).should_colorize();

    let mut config = ClientConfig::from_env().context("Failed to read client configuration")?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(token) = cli.token {
        config = config.with_token(token);
    }
    if let Some(fixtures) = cli.fixtures {
        config = config.with_fixtures(fixtures);
    }
    debug!("using service root {}", config.base_url);

    let registry = ServiceRegistry::bootstrap(config)?;
    let client = registry.query_client()?;

    match cli.command {
        Commands::Get(args) => {
            let descriptor = build_descriptor(&args)?;
            if args.watch {
                watch(&client, &descriptor, format, colorize).await?;
            } else if args.all_pages {
                let items = fetch_all_pages(&client, &descriptor).await?;
                println!("{}", render(&Value::Array(items), format, colorize));
            } else {
                let value = client.fetch_once(&descriptor).await?;
                println!("{}", render(&value, format, colorize));
            }
        }
        Commands::Insert { endpoint, data } => {
            let body = parse_body(&data)?;
            let created = client.insert(&endpoint, body).await?;
            print_mutation(created, format, colorize);
        }
        Commands::Update { endpoint, id, data } => {
            let body = parse_body(&data)?;
            let updated = client.update(&endpoint, &id, body).await?;
            print_mutation(updated, format, colorize);
        }
    }

    Ok(())
}

async fn watch(
    client: &QueryClient,
    descriptor: &RequestDescriptor,
    format: OutputFormat,
    colorize: bool,
) -> Result<()> {
    let value = client.get(descriptor, None)?;
    let mut updates = value.subscribe();
    info!("watching {}, press ctrl-c to stop", descriptor.endpoint());

    loop {
        tokio::select! {
            next = updates.next() => match next {
                Some(current) => println!("{}", render(&current, format, colorize)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn fetch_all_pages(client: &QueryClient, descriptor: &RequestDescriptor) -> Result<Vec<Value>> {
    if descriptor.shape() != ResponseShape::List {
        bail!("--all-pages only applies to list reads");
    }

    let mut page = client.fetch_page(descriptor).await?;
    let mut items = std::mem::take(&mut page.items);
    while let Some(link) = page.next_link.take() {
        debug!("following {}", link);
        page = client.next_page(&link).await?;
        items.append(&mut page.items);
    }
    Ok(items)
}

fn print_mutation(result: Option<Value>, format: OutputFormat, colorize: bool) {
    match result {
        Some(record) => println!("{}", render(&record, format, colorize)),
        None => eprintln!("ok"),
    }
}

fn parse_body(data: &str) -> Result<Value> {
    let body: Value = serde_json::from_str(data).context("--data is not valid JSON")?;
    if !body.is_object() {
        bail!("--data must be a JSON object");
    }
    Ok(body)
}

fn build_descriptor(args: &GetArgs) -> Result<RequestDescriptor> {
    let mut descriptor = RequestDescriptor::new(&args.endpoint);

    if let Some(id) = &args.id {
        descriptor = descriptor.with_id(id);
    }
    match (&args.id, &args.child, &args.value) {
        (None, Some(_), _) => bail!("--child needs --id"),
        (None, _, Some(_)) => bail!("--value needs --id"),
        (Some(_), Some(child), _) => descriptor = descriptor.with_child(child),
        (Some(_), None, Some(property)) => descriptor = descriptor.with_property_value(property),
        _ => {}
    }

    descriptor = descriptor.select(args.select.iter().map(|f| f.trim()).filter(|f| !f.is_empty()));
    for clause in &args.filter {
        descriptor = descriptor.filter(FilterMode::And, clause);
    }
    for clause in &args.or_filter {
        descriptor = descriptor.filter(FilterMode::Or, clause);
    }
    if let Some(search) = &args.search {
        descriptor = descriptor.filter(FilterMode::Replace, search);
    }
    for clause in &args.order_by {
        descriptor = match parse_order_by(clause) {
            Some((field, direction)) => descriptor.order_by(field, direction),
            None => descriptor.order_by_raw(clause),
        };
    }
    if let Some(top) = args.top {
        descriptor = descriptor.top(top);
    }
    for expansion in &args.expand {
        let (relation, fields) = parse_expand(expansion)?;
        descriptor = descriptor.expand(relation, fields);
    }
    for tag in &args.depends_on {
        descriptor = descriptor.depends_on(tag.as_str());
    }
    if let Some(secs) = args.refresh {
        descriptor = descriptor.refresh_every(Duration::from_secs(secs));
    }

    Ok(descriptor)
}

/// `field` or `field asc|desc`; anything else is passed through untouched.
fn parse_order_by(clause: &str) -> Option<(&str, Direction)> {
    let mut parts = clause.split_whitespace();
    let field = parts.next()?;
    let direction = match parts.next() {
        None => Direction::Asc,
        Some(d) if d.eq_ignore_ascii_case("asc") => Direction::Asc,
        Some(d) if d.eq_ignore_ascii_case("desc") => Direction::Desc,
        Some(_) => return None,
    };
    parts.next().is_none().then_some((field, direction))
}

/// `relation:field,field`
fn parse_expand(expansion: &str) -> Result<(&str, Vec<&str>)> {
    let (relation, fields) = expansion
        .split_once(':')
        .with_context(|| format!("expected relation:field,... but got \"{}\"", expansion))?;
    let relation = relation.trim();
    if relation.is_empty() {
        bail!("missing relation name in \"{}\"", expansion);
    }
    let fields = fields
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();
    Ok((relation, fields))
}
