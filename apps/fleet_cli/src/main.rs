use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings_with, SETTINGS_FILE},
    mapper::blank_defaults,
    DocumentSnapshot, FleetClient, SearchOutcome,
};
use serde_json::{json, Map, Value};
use shared::domain::{DocName, DocumentType, EntityType, Fields};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Fleet document lifecycle client")]
struct Cli {
    #[arg(long, default_value = SETTINGS_FILE)]
    config: PathBuf,
    /// Overrides `server_url` from the settings file and environment.
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a document as the editor would load it.
    Show { doc_type: DocumentType, name: String },
    /// Create and save a new draft.
    New {
        doc_type: DocumentType,
        /// `field=value`; values that parse as JSON are sent as JSON.
        #[arg(long = "set")]
        fields: Vec<String>,
        /// `table:field=value,field=value`
        #[arg(long = "row")]
        rows: Vec<String>,
    },
    Submit { doc_type: DocumentType, name: String },
    Cancel { doc_type: DocumentType, name: String },
    /// Amend a cancelled document into a new draft.
    Amend { doc_type: DocumentType, name: String },
    /// List options for a lookup, constrained by its parent's value.
    Lookup {
        entity: EntityType,
        #[arg(long)]
        parent: Option<String>,
    },
    Search { entity: EntityType, text: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings_with(&cli.config, |key| std::env::var(key).ok());
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    let client = FleetClient::from_settings(settings)?;

    match cli.command {
        Command::Show { doc_type, name } => {
            let controller = client.controller(doc_type);
            controller
                .load_existing(&DocName::from(name))
                .await
                .context("load failed")?;
            print_snapshot(&controller.state().await)?;
        }
        Command::New {
            doc_type,
            fields,
            rows,
        } => {
            let controller = client.controller(doc_type);
            let today = chrono::Local::now().date_naive();
            let defaults =
                blank_defaults(doc_type, today, client.settings().default_company.as_deref());
            controller.load_blank(defaults).await?;
            for raw in &fields {
                let (field, value) = parse_assignment(raw)?;
                controller.set_field(&field, value).await?;
            }
            for raw in &rows {
                let (table, row) = parse_row(raw)?;
                controller.add_child(&table, row).await?;
            }
            controller.save().await.context("save failed")?;
            let state = controller.state().await;
            info!(doctype = doc_type.doctype(), name = ?state.name, "draft saved");
            print_snapshot(&state)?;
        }
        Command::Submit { doc_type, name } => {
            let controller = client.controller(doc_type);
            controller.load_existing(&DocName::from(name)).await?;
            controller.submit().await.context("submit failed")?;
            print_snapshot(&controller.state().await)?;
        }
        Command::Cancel { doc_type, name } => {
            let controller = client.controller(doc_type);
            controller.load_existing(&DocName::from(name)).await?;
            controller.cancel().await.context("cancel failed")?;
            print_snapshot(&controller.state().await)?;
        }
        Command::Amend { doc_type, name } => {
            let controller = client.controller(doc_type);
            controller.load_existing(&DocName::from(name)).await?;
            controller.amend().await.context("amend failed")?;
            print_snapshot(&controller.state().await)?;
        }
        Command::Lookup { entity, parent } => {
            let page = client
                .dependent_lookups()
                .resolve(entity, parent.as_deref())
                .await?;
            for option in &page {
                println!("{}\t{}", option.name, option.display);
            }
        }
        Command::Search { entity, text } => {
            let search = client.search(entity);
            match search.search(&text).await {
                SearchOutcome::Published => {
                    for option in &search.latest().options {
                        println!("{}\t{}", option.name, option.display);
                    }
                }
                SearchOutcome::Superseded => {}
                SearchOutcome::Failed(err) => return Err(err).context("search failed"),
            }
        }
    }

    Ok(())
}

fn print_snapshot(state: &DocumentSnapshot) -> Result<()> {
    let children: Map<String, Value> = state
        .children
        .iter()
        .map(|(table, rows)| {
            let rows = rows.iter().map(|row| Value::Object(row.to_wire())).collect();
            (table.clone(), Value::Array(rows))
        })
        .collect();
    let view = json!({
        "doctype": state.doc_type.doctype(),
        "name": state.name,
        "docstatus": state.doc_status.code(),
        "amended_from": state.amended_from,
        "fields": state.fields,
        "children": children,
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected field=value, got `{raw}`"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(anyhow!("empty field name in `{raw}`"));
    }
    Ok((field.to_string(), parse_value(value.trim())))
}

fn parse_row(raw: &str) -> Result<(String, Fields)> {
    let (table, assignments) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("expected table:field=value,..., got `{raw}`"))?;
    let mut row = Fields::new();
    for assignment in assignments.split(',').filter(|part| !part.trim().is_empty()) {
        let (field, value) = parse_assignment(assignment)?;
        row.insert(field, value);
    }
    Ok((table.trim().to_string(), row))
}
