use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use invoice_insight::analysis::{AnalysisResponse, Analyzer, EXAMPLE_QUESTIONS};
use invoice_insight::chart::ChartData;
use invoice_insight::invoice_db::SqliteExecutor;
use invoice_insight::invoice_model::{demo_invoices, InvoiceStore, NewCustomer};
use invoice_insight::llm::OpenRouterModel;
use invoice_insight::logging::{backend_error, init_logging};
use invoice_insight::query_schema::INVOICE_SCHEMA;
use invoice_insight::settings::{load_settings, resolve_db_path, Settings};

#[derive(Parser)]
#[command(name = "invoice-insight", version)]
#[command(about = "Ask questions about invoices, get pie and waterfall chart data back")]
struct Cli {
    /// Settings file (defaults to ./invoice-insight.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the invoice tables
    InitDb,

    /// Insert a small demo dataset
    Seed,

    /// Ask a single question (non-interactive)
    Ask {
        question: String,
        #[arg(long)]
        json: bool,
    },

    /// Interactive question loop
    Repl,

    /// Print the schema the model is given
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        backend_error(format!("{:#}", err));
        return Err(err);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(cli.config.as_deref()).context("failed to load settings")?;
    let db_path = resolve_db_path(&settings.database.path);

    match cli.command {
        Command::InitDb => {
            InvoiceStore::open(&db_path)?;
            println!("Schema ready → {}", db_path.display());
        }

        Command::Seed => {
            let mut store = InvoiceStore::open(&db_path)?;
            let customers = ["Acme Corp", "Globex Ltd", "Initech"]
                .iter()
                .map(|name| store.insert_customer(&NewCustomer { name: name.to_string(), ..NewCustomer::default() }))
                .collect::<Result<Vec<_>, _>>()?;
            let invoices = demo_invoices(&customers);
            for invoice in &invoices {
                store
                    .insert_invoice(invoice)
                    .with_context(|| format!("inserting {}", invoice.invoice_number))?;
            }
            println!("Seeded {} customers, {} invoices → {}", customers.len(), invoices.len(), db_path.display());
        }

        Command::Ask { question, json } => {
            let analyzer = build_analyzer(&settings, &db_path)?;
            let response = analyzer.respond(&question).await;
            print_response(&response, json)?;
        }

        Command::Repl => {
            let analyzer = build_analyzer(&settings, &db_path)?;
            repl(&analyzer).await?;
        }

        Command::Schema => {
            println!("{}", INVOICE_SCHEMA.trim());
        }
    }
    Ok(())
}

fn build_analyzer(settings: &Settings, db_path: &std::path::Path) -> Result<Analyzer> {
    if !db_path.exists() {
        anyhow::bail!("No database at {}. Run `invoice-insight init-db` first", db_path.display());
    }
    let model = OpenRouterModel::from_settings(&settings.llm)?;
    let executor = SqliteExecutor::open(db_path, &settings.database)?;
    Ok(Analyzer::with_settings(Arc::new(model), Arc::new(executor), &settings.pipeline))
}

async fn repl(analyzer: &Analyzer) -> Result<()> {
    println!();
    println!("Invoice analytics. Type 'exit' or 'quit' to leave.");
    println!("Examples:");
    for q in EXAMPLE_QUESTIONS {
        println!("  • {}", q);
    }
    println!();

    let stdin = io::stdin();
    loop {
        print!("❯ ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        let response = analyzer.respond(input).await;
        print_response(&response, false)?;
        println!();
    }
    Ok(())
}

fn print_response(response: &AnalysisResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }
    let Some(chart) = response.chart() else {
        println!("(no result)");
        return Ok(());
    };

    if !response.success {
        println!("Error: {}", chart.interpretation);
        return Ok(());
    }
    println!("{}", chart.interpretation);
    println!();
    match &chart.statistics {
        ChartData::PieChart(pie) => {
            let total: f64 = pie.values.iter().sum();
            for (label, value) in pie.labels.iter().zip(&pie.values) {
                let share = if total > 0.0 { value / total * 100.0 } else { 0.0 };
                println!("  {:<30} {:>12.2}  {:>5.1}%", label, value, share);
            }
        }
        ChartData::WaterfallChart(wf) => {
            for (category, value) in wf.categories.iter().zip(&wf.values) {
                println!("  {:<30} {:>+12.2}", category, value);
            }
        }
    }
    Ok(())
}
