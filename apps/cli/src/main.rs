//! Command line interface for the beleg platform.
//!
//! Offline tooling around the verification core: inspect rate sheets, run
//! extraction over OCR text dumps, exercise the normalizer, and verify an
//! extracted bill against a catalog without going through the server.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use beleg::pipeline::{extract_bill, PageText};
use beleg_catalog::text::{medical_core, normalize_text};
use beleg_catalog::{CatalogLoader, CatalogService, EmbeddingCache, HttpEmbeddingBackend};
use beleg_verifier::{
    BillInput, BillVerifier, CategoryInput, InputItem, MatchWeights, MatchingThresholds,
    SemanticMatcher,
};

#[derive(Parser)]
#[command(
    name = "beleg-cli",
    about = "Command line interface for the beleg bill verification platform",
    version,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List hospitals available in a tie-up catalog directory.
    Hospitals {
        /// Directory of per-hospital rate-sheet JSON files.
        #[arg(short, long, default_value = "./tieups")]
        tieup_dir: PathBuf,
    },

    /// Run structured extraction over an OCR text dump.
    Extract {
        /// Path to a text file (or "-" for stdin); form-feed separates pages.
        input: PathBuf,
        /// Pretty-print JSON output.
        #[arg(long, action = ArgAction::SetTrue)]
        pretty: bool,
    },

    /// Show the normalized form (and medical core) of a bill item name.
    Normalize {
        /// Raw item text, e.g. "1. CONSULTATION | Dr. A. Kumar".
        text: String,
    },

    /// Extract and verify an OCR text dump against a hospital's rate sheet.
    Verify {
        /// Path to a text file (or "-" for stdin); form-feed separates pages.
        input: PathBuf,
        /// Hospital name as asserted by the employee.
        #[arg(long)]
        hospital: String,
        /// Directory of per-hospital rate-sheet JSON files.
        #[arg(short, long, default_value = "./tieups")]
        tieup_dir: PathBuf,
        /// Embedding endpoint (OpenAI-compatible).
        #[arg(long, default_value = "http://localhost:8090/v1")]
        embedding_api_base: String,
        /// Embedding model id.
        #[arg(long, default_value = "text-embedding-3-small")]
        embedding_model: String,
        /// Embedding disk cache directory.
        #[arg(long, default_value = "./data/embedding_cache")]
        cache_dir: PathBuf,
        /// Emit the full JSON result instead of the rendered text.
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
}

fn read_pages(input: &PathBuf) -> Result<Vec<PageText>> {
    let raw = if input.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("reading stdin")?;
        buffer
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("reading {}", input.display()))?
    };

    Ok(raw
        .split('\u{c}')
        .enumerate()
        .map(|(index, text)| PageText {
            page: index as u32 + 1,
            text: text.to_string(),
            lines: Vec::new(),
        })
        .collect())
}

async fn open_catalog(
    tieup_dir: &PathBuf,
    api_base: &str,
    model: &str,
    cache_dir: &PathBuf,
) -> Result<CatalogService> {
    let backend = HttpEmbeddingBackend::new(
        api_base,
        std::env::var("BELEG_EMBEDDING_API_KEY").ok(),
        model,
        Duration::from_secs(30),
        20,
        3,
    )?;
    let loader = CatalogLoader::new(Arc::new(backend), EmbeddingCache::new(cache_dir));
    Ok(CatalogService::open(loader, tieup_dir).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Hospitals { tieup_dir } => {
            let sheets = beleg_catalog::rate_sheet::load_rate_sheets(&tieup_dir)?;
            for sheet in sheets {
                println!(
                    "{}  ({} categories, {} items)",
                    sheet.hospital_name,
                    sheet.categories.len(),
                    sheet.item_count()
                );
            }
        }

        Commands::Extract { input, pretty } => {
            let pages = read_pages(&input)?;
            let bill = extract_bill(&pages)?;
            let output = if pretty {
                serde_json::to_string_pretty(&bill)?
            } else {
                serde_json::to_string(&bill)?
            };
            println!("{output}");
        }

        Commands::Normalize { text } => {
            let normalized = normalize_text(&text);
            println!("normalized: {normalized}");
            if let Some(core) = medical_core(&normalized) {
                println!("medical core: {core}");
            }
        }

        Commands::Verify {
            input,
            hospital,
            tieup_dir,
            embedding_api_base,
            embedding_model,
            cache_dir,
            json,
        } => {
            let pages = read_pages(&input)?;
            let bill = extract_bill(&pages)?;
            let bill_input = BillInput {
                hospital_name: hospital,
                categories: bill
                    .categories
                    .iter()
                    .map(|category| CategoryInput {
                        category_name: category.category_name.clone(),
                        items: category
                            .items
                            .iter()
                            .map(|item| InputItem {
                                item_name: item.item_name.clone(),
                                amount: item.amount,
                                quantity: item.quantity,
                                rate: item.rate,
                                tieup_rate: None,
                                page: item.page,
                            })
                            .collect(),
                    })
                    .collect(),
            };

            let catalog = open_catalog(
                &tieup_dir,
                &embedding_api_base,
                &embedding_model,
                &cache_dir,
            )
            .await?
            .snapshot();

            let backend = HttpEmbeddingBackend::new(
                &embedding_api_base,
                std::env::var("BELEG_EMBEDDING_API_KEY").ok(),
                &embedding_model,
                Duration::from_secs(30),
                20,
                3,
            )?;
            let verifier = BillVerifier::new(
                SemanticMatcher::new(Arc::new(backend), MatchWeights::default(), 3),
                MatchingThresholds::default(),
            );
            let result = verifier.verify_bill(&bill_input, &catalog).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", beleg::services::render_final_text(&result));
            }
        }
    }
    Ok(())
}
