//! Evaluation CLI for duplicate-person detection.
//!
//! Usage:
//!     dupcheck distance "Juan" "Jhuan"
//!     dupcheck score --candidates legajos.json --nombre Juan --apellido Perez
//!     dupcheck search --nombre Juan --apellido Perez --dni 30111222
//!     dupcheck health

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use runna_backend_http::{HttpBackend, HttpConfig, InMemoryBackend, MatchingProvider};
use runna_explain::{classify, color_for, explain_match, message_for, summarize};
use runna_features::{edit_distance, similarity};
use runna_model::{parse_dni, CandidateRecord, Genero, MatchResult, PartialIdentity};
use runna_search::{DuplicateSearch, SearchConfig, SearchOutcome, SearchStatus};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "dupcheck")]
#[command(about = "Evaluate duplicate-person detection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RUNNA API base URL (defaults to RUNNA_API_URL)
    #[arg(long)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show edit distance and similarity between two names
    Distance { a: String, b: String },

    /// Rank candidates from a local JSON file
    Score {
        /// JSON array of candidate records
        #[arg(short, long)]
        candidates: String,

        #[command(flatten)]
        identity: IdentityArgs,

        /// Hide results below this score
        #[arg(short, long, default_value = "0.0")]
        threshold: f64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Search the RUNNA API through the orchestrator
    Search {
        #[command(flatten)]
        identity: IdentityArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check backend health
    Health,
}

#[derive(Args)]
struct IdentityArgs {
    #[arg(long, default_value = "")]
    nombre: String,

    #[arg(long, default_value = "")]
    apellido: String,

    /// DNI, digits with optional dots
    #[arg(long)]
    dni: Option<String>,

    /// Birthdate (YYYY-MM-DD)
    #[arg(long)]
    fecha: Option<NaiveDate>,

    /// MASCULINO, FEMENINO or OTRO
    #[arg(long)]
    genero: Option<String>,

    /// Self-identified name
    #[arg(long)]
    autopercibido: Option<String>,
}

impl IdentityArgs {
    fn into_identity(self) -> PartialIdentity {
        PartialIdentity {
            nombre: self.nombre,
            apellido: self.apellido,
            dni: self.dni.as_deref().and_then(parse_dni),
            fecha_nacimiento: self.fecha,
            genero: self.genero.as_deref().map(Genero::from),
            nombre_autopercibido: self.autopercibido,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("runna=debug".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = HttpConfig::from_env();
    if let Some(url) = cli.api_url {
        config.base_url = url;
    }

    match cli.command {
        Commands::Distance { a, b } => run_distance(&a, &b),
        Commands::Score {
            candidates,
            identity,
            threshold,
            format,
        } => run_score(&candidates, identity.into_identity(), threshold, &format).await?,
        Commands::Search { identity, format } => {
            let backend = HttpBackend::new(config)?;
            run_search(backend, identity.into_identity(), &format).await?;
        }
        Commands::Health => {
            let backend = HttpBackend::new(config)?;
            run_health(&backend).await?;
        }
    }

    Ok(())
}

fn run_distance(a: &str, b: &str) {
    println!("Distance:   {}", edit_distance(a, b));
    println!("Similarity: {:.1}%", similarity(a, b));
}

async fn run_score(
    candidates_file: &str,
    query: PartialIdentity,
    threshold: f64,
    format: &str,
) -> Result<()> {
    let raw = std::fs::read_to_string(candidates_file)
        .with_context(|| format!("reading {}", candidates_file))?;
    let candidates: Vec<CandidateRecord> =
        serde_json::from_str(&raw).context("parsing candidate records")?;

    tracing::debug!(file = candidates_file, count = candidates.len(), "Loaded candidate records");

    let backend = InMemoryBackend::new(candidates);
    println!("Loaded {} candidates", backend.len());

    let mut results = backend
        .find_candidates(&query, CancellationToken::new())
        .await?;
    results.retain(|r| r.score >= threshold);

    print_results(&results, format)
}

async fn run_search(backend: HttpBackend, query: PartialIdentity, format: &str) -> Result<()> {
    let search = DuplicateSearch::builder(backend)
        .config(SearchConfig::from_env())
        .build();
    let mut updates = search.subscribe();

    match search.request_search(query) {
        SearchOutcome::Skipped(reason) => bail!("search skipped: {:?}", reason),
        SearchOutcome::Scheduled | SearchOutcome::Started => {}
    }

    let state = loop {
        updates.changed().await?;
        let state = updates.borrow_and_update().clone();
        match state.status {
            SearchStatus::Succeeded | SearchStatus::Failed | SearchStatus::Cancelled => break state,
            _ => continue,
        }
    };

    if let Some(error) = state.error {
        bail!("{}", error);
    }

    print_results(&state.results, format)
}

fn print_results(results: &[MatchResult], format: &str) -> Result<()> {
    if format == "json" {
        let explained: Vec<_> = results.iter().map(explain_match).collect();
        println!("{}", serde_json::to_string_pretty(&explained)?);
        return Ok(());
    }

    println!("---");
    for (i, result) in results.iter().enumerate() {
        let tier = classify(result.score);
        let explanation = explain_match(result);

        let legajo = result
            .candidate
            .as_ref()
            .and_then(|c| c.numero_legajo.clone())
            .unwrap_or_else(|| format!("#{}", result.candidate_id));

        println!("\n{}. Legajo {} [{}]", i + 1, legajo, color_for(tier));
        println!("   Score: {:.2}", result.score);
        println!("   {}", explanation.summary);
        println!("   {}", explanation.detail);
        println!("   {}", message_for(tier).recommendation);
    }

    println!("\n---");
    println!("{}", summarize(results));

    Ok(())
}

async fn run_health<P: MatchingProvider>(backend: &P) -> Result<()> {
    print!("Checking {} backend... ", backend.name());

    match backend.health_check().await {
        Ok(()) => {
            println!("OK");
            Ok(())
        }
        Err(e) => {
            println!("FAILED: {}", e);
            std::process::exit(1);
        }
    }
}
