use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use pdf_table_rules::{
    ExtractOptions, ExtractionMethod, Extractor, HeaderMode, PageSelection, Pipeline, RuleSet,
    RulesRegistry, RunMetadata, Table, TransformFailurePolicy, summarize, table_to_csv_string,
    table_to_records, write_tables_csv,
};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "pdf-tables",
    version,
    about = "Extract tables from PDFs and shape them with per-document-type rules"
)]
struct Cli {
    /// Log progress and list every warning.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract tables from one PDF.
    Extract(ExtractArgs),
    /// Extract tables from every PDF in a directory.
    Batch(BatchArgs),
    /// Print the document type whose filename patterns match a PDF.
    Detect(DetectArgs),
    /// List the document types in the rules directory.
    Types(RulesDirArgs),
}

#[derive(Debug, Args)]
struct RulesDirArgs {
    /// Directory holding <type>.yml rule files.
    #[arg(long = "rules", env = "PDF_PARSE_RULES_PATH", default_value = "rules")]
    rules_dir: PathBuf,
}

#[derive(Debug, Args)]
struct RuleArgs {
    #[command(flatten)]
    dir: RulesDirArgs,

    /// Apply the rules for this document type.
    #[arg(long = "pdf-type", conflicts_with = "detect_type")]
    pdf_type: Option<String>,

    /// Pick the document type from the PDF's file name.
    #[arg(long)]
    detect_type: bool,

    /// Load rules from this file instead of the rules directory.
    #[arg(long = "rules-file")]
    rules_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Extraction method: auto, layout or stream.
    #[arg(long, default_value = "auto")]
    method: String,

    /// Page selection like 1-3,5.
    #[arg(long)]
    pages: Option<String>,

    /// Output delimiter character.
    #[arg(long, default_value = ",")]
    delimiter: char,

    /// Force header interpretation on the first row of each table.
    #[arg(long, conflicts_with = "no_header")]
    has_header: bool,

    /// Disable header interpretation; keep the first row as data.
    #[arg(long, conflicts_with = "has_header")]
    no_header: bool,

    /// Minimum cells required per candidate table row.
    #[arg(long, default_value_t = 2)]
    min_cols: usize,

    /// Fail the run when any table's transforms fail instead of skipping it.
    #[arg(long)]
    strict: bool,

    #[command(flatten)]
    rules: RuleArgs,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    /// Input PDF path.
    #[arg(short, long)]
    input: PathBuf,

    /// Write table_N.csv files into this directory.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Write tables and run metadata as JSON to this file.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Print a JSON summary of the extracted tables.
    #[arg(long)]
    summary: bool,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct BatchArgs {
    /// Directory of input PDFs.
    #[arg(long)]
    input_dir: PathBuf,

    /// Each PDF's tables go to <output-dir>/<stem>_tables/.
    #[arg(long, default_value = "extracted_tables")]
    output_dir: PathBuf,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct DetectArgs {
    /// Input PDF path.
    #[arg(short, long)]
    input: PathBuf,

    #[command(flatten)]
    dir: RulesDirArgs,
}

/// Everything a pipeline run needs, parsed from flags once.
struct RunConfig {
    method: ExtractionMethod,
    pages: Option<PageSelection>,
    delimiter: u8,
    options: ExtractOptions,
    policy: TransformFailurePolicy,
}

fn parse_run_config(args: &RunArgs) -> Result<RunConfig> {
    let method = ExtractionMethod::from_str(&args.method)
        .map_err(|error| anyhow!(error))
        .context("failed to parse --method")?;

    let pages = args
        .pages
        .as_deref()
        .map(PageSelection::from_str)
        .transpose()
        .map_err(|error| anyhow!("invalid page selection: {error}"))
        .context("failed to parse --pages")?;

    if !args.delimiter.is_ascii() {
        anyhow::bail!("delimiter must be a single ASCII character");
    }

    if args.min_cols < 2 {
        anyhow::bail!("--min-cols must be at least 2");
    }

    let header_mode = if args.has_header {
        HeaderMode::HasHeader
    } else if args.no_header {
        HeaderMode::NoHeader
    } else {
        HeaderMode::AutoDetect
    };

    Ok(RunConfig {
        method,
        pages,
        delimiter: args.delimiter as u8,
        options: ExtractOptions {
            header_mode,
            min_cols: args.min_cols,
        },
        policy: if args.strict {
            TransformFailurePolicy::Abort
        } else {
            TransformFailurePolicy::Skip
        },
    })
}

fn resolve_rules(args: &RuleArgs, document: &Path) -> Result<Option<RuleSet>> {
    let registry = RulesRegistry::new(&args.dir.rules_dir);

    if let Some(path) = &args.rules_file {
        let name = args.pdf_type.as_deref().unwrap_or_default();
        return registry
            .load_type(name, Some(path))
            .map(Some)
            .with_context(|| format!("failed to load rules from '{}'", path.display()));
    }

    let name = match (&args.pdf_type, args.detect_type) {
        (Some(name), _) => name.clone(),
        (None, true) => match registry.detect_type(document) {
            Some(name) => {
                info!(document = %document.display(), rule = %name, "detected document type");
                name
            }
            None => {
                warn!(document = %document.display(), "no document type matched; using raw tables");
                return Ok(None);
            }
        },
        (None, false) => return Ok(None),
    };

    registry
        .load_type(&name, None)
        .map(Some)
        .with_context(|| format!("failed to load rules for type '{name}'"))
}

fn run_document(
    document: &Path,
    config: &RunConfig,
    rules: Option<&RuleSet>,
) -> Result<(Vec<Table>, RunMetadata)> {
    let extractor = Extractor::new(&config.options);
    Pipeline::new(&extractor)
        .with_policy(config.policy)
        .extract_and_process(document, config.method, config.pages.as_ref(), rules)
        .with_context(|| format!("failed to extract tables from '{}'", document.display()))
}

fn log_report(meta: &RunMetadata, verbose: bool) {
    let mut line = format!("raw={} selected={}", meta.raw, meta.selected);
    if let (Some(processed), Some(deduplicated)) = (meta.processed, meta.deduplicated) {
        line.push_str(&format!(" processed={processed} deduplicated={deduplicated}"));
    }
    if let Some(rule_set) = &meta.rule_set {
        line.push_str(&format!(" type={rule_set}"));
    }
    eprintln!("{line}");

    if !meta.cast_failures.is_empty() {
        let counts = meta
            .cast_failures
            .iter()
            .map(|(column, count)| format!("{column}={count}"))
            .collect::<Vec<_>>()
            .join(", ");
        eprintln!("warning: values nulled by casts: {counts}");
    }

    if meta.warnings.is_empty() {
        return;
    }
    eprintln!("warning: {} issue(s) detected", meta.warnings.len());
    if verbose {
        for warning in &meta.warnings {
            eprintln!(
                "  - {:?} backend={:?} table={:?}: {}",
                warning.code, warning.backend, warning.table, warning.message
            );
        }
    }
}

fn write_json(path: &Path, tables: &[Table], meta: &RunMetadata) -> Result<()> {
    let tables = tables
        .iter()
        .map(table_to_records)
        .collect::<Result<Vec<_>, _>>()?;
    let body = serde_json::to_string_pretty(&json!({ "metadata": meta, "tables": tables }))?;
    fs::write(path, body).with_context(|| format!("failed to write '{}'", path.display()))
}

fn run_extract(args: &ExtractArgs, verbose: bool) -> Result<usize> {
    let config = parse_run_config(&args.run)?;
    let rules = resolve_rules(&args.run.rules, &args.input)?;
    let (tables, meta) = run_document(&args.input, &config, rules.as_ref())?;
    log_report(&meta, verbose);

    if let Some(dir) = &args.output_dir {
        let written = write_tables_csv(dir, &tables, config.delimiter)
            .with_context(|| format!("failed to write CSV files to '{}'", dir.display()))?;
        eprintln!("saved {} table(s) to {}", written.len(), dir.display());
    }

    if let Some(path) = &args.json {
        write_json(path, &tables, &meta)?;
    }

    if args.summary {
        println!("{}", serde_json::to_string_pretty(&summarize(&tables)?)?);
    }

    if args.output_dir.is_none() && args.json.is_none() && !args.summary {
        for (index, table) in tables.iter().enumerate() {
            if index > 0 {
                println!();
            }
            print!("{}", table_to_csv_string(table, config.delimiter)?);
        }
    }

    Ok(tables.len())
}

fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pdfs = fs::read_dir(dir)
        .with_context(|| format!("failed to read input directory '{}'", dir.display()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|extension| extension.eq_ignore_ascii_case("pdf"))
        })
        .collect::<Vec<_>>();
    pdfs.sort();
    Ok(pdfs)
}

/// Returns (documents failed, tables written).
fn run_batch(args: &BatchArgs, verbose: bool) -> Result<(usize, usize)> {
    let config = parse_run_config(&args.run)?;
    let pdfs = list_pdfs(&args.input_dir)?;
    if pdfs.is_empty() {
        eprintln!("no PDF files found in {}", args.input_dir.display());
        return Ok((0, 0));
    }

    let mut failed = 0;
    let mut total_tables = 0;
    for (index, pdf) in pdfs.iter().enumerate() {
        eprintln!("[{}/{}] {}", index + 1, pdfs.len(), pdf.display());

        let outcome = resolve_rules(&args.run.rules, pdf).and_then(|rules| {
            let (tables, meta) = run_document(pdf, &config, rules.as_ref())?;
            log_report(&meta, verbose);
            let stem = pdf
                .file_stem()
                .map_or_else(|| "document".into(), |stem| stem.to_string_lossy());
            let dir = args.output_dir.join(format!("{stem}_tables"));
            write_tables_csv(&dir, &tables, config.delimiter)
                .with_context(|| format!("failed to write CSV files to '{}'", dir.display()))
        });

        match outcome {
            Ok(written) => total_tables += written.len(),
            Err(error) => {
                failed += 1;
                eprintln!("error: {error:#}");
            }
        }
    }

    eprintln!(
        "processed {} PDF(s): {} table(s) written, {} failed",
        pdfs.len(),
        total_tables,
        failed
    );
    Ok((failed, total_tables))
}

fn exit_for_tables(count: usize) -> ExitCode {
    if count > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

fn report_error(error: &anyhow::Error) -> ExitCode {
    eprintln!("error: {error:#}");
    ExitCode::from(1)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "pdf_table_rules=info"
    } else {
        "pdf_table_rules=warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    match &cli.command {
        Commands::Extract(args) => match run_extract(args, cli.verbose) {
            Ok(count) => exit_for_tables(count),
            Err(error) => report_error(&error),
        },
        Commands::Batch(args) => match run_batch(args, cli.verbose) {
            Ok((0, count)) => exit_for_tables(count),
            Ok(_) => ExitCode::from(1),
            Err(error) => report_error(&error),
        },
        Commands::Detect(args) => {
            match RulesRegistry::new(&args.dir.rules_dir).detect_type(&args.input) {
                Some(name) => {
                    println!("{name}");
                    ExitCode::SUCCESS
                }
                None => {
                    eprintln!("no document type matches {}", args.input.display());
                    ExitCode::from(2)
                }
            }
        }
        Commands::Types(args) => {
            let types = RulesRegistry::new(&args.rules_dir).list_types();
            for name in &types {
                println!("{name}");
            }
            exit_for_tables(types.len())
        }
    }
}
