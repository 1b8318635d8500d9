//! SDDS inspection and conversion CLI.
//!
//! Decodes an SDDS file, prints a summary and optionally converts it to CSV
//! or re-encodes it as ASCII or binary SDDS.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sdds_core::{output, DataMode, Dataset, DecoderConfig, SddsDecoder};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Reader for SDDS (Self Describing Data Set) files.
///
/// Prints the parameters and columns of a file and converts it to CSV or SDDS.
#[derive(Parser, Debug)]
#[command(name = "sdds")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input SDDS file path
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file path (.csv, .sdds)
    ///
    /// The output format is determined by the file extension:
    /// - .csv: one page as comma-separated values
    /// - .sdds: the whole dataset re-encoded in the mode given by --mode
    #[arg(value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Only decode these columns (comma-separated names)
    #[arg(short, long, value_delimiter = ',')]
    columns: Option<Vec<String>>,

    /// Stop after this many pages
    #[arg(long, value_name = "N")]
    max_pages: Option<usize>,

    /// Page to export or show (1-based)
    #[arg(short, long, default_value_t = 1)]
    page: usize,

    /// Data mode for .sdds output (ascii or binary)
    #[arg(short, long, default_value = "ascii")]
    mode: String,

    /// Print column values of the selected page
    #[arg(short, long)]
    show: bool,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    debug!(?args, "parsed arguments");

    let mode = DataMode::from_str(&args.mode).context("Invalid data mode. Use ascii or binary")?;
    if args.page == 0 {
        anyhow::bail!("Page numbers start at 1");
    }

    let mut config = DecoderConfig::new();
    if let Some(columns) = &args.columns {
        config = config.with_columns(columns.iter().cloned());
    }
    if let Some(max_pages) = args.max_pages {
        config = config.with_max_pages(max_pages);
    }

    // Setup progress bar
    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb
    };

    let start_time = Instant::now();

    progress.set_message(format!(
        "Decoding {:?}...",
        args.input.file_name().unwrap_or_default()
    ));

    let decoder = SddsDecoder::with_config(config);
    let dataset = decoder
        .decode_file(&args.input)
        .with_context(|| format!("Failed to decode SDDS file {:?}", args.input))?;

    progress.set_message(format!(
        "Decoded {} pages, {} rows in {:.2}s",
        dataset.pages.len(),
        dataset.total_rows(),
        start_time.elapsed().as_secs_f64()
    ));

    if let Some(output_path) = &args.output {
        progress.set_message(format!(
            "Writing to {:?}...",
            output_path.file_name().unwrap_or_default()
        ));
        write_output(output_path, &dataset, args.page, mode)?;
        info!(output = ?output_path, "wrote output");
    }

    progress.finish_with_message(format!(
        "Done! Decoded {} pages in {:.2}s",
        dataset.pages.len(),
        start_time.elapsed().as_secs_f64()
    ));

    if !args.quiet {
        print_summary(&args.input, &dataset);
    }
    if args.show {
        show_page(&dataset, args.page)?;
    }

    Ok(())
}

fn write_output(path: &Path, dataset: &Dataset, page: usize, mode: DataMode) -> Result<()> {
    let output_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match output_ext.as_str() {
        "csv" => {
            output::write_csv(path, dataset, page - 1).context("Failed to write CSV output")?;
        }
        "sdds" => {
            output::write_sdds(path, dataset, mode).context("Failed to write SDDS output")?;
        }
        _ => {
            anyhow::bail!(
                "Unsupported output format: .{}. Use .csv or .sdds",
                output_ext
            );
        }
    }
    Ok(())
}

fn print_summary(input: &Path, dataset: &Dataset) {
    let schema = &dataset.schema;
    eprintln!();
    eprintln!("Summary:");
    eprintln!("  Input:        {:?}", input);
    eprintln!("  Version:      SDDS{}", schema.version);
    eprintln!("  Mode:         {}", schema.layout.mode);
    if let Some(text) = schema.description.as_ref().and_then(|d| d.text.as_ref()) {
        eprintln!("  Description:  {}", text);
    }
    eprintln!("  Pages:        {}", dataset.pages.len());
    eprintln!("  Rows:         {}", dataset.total_rows());

    if !schema.parameters.is_empty() {
        eprintln!();
        eprintln!("Parameters:");
        for def in &schema.parameters {
            match dataset.parameter(&def.name) {
                Some(value) => eprintln!("  {:<20} {:<10} {}", def.name, def.data_type, value),
                None => eprintln!("  {:<20} {:<10} -", def.name, def.data_type),
            }
        }
    }

    if !dataset.columns().is_empty() {
        eprintln!();
        eprintln!("Columns:");
        for def in dataset.columns() {
            let units = def.units.as_deref().unwrap_or("");
            eprintln!("  {:<20} {:<10} {}", def.name, def.data_type, units);
        }
    }
}

fn show_page(dataset: &Dataset, page: usize) -> Result<()> {
    let data = dataset.pages.get(page - 1).with_context(|| {
        format!(
            "Page {} out of range, dataset has {} pages",
            page,
            dataset.pages.len()
        )
    })?;

    let names: Vec<&str> = dataset.columns().iter().map(|c| c.name.as_str()).collect();
    println!("{}", names.join("\t"));
    for row in 0..data.row_count {
        if let Some(values) = data.row(row) {
            let cells: Vec<String> = values.iter().map(ToString::to_string).collect();
            println!("{}", cells.join("\t"));
        }
    }
    Ok(())
}
