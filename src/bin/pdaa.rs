//! pdaa - proteomics differential abundance analysis CLI
//!
//! Command-line interface for composable differential abundance analysis
//! of quantitative proteomics tables.

use clap::{Args, Parser, Subcommand};
use proteomics_daa::benchmark::{generate_two_group, SyntheticConfig};
use proteomics_daa::classify::ClassifyConfig;
use proteomics_daa::data::{DaResultSet, QuantMatrix, SampleMetadata, TableSpec};
use proteomics_daa::enrich::{test_enrichment, CategoryMap, EnrichmentConfig};
use proteomics_daa::error::Result;
use proteomics_daa::filter::AnnotationFilter;
use proteomics_daa::model::EbayesConfig;
use proteomics_daa::pipeline::{Pipeline, PipelineConfig};
use std::path::{Path, PathBuf};

/// Proteomics Differential Abundance Analysis
#[derive(Parser)]
#[command(name = "pdaa")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// How to read the quantitative input table.
#[derive(Args)]
struct InputArgs {
    /// Path to the quantitative table
    #[arg(short, long)]
    input: PathBuf,

    /// Comma-separated quantitative columns; without it the input is read
    /// as a feature-by-sample TSV
    #[arg(long, value_delimiter = ',')]
    quant_columns: Option<Vec<String>>,

    /// Identifier column of a raw table (rows are numbered otherwise)
    #[arg(long)]
    id_column: Option<String>,

    /// Field delimiter of a raw table
    #[arg(long, default_value = "\t")]
    delimiter: char,
}

impl InputArgs {
    fn load(&self) -> Result<QuantMatrix> {
        let matrix = match &self.quant_columns {
            Some(columns) => {
                let mut spec = TableSpec::tsv(columns.clone()).with_delimiter(self.delimiter as u8);
                if let Some(id) = &self.id_column {
                    spec = spec.with_id_column(id);
                }
                QuantMatrix::from_delimited(&self.input, &spec)?
            }
            None => QuantMatrix::from_tsv(&self.input)?,
        };
        eprintln!(
            "Loaded {} rows x {} samples ({} missing values)",
            matrix.n_features(),
            matrix.n_samples(),
            matrix.n_missing()
        );
        Ok(matrix)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline from a YAML configuration file
    Run {
        /// Path to pipeline configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        #[command(flatten)]
        input: InputArgs,

        /// Path to sample metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Output path for results TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run a quick limma-style analysis on a protein-level table
    Limma {
        #[command(flatten)]
        input: InputArgs,

        /// Path to sample metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Formula for the model (e.g., "~ condition")
        #[arg(short, long)]
        formula: String,

        /// Coefficient to test (e.g., "conditiontreatment")
        #[arg(short = 't', long)]
        test_coef: String,

        /// Output path for results TSV
        #[arg(short, long)]
        output: PathBuf,

        /// Log-transform raw intensities with this base first
        #[arg(long)]
        log_base: Option<f64>,

        /// Let the prior variance follow the mean abundance
        #[arg(long)]
        trend: bool,

        /// Robust prior estimation
        #[arg(long)]
        robust: bool,

        /// Test against a fold-change threshold (TREAT)
        #[arg(long)]
        lfc: Option<f64>,

        /// q-value cutoff for labelling (default: 0.05)
        #[arg(short, long, default_value = "0.05")]
        q: f64,
    },

    /// Test categories for over-representation in a foreground list
    Enrich {
        /// File with foreground identifiers, one per line
        #[arg(short, long)]
        foreground: PathBuf,

        /// File with universe identifiers, one per line
        #[arg(short, long)]
        universe: PathBuf,

        /// Category mapping TSV (identifier, category, description)
        #[arg(short, long)]
        categories: PathBuf,

        /// Output path for enrichment TSV
        #[arg(short, long)]
        output: PathBuf,

        /// q-value cutoff (default: 0.05)
        #[arg(short, long, default_value = "0.05")]
        q: f64,

        /// Smallest category size tested
        #[arg(long, default_value = "1")]
        min_size: usize,

        /// Largest category size tested
        #[arg(long)]
        max_size: Option<usize>,

        /// Count unannotated universe members too
        #[arg(long)]
        include_unannotated: bool,
    },

    /// Generate an example pipeline configuration
    Example {
        /// Output path for the YAML file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write a synthetic two-group dataset with ground truth
    Simulate {
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Number of proteins
        #[arg(long, default_value = "100")]
        n_features: usize,

        /// Samples per group
        #[arg(long, default_value = "3")]
        n_per_group: usize,

        /// Random seed (default: 42)
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            input,
            metadata,
            output,
        } => cmd_run(&config, &input, &metadata, &output),

        Commands::Limma {
            input,
            metadata,
            formula,
            test_coef,
            output,
            log_base,
            trend,
            robust,
            lfc,
            q,
        } => cmd_limma(
            &input,
            &metadata,
            &formula,
            &test_coef,
            &output,
            log_base,
            EbayesConfig::default().with_trend(trend).with_robust(robust),
            lfc,
            q,
        ),

        Commands::Enrich {
            foreground,
            universe,
            categories,
            output,
            q,
            min_size,
            max_size,
            include_unannotated,
        } => cmd_enrich(
            &foreground,
            &universe,
            &categories,
            &output,
            EnrichmentConfig {
                q_cutoff: q,
                min_size,
                max_size,
                annotated_only: !include_unannotated,
            },
        ),

        Commands::Example { output } => cmd_example(&output),

        Commands::Simulate {
            output,
            n_features,
            n_per_group,
            seed,
        } => cmd_simulate(&output, n_features, n_per_group, seed),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(
    config_path: &Path,
    input: &InputArgs,
    metadata_path: &Path,
    output_path: &Path,
) -> Result<()> {
    eprintln!("Loading pipeline configuration from {:?}...", config_path);
    let config = PipelineConfig::from_file(config_path)?;

    let matrix = input.load()?;
    let metadata = SampleMetadata::from_tsv(metadata_path)?;

    eprintln!("Running pipeline '{}'...", config.name);
    let results = Pipeline::from_config(&config).run(&matrix, &metadata)?;

    write_results(&results, output_path)
}

/// Run a quick limma analysis
#[allow(clippy::too_many_arguments)]
fn cmd_limma(
    input: &InputArgs,
    metadata_path: &Path,
    formula: &str,
    test_coef: &str,
    output_path: &Path,
    log_base: Option<f64>,
    ebayes: EbayesConfig,
    lfc: Option<f64>,
    q: f64,
) -> Result<()> {
    let matrix = input.load()?;
    let metadata = SampleMetadata::from_tsv(metadata_path)?;

    eprintln!("Running limma analysis...");
    eprintln!("  Formula: {}", formula);
    eprintln!("  Testing: {}", test_coef);

    let mut pipeline = Pipeline::new().name("limma");
    if let Some(base) = log_base {
        pipeline = pipeline.zero_to_missing().log_transform(base);
    }
    pipeline = pipeline.normalize_median().model_lm(formula).ebayes(ebayes);
    pipeline = match lfc {
        Some(lfc) => pipeline.test_treat(test_coef, lfc),
        None => pipeline.test_moderated(test_coef),
    };
    let results = pipeline
        .correct_bh()
        .classify(ClassifyConfig::new(q))
        .run(&matrix, &metadata)?;

    write_results(&results, output_path)?;

    let sorted = results.sorted_by_pvalue();
    if !sorted.is_empty() {
        eprintln!("\nTop 5 hits:");
        for r in sorted.iter().take(5) {
            eprintln!(
                "  {}: logFC={:.3}, t={:.2}, q={:.4}",
                r.feature_id, r.estimate, r.statistic, r.q_value
            );
        }
    }

    Ok(())
}

fn write_results(results: &DaResultSet, output_path: &Path) -> Result<()> {
    eprintln!("Writing results to {:?}...", output_path);
    results.to_tsv(output_path)?;

    eprintln!("Done!");
    eprint!("{}", results.summary());
    Ok(())
}

/// One identifier per line; blank lines and `#` comments are skipped.
fn read_id_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

fn cmd_enrich(
    foreground_path: &Path,
    universe_path: &Path,
    categories_path: &Path,
    output_path: &Path,
    config: EnrichmentConfig,
) -> Result<()> {
    let foreground = read_id_list(foreground_path)?;
    let universe = read_id_list(universe_path)?;
    let categories = CategoryMap::from_tsv(categories_path)?;
    eprintln!(
        "Foreground {} / universe {} identifiers, {} categories",
        foreground.len(),
        universe.len(),
        categories.n_categories()
    );

    let result = test_enrichment(&foreground, &universe, &categories, &config)?;
    result.to_tsv(output_path)?;

    eprintln!(
        "Tested {} categories, {} with q < {}",
        result.n_tested,
        result.len(),
        config.q_cutoff
    );
    for r in result.results.iter().take(10) {
        eprintln!(
            "  {} {}: {}/{} (fold {:.2}), q={:.3e}",
            r.category, r.description, r.overlap, r.set_size, r.fold_enrichment, r.q_value
        );
    }
    Ok(())
}

fn cmd_example(output_path: &Path) -> Result<()> {
    let pipeline = Pipeline::new()
        .name("example-psm-to-protein")
        .filter_annotation(vec![
            AnnotationFilter::AtMost {
                column: "q_value".to_string(),
                max: 0.01,
            },
            AnnotationFilter::NotMatches {
                column: "protein".to_string(),
                pattern: "^(REV_|CON_)".to_string(),
            },
        ])
        .filter_missing_key("protein")
        .zero_to_missing()
        .aggregate_sum("peptide")
        .aggregate_sum("protein")
        .log2()
        .normalize_median()
        .filter_missing(0.5)
        .model_lm("~ condition")
        .ebayes(EbayesConfig::default().with_trend(true).with_robust(true))
        .test_moderated("conditiontreatment")
        .correct_bh()
        .classify(ClassifyConfig::new(0.05).with_lfc(1.0));

    let config = pipeline.to_config(Some(
        "Example pipeline from spectrum matches to protein-level moderated tests",
    ));
    let yaml = config.to_yaml()?;

    std::fs::write(output_path, &yaml)?;
    eprintln!("Wrote example pipeline to {:?}", output_path);
    eprintln!();
    eprintln!("Contents:");
    println!("{}", yaml);

    Ok(())
}

fn cmd_simulate(output: &Path, n_features: usize, n_per_group: usize, seed: u64) -> Result<()> {
    let config = SyntheticConfig::new("simulated")
        .with_dimensions(n_features, n_per_group)
        .with_differential(n_features.min(10), 2.0)
        .with_seed(seed);
    let data = generate_two_group(&config)?;
    data.write_to_dir(output)?;

    eprintln!(
        "Wrote {} proteins x {} samples ({} differential) to {:?}",
        data.matrix.n_features(),
        data.matrix.n_samples(),
        data.ground_truth.differential_features.len(),
        output
    );
    Ok(())
}
