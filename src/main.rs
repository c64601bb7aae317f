//! Leaf Fusion CLI
//!
//! Command-line entry point for the cassava leaf disease classifier: single
//! image prediction, model information, weight initialization, latency
//! benchmarking and the leaf plausibility check.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use leaf_fusion::backend::{DeviceSelection, InferenceBackend};
use leaf_fusion::inference::{
    benchmark_predictor, BenchmarkConfig, FusionPredictor, LeafCheck, PredictorConfig,
    TARGET_LATENCY_MS,
};
use leaf_fusion::utils::format_probability_bar;
use leaf_fusion::utils::logging::{init_logging, LogConfig, LogLevel};

/// Cassava Leaf Disease Classification
///
/// Mid-fusion of frequency-domain transforms and two CNN backbones,
/// built with the Burn framework.
#[derive(Parser, Debug)]
#[command(name = "leaf-fusion")]
#[command(version)]
#[command(about = "Cassava leaf disease classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Explicit log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Plain log output without colors
    #[arg(long, default_value = "false")]
    no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that builds a predictor
#[derive(Args, Debug)]
struct ModelArgs {
    /// Predictor configuration (JSON); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Weight file path without the .mpk extension
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Use the compact network (fast, for smoke tests)
    #[arg(long, default_value = "false")]
    compact: bool,

    /// Seed for random initialization
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a single image
    Predict {
        /// Path to the input image
        #[arg(short, long)]
        image: PathBuf,

        /// Run the leaf check first and stop if it fails
        #[arg(long, default_value = "false")]
        check_leaf: bool,

        /// Print the result as JSON
        #[arg(long, default_value = "false")]
        json: bool,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Show model information
    Info {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Write randomly initialized weights to the weight store
    InitWeights {
        /// Output path without the .mpk extension
        #[arg(short, long, default_value = "models/fusionnet_best")]
        output: PathBuf,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Benchmark single-image inference latency
    Bench {
        /// Image to classify repeatedly
        #[arg(short, long)]
        image: PathBuf,

        /// Number of timed iterations
        #[arg(short = 'n', long, default_value = "20")]
        iterations: usize,

        /// Number of warmup iterations
        #[arg(long, default_value = "3")]
        warmup: usize,

        /// Output JSON file for benchmark results
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Check whether an image looks like a cassava leaf
    CheckLeaf {
        /// Path to the input image
        #[arg(short, long)]
        image: PathBuf,

        /// Decision threshold (0.0-1.0)
        #[arg(long, default_value = "0.5")]
        threshold: f32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else if cli.no_color {
        LogConfig::production()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config = log_config.with_level(LogLevel::from_str(level));
    }

    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Predict {
            image,
            check_leaf,
            json,
            model,
        } => cmd_predict(&image, check_leaf, json, &model),
        Commands::Info { model } => cmd_info(&model),
        Commands::InitWeights { output, model } => cmd_init_weights(&output, &model),
        Commands::Bench {
            image,
            iterations,
            warmup,
            output,
            model,
        } => cmd_bench(&image, iterations, warmup, output.as_deref(), &model),
        Commands::CheckLeaf { image, threshold } => cmd_check_leaf(&image, threshold),
    }
}

fn predictor_config(args: &ModelArgs) -> Result<PredictorConfig> {
    let mut config = match &args.config {
        Some(path) => PredictorConfig::load(path)?,
        None if args.compact => PredictorConfig::compact(),
        None => PredictorConfig::default(),
    };

    if let Some(weights) = &args.weights {
        config.weights_path = weights.clone();
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }

    Ok(config)
}

fn build_predictor(args: &ModelArgs) -> Result<FusionPredictor<InferenceBackend>> {
    let config = predictor_config(args)?;
    println!("{}", "Building predictor...".cyan());
    let predictor = FusionPredictor::new(config, DeviceSelection::detect())
        .context("predictor construction failed")?;

    if predictor.weight_source().is_degraded() {
        println!(
            "{} no weight file found, predictions use random weights",
            "Warning:".yellow().bold()
        );
    }

    Ok(predictor)
}

fn cmd_predict(image_path: &Path, check_leaf: bool, json: bool, args: &ModelArgs) -> Result<()> {
    info!("Running inference on {:?}", image_path);
    let image = image::open(image_path)
        .with_context(|| format!("cannot decode image {:?}", image_path))?;

    if check_leaf {
        let verdict = LeafCheck::default().check(&image);
        if !verdict.is_leaf {
            println!("{} {}", "Rejected:".red().bold(), verdict.message);
            return Ok(());
        }
        println!("{} {}", "Leaf check:".green(), verdict.message);
    }

    let predictor = build_predictor(args)?;
    let result = predictor.predict(&image)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    println!(
        "{}",
        image_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .bold()
    );
    println!("  Predicted:  {}", result.predicted_label.green().bold());
    println!("  Confidence: {:.1}%", result.confidence * 100.0);
    println!("  Time:       {:.2}ms", result.inference_time_ms);
    println!("  Distribution:");
    for class in &result.class_probabilities {
        println!(
            "    {} {:>6.2}%  {}",
            format_probability_bar(class.probability, 20),
            class.probability * 100.0,
            class.label
        );
    }

    Ok(())
}

fn cmd_info(args: &ModelArgs) -> Result<()> {
    let predictor = build_predictor(args)?;
    let info = predictor.info();

    println!();
    println!("{}", "Model Information:".cyan().bold());
    println!("  Model:          {}", info.model_type);
    println!("  Backend:        {}", info.backend);
    println!("  Input size:     {}x{}", info.input_size, info.input_size);
    println!("  Transforms:     {}", info.transforms.join(", "));
    println!("  Branches:       {}", info.branches.len());
    println!("  Fused channels: {}", info.fused_channels);
    println!("  Latent width:   {}", info.latent_width);
    println!(
        "  Parameters:     {}",
        leaf_fusion::utils::format_number(info.num_params)
    );
    println!("  Weights:        {}", info.weights);
    println!("  Classes:");
    for (i, name) in info.class_names.iter().enumerate() {
        println!("    {}. {}", i, name);
    }

    Ok(())
}

fn cmd_init_weights(output: &Path, args: &ModelArgs) -> Result<()> {
    let config = predictor_config(args)?;
    let predictor = FusionPredictor::<InferenceBackend>::random(config, DeviceSelection::detect())
        .context("predictor construction failed")?;
    let file = predictor.save_weights(output)?;

    println!("{} {}", "Saved weights to".green(), file.display());
    Ok(())
}

fn cmd_bench(
    image_path: &Path,
    iterations: usize,
    warmup: usize,
    output: Option<&Path>,
    args: &ModelArgs,
) -> Result<()> {
    let image = image::open(image_path)
        .with_context(|| format!("cannot decode image {:?}", image_path))?;
    let predictor = build_predictor(args)?;

    let config = BenchmarkConfig {
        warmup_iterations: warmup,
        iterations,
        verbose: false,
    };

    println!("{}", "Running benchmark...".cyan());
    let result = benchmark_predictor(&predictor, &image, config)?;
    println!();
    println!("{}", result);

    if result.meets_latency_target(TARGET_LATENCY_MS) {
        println!(
            "{} p95 latency within the {:.0}ms target",
            "OK".green().bold(),
            TARGET_LATENCY_MS
        );
    } else {
        println!(
            "{} p95 latency above the {:.0}ms target",
            "Slow:".yellow().bold(),
            TARGET_LATENCY_MS
        );
    }

    if let Some(path) = output {
        result.save(path)?;
        println!("{} {}", "Results saved to".green(), path.display());
    }

    Ok(())
}

fn cmd_check_leaf(image_path: &Path, threshold: f32) -> Result<()> {
    let image = image::open(image_path)
        .with_context(|| format!("cannot decode image {:?}", image_path))?;
    let verdict = LeafCheck::new(threshold).check(&image);

    if verdict.is_leaf {
        println!("{} {}", "Leaf:".green().bold(), verdict.message);
    } else {
        println!("{} {}", "Not a leaf:".red().bold(), verdict.message);
    }

    Ok(())
}
