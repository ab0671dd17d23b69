use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use screenparse_core::{
    ImageInput, ParseOptions, ParserConfig, ScreenParser, parse::into_outcomes,
};

#[derive(Parser)]
#[command(name = "analyze")]
#[command(about = "GUI screenshot element analysis tool")]
struct Args {
    #[arg(required = true, help = "Screenshot file paths")]
    inputs: Vec<PathBuf>,

    #[arg(short, long, help = "JSON parser configuration")]
    config: Option<PathBuf>,

    #[arg(
        short,
        long,
        default_value_t = screenparse_core::consts::DEFAULT_SCORE_THRESHOLD,
        help = "Icon detector confidence floor"
    )]
    score_threshold: f32,

    #[arg(short, long, default_value = ".", help = "Output directory")]
    output: PathBuf,

    #[arg(long, help = "Write annotated images and JSON reports to the output directory")]
    save: bool,

    #[arg(long, help = "Skip rendering the annotated image")]
    no_annotate: bool,

    #[arg(long, help = "Emit logs as JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = match &args.config {
        Some(path) => ParserConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ParserConfig::default(),
    };

    let options = ParseOptions::builder()
        .score_threshold(args.score_threshold)
        .annotate(!args.no_annotate)
        .save_annotated(args.save)
        .output_directory(args.output.clone())
        .build()?;

    info!("Inputs: {}", args.inputs.len());
    info!("Output directory: {}", args.output.display());

    let parser = ScreenParser::new(config)?;
    parser.warm_up().await.context("loading detectors")?;

    let inputs: Vec<ImageInput> = args.inputs.iter().map(ImageInput::path).collect();
    let outcomes = into_outcomes(parser.analyze_batch(&inputs, &options).await);

    let failed = outcomes
        .values()
        .filter(|outcome| matches!(outcome, screenparse_core::BatchOutcome::Failed(_)))
        .count();

    println!("{}", serde_json::to_string_pretty(&outcomes)?);

    if failed > 0 {
        warn!("{} of {} inputs failed", failed, outcomes.len());
        std::process::exit(1);
    }

    info!("Analysis completed successfully!");
    Ok(())
}
