use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use deck_localizer::pipeline::{
    extract_document, init_default_config, roundtrip_document, DeckLocalizer, LocalizerConfig,
    LocalizerOverrides,
};
use deck_localizer::pptx::extract::write_text_report;
use deck_localizer::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "deck-localizer")]
#[command(about = "Slide deck (.pptx) translator that keeps run formatting", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input .pptx
    #[arg(value_name = "PPTX")]
    input: Option<PathBuf>,

    /// Output .pptx (default: <input_stem>_translated_<lang>.pptx)
    #[arg(short, long, value_name = "PPTX")]
    output: Option<PathBuf>,

    /// Target language code (e.g. en, fr)
    #[arg(short = 't', long, env = "DECK_TARGET_LANG")]
    target_lang: Option<String>,

    /// Source language code (default: from config, else es)
    #[arg(long)]
    source_lang: Option<String>,

    /// Config file path (default: search for deck-localizer.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Assistant id (overrides config and OPENAI_ASSISTANT_ID)
    #[arg(long)]
    assistant_id: Option<String>,

    /// Do not read or write the translation cache
    #[arg(long)]
    no_cache: bool,

    /// Translation cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Write job statistics as JSON
    #[arg(long, value_name = "JSON")]
    stats_json: Option<PathBuf>,

    /// Extract slide text JSON (no provider calls), then exit
    #[arg(long, value_name = "JSON")]
    extract_text_json: Option<PathBuf>,

    /// Only parse + re-serialize slides (no translation)
    #[arg(long)]
    roundtrip_only: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// No progress output on stderr
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn default_output_for(input: &Path, target: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    input.with_file_name(format!("{stem}_translated_{target}.pptx"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let input = match args.input {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  deck-localizer <input.pptx> --target-lang en\n\nTIPS:\n  - Credentials: OPENAI_API_KEY and OPENAI_ASSISTANT_ID.\n  - Default config search: deck-localizer.toml (upwards), or set DECK_LOCALIZER_CONFIG.\n"
            );
            return Ok(());
        }
    };

    if let Some(report) = args.extract_text_json.as_ref() {
        let deck = extract_document(&input)?;
        write_text_report(&deck, report)?;
        progress.info(format!(
            "Wrote {} unique texts from {} slides to {}",
            deck.sentences.len(),
            deck.slide_count(),
            report.display()
        ));
        return Ok(());
    }

    if args.roundtrip_only {
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| default_output_for(&input, "roundtrip"));
        let rewritten = roundtrip_document(&input, &output)?;
        progress.info(format!("Re-serialized {rewritten} slides into {}", output.display()));
        return Ok(());
    }

    let cfg = LocalizerConfig::from_sources(
        &input,
        LocalizerOverrides {
            config_path: args.config,
            source_language: args.source_lang,
            assistant_id: args.assistant_id,
            no_cache: args.no_cache,
            cache_dir: args.cache_dir,
        },
    )
    .context("build config")?;

    let target = args
        .target_lang
        .or_else(|| cfg.default_target_language.clone())
        .context("missing target language (use --target-lang or set translation.target_language)")?;
    let target = cfg.validate_target_language(&target)?;
    let output = args
        .output
        .unwrap_or_else(|| default_output_for(&input, &target));

    let localizer = DeckLocalizer::with_openai(cfg, progress.clone())?;
    let outcome = localizer.process_document(&input, &output, &target).await?;
    progress.summary(&outcome.stats);

    if let Some(path) = args.stats_json {
        let json = serde_json::to_string_pretty(&outcome.stats).context("serialize stats")?;
        std::fs::write(&path, json).with_context(|| format!("write stats: {}", path.display()))?;
    }
    Ok(())
}
