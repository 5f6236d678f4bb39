use clap::{Parser, Subcommand};
use eyre::{bail, Result, WrapErr};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use fetalguard::pipeline::{corpus_meta_features, uncertainty};
use fetalguard::{
    analyze, summarize, AttributionPolicy, ExplainerConfig, FeatureInput, ModelContext,
    RawFeatures, SummarizerConfig,
};

#[derive(Parser)]
#[command(
    name = "fetalguard",
    about = "Fetal health risk classification from cardiotocography measurements."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP classifier service
    Serve {
        /// Address to bind to
        #[arg(long, default_value = fetalguard::server::DEFAULT_BIND_ADDR)]
        bind: String,

        /// Artifact directory containing manifest.json
        #[arg(long, default_value = "artifacts")]
        artifacts: PathBuf,

        /// JSONL file for analysis reports
        #[arg(long, default_value = "fetalguard-reports.jsonl")]
        reports: PathBuf,

        /// Keep reports in memory only
        #[arg(long)]
        ephemeral_reports: bool,

        /// Rate limit in requests per minute per IP (0 = no limit)
        #[arg(long, default_value_t = 60)]
        rate_limit: u32,

        /// Path for JSONL access log
        #[arg(long, default_value = "fetalguard-access.jsonl")]
        access_log: String,

        /// Directory for the metrics snapshot
        #[arg(long, default_value = ".")]
        metrics_dir: String,

        /// Coalition budget per attribution
        #[arg(long, default_value_t = fetalguard::explain::DEFAULT_NSAMPLES)]
        nsamples: usize,

        /// Seed for attribution sampling (random if unset)
        #[arg(long)]
        seed: Option<u64>,

        /// Attribution wall-clock budget in milliseconds (0 = unbounded)
        #[arg(long, default_value_t = 10_000)]
        attribution_timeout_ms: u64,
    },

    /// Classify one CTG recording locally
    Predict {
        /// Artifact directory containing manifest.json
        #[arg(long, default_value = "artifacts")]
        artifacts: PathBuf,

        /// JSON file with either a named object or an ordered array of 21 values
        #[arg(long, conflicts_with = "values")]
        input: Option<PathBuf>,

        /// 21 comma-separated values in canonical feature order, or
        /// comma-separated NAME=VALUE pairs in any order
        #[arg(long)]
        values: Option<String>,

        /// Output format: json or summary
        #[arg(long, default_value = "summary")]
        format: String,

        /// Skip attribution
        #[arg(long)]
        no_explain: bool,

        /// Coalition budget for the attribution
        #[arg(long, default_value_t = fetalguard::explain::DEFAULT_NSAMPLES)]
        nsamples: usize,

        /// Seed for attribution sampling (random if unset)
        #[arg(long)]
        seed: Option<u64>,

        /// Number of top contributions shown in summary output
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// MC-dropout passes for an uncertainty estimate (0 = none)
        #[arg(long, default_value_t = 0)]
        mc_passes: usize,
    },

    /// Summarize a raw training corpus into an attribution background set
    Summarize {
        /// Artifact directory; the background entry is not required
        #[arg(long, default_value = "artifacts")]
        artifacts: PathBuf,

        /// JSON array of raw records keyed by feature name
        #[arg(long)]
        corpus: PathBuf,

        /// Output path for the background JSON
        #[arg(long)]
        output: PathBuf,

        /// Number of clusters
        #[arg(long, default_value_t = fetalguard::background::N_BACKGROUND_SAMPLES)]
        k: usize,

        /// k-means restarts
        #[arg(long, default_value_t = 10)]
        n_init: usize,

        /// Maximum Lloyd iterations per restart
        #[arg(long, default_value_t = 300)]
        max_iter: usize,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[allow(clippy::too_many_arguments)]
fn cmd_serve(
    bind: String,
    artifacts: PathBuf,
    reports: PathBuf,
    ephemeral_reports: bool,
    rate_limit: u32,
    access_log: String,
    metrics_dir: String,
    explainer: ExplainerConfig,
    attribution_timeout_ms: u64,
) -> Result<()> {
    use fetalguard::server::{run_server, ServerConfig};

    let bind_addr = bind
        .parse()
        .wrap_err_with(|| format!("Invalid bind address: {}", bind))?;

    let config = ServerConfig {
        bind_addr,
        artifacts_dir: artifacts,
        reports_path: (!ephemeral_reports).then_some(reports),
        rate_limit_rpm: rate_limit,
        access_log_path: access_log,
        metrics_dir,
        api_key: std::env::var("FETALGUARD_API_KEY")
            .ok()
            .filter(|k| !k.is_empty()),
        skip_attribution: env_flag("FETALGUARD_SKIP_ATTRIBUTION"),
        attribution_timeout_ms,
        explainer,
        ..Default::default()
    };
    info!(?config, "starting FetalGuard classifier service");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_server(config))?;

    Ok(())
}

fn parse_number(v: &str) -> Result<f64> {
    v.parse::<f64>()
        .wrap_err_with(|| format!("not a number: {:?}", v))
}

/// `--values` is either plain numbers in canonical order or `NAME=VALUE`
/// pairs; the two forms cannot be mixed.
fn parse_values(values: &str) -> Result<RawFeatures> {
    let tokens: Vec<&str> = values.split(',').map(str::trim).collect();
    if tokens.iter().any(|t| t.contains('=')) {
        let mut pairs = Vec::with_capacity(tokens.len());
        for t in &tokens {
            let Some((name, v)) = t.split_once('=') else {
                bail!("expected NAME=VALUE, got {:?}", t);
            };
            pairs.push((name.trim(), parse_number(v.trim())?));
        }
        return Ok(RawFeatures::from_pairs(pairs)?);
    }
    let parsed = tokens
        .iter()
        .map(|t| parse_number(t).map(serde_json::Value::from))
        .collect::<Result<Vec<_>>>()?;
    Ok(FeatureInput::Ordered(parsed).validate()?)
}

fn read_input(input: Option<PathBuf>, values: Option<String>) -> Result<RawFeatures> {
    match (input, values) {
        (Some(path), _) => {
            let content = fs::read_to_string(&path)
                .wrap_err_with(|| format!("reading {}", path.display()))?;
            let features: FeatureInput = serde_json::from_str(&content)
                .wrap_err_with(|| format!("parsing {}", path.display()))?;
            Ok(features.validate()?)
        }
        (None, Some(values)) => parse_values(&values),
        (None, None) => bail!("one of --input or --values is required"),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_predict(
    artifacts: PathBuf,
    input: Option<PathBuf>,
    values: Option<String>,
    format: String,
    no_explain: bool,
    explainer: ExplainerConfig,
    top: usize,
    mc_passes: usize,
) -> Result<()> {
    let raw = read_input(input, values)?;
    let ctx = ModelContext::load(&artifacts)
        .wrap_err_with(|| format!("loading artifacts from {}", artifacts.display()))?;

    let policy = if no_explain || env_flag("FETALGUARD_SKIP_ATTRIBUTION") {
        AttributionPolicy::Skip
    } else {
        AttributionPolicy::BestEffort
    };
    let analysis = analyze(&ctx, &raw, policy, &explainer)?;
    let p = &analysis.prediction;
    let spread = match mc_passes {
        0 => None,
        n => {
            let seed = explainer.seed.unwrap_or_else(rand::random::<u64>);
            Some(uncertainty(&ctx, p, n, seed)?)
        }
    };

    match format.as_str() {
        "json" => {
            let result = serde_json::json!({
                "success": true,
                "class_index": p.class_index,
                "class_label": p.class.as_str(),
                "probability": p.probability,
                "scores": p.scores,
                "entropy": p.entropy,
                "uncertain": p.uncertain,
                "learners": p.learner_scores,
                "attribution": analysis.attribution.as_ref().map(|a| &a.contributions),
                "attribution_error": analysis.attribution_error,
                "uncertainty": spread,
                "model_version": ctx.version(),
                "model_hash": ctx.artifact_hash(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Fetal Health Assessment");
            println!("=======================");
            println!();
            println!("Class:        {} ({})", p.class.as_str(), p.class_index);
            println!("Probability:  {:.1}%", p.probability * 100.0);
            if p.uncertain {
                println!("Note:         low-confidence prediction (entropy {:.2})", p.entropy);
            }
            println!();
            println!("Scores:");
            println!("  NORMAL:        {:.1}%", p.scores.normal * 100.0);
            println!("  SUSPECT:       {:.1}%", p.scores.suspect * 100.0);
            println!("  PATHOLOGICAL:  {:.1}%", p.scores.pathological * 100.0);
            if let Some(est) = &spread {
                println!();
                println!("MC-dropout ({} passes, mean +/- std):", est.passes);
                for (label, (m, s)) in ["NORMAL", "SUSPECT", "PATHOLOGICAL"]
                    .iter()
                    .zip(est.mean.iter().zip(est.std.iter()))
                {
                    println!("  {:<14} {:.3} +/- {:.3}", label, m, s);
                }
            }
            println!();
            println!("Base learners:");
            for l in &p.learner_scores {
                println!(
                    "  {:<14} {:.3} / {:.3} / {:.3}",
                    l.name, l.scores.normal, l.scores.suspect, l.scores.pathological
                );
            }
            match (&analysis.attribution, &analysis.attribution_error) {
                (Some(exp), _) => {
                    println!();
                    println!("Top contributions (base value {:.3}):", exp.base_value);
                    for c in exp.top_features(top) {
                        println!("  {:<16} {:.4}", c.feature_name, c.contribution_score);
                    }
                }
                (None, Some(reason)) => {
                    println!();
                    println!("Attribution unavailable: {}", reason);
                }
                (None, None) => {}
            }
            println!();
            println!("Model: {} ({})", ctx.version(), ctx.artifact_hash());
        }
    }
    Ok(())
}

fn cmd_summarize(
    artifacts: PathBuf,
    corpus: PathBuf,
    output: &Path,
    config: SummarizerConfig,
) -> Result<()> {
    let ctx = ModelContext::load_without_background(&artifacts)
        .wrap_err_with(|| format!("loading artifacts from {}", artifacts.display()))?;
    let content =
        fs::read_to_string(&corpus).wrap_err_with(|| format!("reading {}", corpus.display()))?;
    let records: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(&content)
        .wrap_err_with(|| format!("{} must be a JSON array of objects", corpus.display()))?;

    let (rows, dropped) = corpus_meta_features(&ctx, &records)?;
    if dropped > 0 {
        warn!(dropped, kept = rows.len(), "dropped corpus rows with missing or invalid values");
    }

    let background = summarize(&rows, ctx.meta_feature_names().to_vec(), &config)?;
    fs::write(output, serde_json::to_vec_pretty(&background)?)
        .wrap_err_with(|| format!("writing {}", output.display()))?;
    info!(
        rows = rows.len(),
        centroids = background.len(),
        version = %background.version,
        output = %output.display(),
        "background set written"
    );
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            bind,
            artifacts,
            reports,
            ephemeral_reports,
            rate_limit,
            access_log,
            metrics_dir,
            nsamples,
            seed,
            attribution_timeout_ms,
        } => cmd_serve(
            bind,
            artifacts,
            reports,
            ephemeral_reports,
            rate_limit,
            access_log,
            metrics_dir,
            ExplainerConfig { nsamples, seed },
            attribution_timeout_ms,
        ),
        Commands::Predict {
            artifacts,
            input,
            values,
            format,
            no_explain,
            nsamples,
            seed,
            top,
            mc_passes,
        } => cmd_predict(
            artifacts,
            input,
            values,
            format,
            no_explain,
            ExplainerConfig { nsamples, seed },
            top,
            mc_passes,
        ),
        Commands::Summarize {
            artifacts,
            corpus,
            output,
            k,
            n_init,
            max_iter,
            seed,
        } => cmd_summarize(
            artifacts,
            corpus,
            &output,
            SummarizerConfig {
                k,
                n_init,
                max_iter,
                seed,
                ..Default::default()
            },
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetalguard::FEATURE_NAMES;

    #[test]
    fn test_serve_defaults_to_loopback() {
        let cli = Cli::try_parse_from(["fetalguard", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { bind, .. } => {
                let default = fetalguard::server::ServerConfig::default();
                assert_eq!(bind, default.bind_addr.to_string());
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_values_as_ordered_numbers() {
        let csv: Vec<String> = (0..FEATURE_NAMES.len()).map(|i| i.to_string()).collect();
        let raw = parse_values(&csv.join(",")).unwrap();
        assert_eq!(raw.get("ASTV"), Some(4.0));
    }

    #[test]
    fn test_values_as_named_pairs_in_any_order() {
        let pairs: Vec<String> = FEATURE_NAMES
            .iter()
            .enumerate()
            .rev()
            .map(|(i, name)| format!("{} = {}", name, i))
            .collect();
        let raw = parse_values(&pairs.join(",")).unwrap();
        let ordered: Vec<String> = (0..FEATURE_NAMES.len()).map(|i| i.to_string()).collect();
        assert_eq!(raw, parse_values(&ordered.join(",")).unwrap());
    }

    #[test]
    fn test_values_named_pairs_report_missing_features() {
        let err = parse_values("LB=120,ASTV=73").unwrap_err();
        assert!(format!("{:?}", err).contains("MLTV"));
        assert!(parse_values("LB=120,73").is_err());
    }

    #[test]
    fn test_predict_accepts_mc_passes() {
        let cli =
            Cli::try_parse_from(["fetalguard", "predict", "--values", "1", "--mc-passes", "25"])
                .unwrap();
        match cli.command {
            Commands::Predict { mc_passes, .. } => assert_eq!(mc_passes, 25),
            _ => panic!("expected predict"),
        }
    }
}
