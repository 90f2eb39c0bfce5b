// lab_demo/src/main.rs
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use neuro_lab::{
    evaluation_report, generate_galaxies, history_table, load_flowers_csv, load_flowers_json, load_galaxies_json,
    CancelFlag, ClassLabel, Dataset, DatasetVariant, Lab, LabConfig, LinearProjection, MetricsSnapshot,
};
use std::fs::{self, File};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    Flowers,
    Galaxies,
}

/// Train a classifier on one of the lab datasets and print the results.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(long, value_enum, default_value = "galaxies")]
    dataset: Variant,
    /// Iris CSV (flowers only)
    #[arg(long)]
    csv: Option<PathBuf>,
    /// JSON array of flat records
    #[arg(long)]
    json: Option<PathBuf>,
    /// PCA parameters matching the JSON records (flowers only)
    #[arg(long)]
    pca: Option<PathBuf>,
    /// Lab configuration overrides as JSON
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    epochs: Option<usize>,
    /// Extra hidden layers appended to the default one
    #[arg(long, default_value_t = 0)]
    extra_layers: usize,
    /// Samples per class for the synthetic galaxies
    #[arg(long, default_value_t = 220)]
    per_class: usize,
}

fn read(path: &PathBuf) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_config(args: &Args, variant: DatasetVariant) -> Result<LabConfig> {
    let mut config = match &args.config {
        Some(path) => variant.defaults().overlay_json(&read(path)?)?,
        None => variant.defaults(),
    };
    if config.variant != variant {
        warn!(file = %config.variant, cli = %variant, "config variant overridden by --dataset");
        config.variant = variant;
    }
    Ok(config)
}

async fn run<L: ClassLabel>(
    args: &Args,
    config: LabConfig,
    dataset: Dataset<L>,
    projection: Option<LinearProjection>,
) -> Result<()> {
    let mut lab = Lab::new(config)?;
    lab.apply_data(dataset, projection)?;
    if let Some(seed) = args.seed {
        lab.set_seed(seed);
    }
    if let Some(epochs) = args.epochs {
        let applied = lab.set_epochs(epochs);
        if applied != epochs {
            warn!(requested = epochs, applied, "epoch count clamped");
        }
    }
    for _ in 0..args.extra_layers {
        lab.add_layer()?;
    }
    for hint in lab.hints() {
        warn!(%hint, "model hint");
    }
    for warning in lab.warnings() {
        warn!(%warning, "partition");
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<MetricsSnapshot>();
    let printer = tokio::spawn(async move {
        while let Some(s) = rx.recv().await {
            info!(epoch = s.epoch, loss = s.train_loss, acc = s.train_accuracy, val_acc = ?s.val_accuracy, "epoch");
        }
    });

    let summary = lab.summary();
    let outcome = lab.train(Some(&tx), &CancelFlag::new()).await;
    drop(tx);
    printer.await?;

    match outcome {
        Ok(results) => {
            println!("{}", results.model.classifier());
            print!("{}", history_table(results.model.history()));
            print!("{}", evaluation_report(summary, &results.evaluation));
            let coverage = results.grid.coverage();
            for (label, share) in results.grid.class_order.iter().zip(coverage) {
                println!("boundary share {:<11} {:>5.1}%", label.name(), share * 100.0);
            }
            Ok(())
        }
        Err(failure) => {
            print!("{}", history_table(&failure.history));
            Err(failure.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    match args.dataset {
        Variant::Flowers => {
            let config = load_config(&args, DatasetVariant::Flowers)?;
            let (dataset, projection) = match (&args.csv, &args.json) {
                (Some(csv), _) => {
                    let file = File::open(csv).with_context(|| format!("opening {}", csv.display()))?;
                    let (d, p) = load_flowers_csv(file)?;
                    (d, Some(p))
                }
                (None, Some(json)) => {
                    let projection = match &args.pca {
                        Some(path) => Some(LinearProjection::from_json_str(&read(path)?)?),
                        None => None,
                    };
                    (load_flowers_json(&read(json)?)?, projection)
                }
                (None, None) => bail!("the flowers dataset needs --csv or --json"),
            };
            run(&args, config, dataset, projection).await
        }
        Variant::Galaxies => {
            let config = load_config(&args, DatasetVariant::Galaxies)?;
            let dataset = match &args.json {
                Some(json) => load_galaxies_json(&read(json)?)?,
                None => generate_galaxies(args.per_class, 2024),
            };
            run(&args, config, dataset, None).await
        }
    }
}
