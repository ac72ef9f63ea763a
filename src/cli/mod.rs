// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses command line arguments with `clap` and delegates all
// work to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    — train, evaluate and cluster in one run
//   2. `evaluate` — re-score the best checkpoint of a past run

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, TrainArgs};

use crate::application::{
    evaluate_use_case::EvaluateUseCase,
    train_use_case::{TrainOutcome, TrainUseCase},
};
use crate::ml::engine::TrainingPhase;

#[derive(Parser, Debug)]
#[command(
    name = "speaker-attributes",
    version,
    about = "Predict age, gender and accent from spectrogram images, then cluster the learned embeddings."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route the subcommand to its use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    tracing::info!("Starting training from manifest: {}", args.manifest.display());

    let outcome = TrainUseCase::new(args.into()).execute()?;
    print_train_outcome(&outcome);
    // training and evaluation are already reported; surface the clustering error last
    outcome.clusters.map(|_| ())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let report = EvaluateUseCase::new(args.artifact_dir)
        .with_manifest(args.manifest, args.image_root)
        .with_device(args.device.map(Into::into))
        .execute()?;

    println!("\n{report}");
    Ok(())
}

fn print_train_outcome(outcome: &TrainOutcome) {
    match outcome.phase {
        TrainingPhase::EarlyStopped { epoch } => {
            println!("\nTraining stopped early after epoch {}.", epoch + 1)
        }
        _ => println!("\nTraining ran all {} epochs.", outcome.epochs_run),
    }
    if let Some(best) = outcome.best {
        println!(
            "Best checkpoint: epoch {} (val_acc={:.2}%)",
            best.epoch + 1,
            best.val_accuracy * 100.0
        );
    }

    println!("\n{}", outcome.evaluation);

    match &outcome.clusters {
        Ok(clusters) => {
            println!(
                "\nCluster model: {} components over {} embeddings (converged: {}, mean log-likelihood {:.3})",
                clusters.components, clusters.rows, clusters.converged, clusters.mean_log_likelihood
            );
            println!("  sizes: {:?}", clusters.sizes);
            println!("  saved to '{}'", clusters.path.display());
        }
        Err(_) => println!("\nNo cluster model was fitted."),
    }
}
