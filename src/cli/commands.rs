// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`, and all
// their configurable flags.

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::application::train_use_case::{ComputeDevice, TrainConfig};

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the classifier, evaluate the best checkpoint and cluster the embeddings
    Train(TrainArgs),

    /// Recompute the validation report of a finished training run
    Evaluate(EvaluateArgs),
}

/// Where the tensors live
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum DeviceArg {
    /// NdArray backend
    Cpu,
    /// Wgpu backend
    Gpu,
}

impl From<DeviceArg> for ComputeDevice {
    fn from(d: DeviceArg) -> Self {
        match d {
            DeviceArg::Cpu => ComputeDevice::Cpu,
            DeviceArg::Gpu => ComputeDevice::Gpu,
        }
    }
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// CSV with age, gender, accent and filename_spectrogram columns
    #[arg(long, default_value = "data/spectrograms.csv")]
    pub manifest: PathBuf,

    /// Directory relative image paths are resolved against
    /// (defaults to the working directory)
    #[arg(long)]
    pub image_root: Option<PathBuf>,

    /// Where codecs, checkpoints, metrics, plots and the cluster model go
    #[arg(long, default_value = "artifacts")]
    pub artifact_dir: PathBuf,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// Maximum number of epochs
    #[arg(long, default_value_t = 25)]
    pub epochs: usize,

    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    /// Epochs without a strict validation-accuracy improvement before stopping
    #[arg(long, default_value_t = 5)]
    pub patience: usize,

    #[arg(long, value_enum, default_value_t = DeviceArg::Cpu)]
    pub device: DeviceArg,

    /// Images are resized to SIZE × SIZE
    #[arg(long, default_value_t = 128)]
    pub image_size: u32,

    /// Width of the backbone embedding fed to every head
    #[arg(long, default_value_t = 256)]
    pub embedding_dim: usize,

    /// Channels of the first convolution block
    #[arg(long, default_value_t = 32)]
    pub base_channels: usize,

    /// Dropout applied to the embedding before each head
    #[arg(long, default_value_t = 0.3)]
    pub dropout: f64,

    #[arg(long, default_value_t = 0.1)]
    pub label_smoothing: f64,

    /// Share of rows held out for validation
    #[arg(long, default_value_t = 0.2)]
    pub val_fraction: f64,

    /// Seeds the split, the loader shuffle, the weights and the cluster model
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Data loader worker threads
    #[arg(long, default_value_t = 2)]
    pub num_workers: usize,

    /// Multiply the learning rate by --lr-gamma every N epochs
    #[arg(long, default_value_t = 7)]
    pub lr_step_size: usize,

    #[arg(long, default_value_t = 0.1)]
    pub lr_gamma: f64,

    /// Mixture components fitted on the final-epoch embeddings
    #[arg(long, default_value_t = 5)]
    pub clusters: usize,

    /// Pretrained backbone record (CompactRecorder, without extension)
    #[arg(long)]
    pub backbone_weights: Option<PathBuf>,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            manifest: a.manifest,
            image_root: a.image_root,
            artifact_dir: a.artifact_dir,
            batch_size: a.batch_size,
            epochs: a.epochs,
            lr: a.lr,
            patience: a.patience,
            device: a.device.into(),
            image_size: a.image_size,
            embedding_dim: a.embedding_dim,
            base_channels: a.base_channels,
            dropout: a.dropout,
            label_smoothing: a.label_smoothing,
            val_fraction: a.val_fraction,
            seed: a.seed,
            num_workers: a.num_workers,
            lr_step_size: a.lr_step_size,
            lr_gamma: a.lr_gamma,
            clusters: a.clusters,
            backbone_weights: a.backbone_weights,
        }
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Artifact directory of a finished `train` run
    #[arg(long, default_value = "artifacts")]
    pub artifact_dir: PathBuf,

    /// Manifest to evaluate on instead of the training one
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    #[arg(long)]
    pub image_root: Option<PathBuf>,

    /// Overrides the device recorded at training time
    #[arg(long, value_enum)]
    pub device: Option<DeviceArg>,
}
