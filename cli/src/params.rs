use std::path::{Path, PathBuf};

use adsel_core::Parameters;
use adsel_core::inference::{Normalization, Preprocessing};
use adsel_core::labels::LABELS_FILE_NAME;
use adsel_core::report::DEFAULT_TOP_K;
use clap::{ArgAction, Parser};

/// Enumerate graphics adapters, pick one, classify an image.
#[derive(Parser, Debug)]
#[command(name = "adapter-selection", version)]
pub struct CliArgs {
    /// ONNX model file
    pub model: PathBuf,

    /// Image to classify
    pub image: PathBuf,

    /// Label file [default: labels.txt next to the executable]
    #[arg(long)]
    pub labels: Option<PathBuf>,

    /// Number of classes to report
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top: usize,

    /// Pixel scaling: raw, unit or imagenet
    #[arg(long, default_value_t = Normalization::Raw)]
    pub normalize: Normalization,

    /// Feed channels in BGR order
    #[arg(long)]
    pub bgr: bool,

    /// Run on CPU without looking for adapters
    #[arg(long)]
    pub cpu: bool,

    /// Offer software and remote adapters too
    #[arg(long)]
    pub include_software: bool,

    /// Sets the level of verbosity
    #[arg(short, action = ArgAction::Count)]
    pub verbosity: u8,

    /// Anything after the image path is accepted and ignored.
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub extra: Vec<String>,
}

impl CliArgs {
    pub fn log_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "warn,adsel=info,adsel_core=info",
            2 => "warn,adsel=debug,adsel_core=debug",
            _ => "info,adsel=trace,adsel_core=trace",
        }
    }

    pub fn into_parameters(self) -> Parameters {
        if !self.extra.is_empty() {
            debug!("Ignoring extra arguments {:?}", self.extra);
        }
        let labels = self.labels.unwrap_or_else(default_labels_path);
        let mut params = Parameters::new(self.model, self.image, labels);
        params.top_k = self.top;
        params.preprocessing = Preprocessing { normalization: self.normalize, bgr: self.bgr };
        params.include_software = self.include_software;
        params.force_cpu = self.cpu;
        params
    }
}

/// `labels.txt` in the directory holding the executable.
pub fn default_labels_path() -> PathBuf {
    match std::env::current_exe() {
        Ok(exe) => exe.parent().unwrap_or(Path::new(".")).join(LABELS_FILE_NAME),
        Err(e) => {
            warn!(
                "Could not locate the executable ({e}), looking for labels in the working directory"
            );
            PathBuf::from(LABELS_FILE_NAME)
        }
    }
}
