use std::io::Write;

use anyhow::Result;
use tract_core::internal::*;

use crate::labels::LabelTable;

pub const DEFAULT_TOP_K: usize = 3;

/// One score per output class, indexed by class id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    pub fn from_tensor(tensor: &Tensor) -> TractResult<ScoreVector> {
        let scores = tensor.cast_to::<f32>()?;
        Ok(ScoreVector(scores.as_slice::<f32>()?.to_vec()))
    }

    pub fn scores(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// (class, score) pairs, best first. Equal scores keep class order.
    pub fn ranked(&self) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self.0.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

impl From<Vec<f32>> for ScoreVector {
    fn from(scores: Vec<f32>) -> ScoreVector {
        ScoreVector(scores)
    }
}

/// Prints the `top_k` best classes with their label.
pub fn report(
    scores: &ScoreVector,
    labels: &LabelTable,
    top_k: usize,
    output: &mut dyn Write,
) -> Result<()> {
    for (class, score) in scores.ranked().into_iter().take(top_k) {
        let placeholder;
        let label = match labels.get(class) {
            Some(label) => label,
            None => {
                warn!("No label for class {class}");
                placeholder = format!("<unlabeled class {class}>");
                placeholder.as_str()
            }
        };
        writeln!(output, "{label} with confidence of {score:.6}")?;
    }
    Ok(())
}
