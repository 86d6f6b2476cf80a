use std::fmt;
use std::io::{BufRead, Write};

use anyhow::{Context, Result, bail};
use tract_core::internal::*;

use crate::adapter::AdapterDescriptor;

/// Where the model is evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeDevice {
    Cpu,
    Adapter(AdapterDescriptor),
}

impl ComputeDevice {
    pub fn adapter(&self) -> Option<&AdapterDescriptor> {
        match self {
            ComputeDevice::Cpu => None,
            ComputeDevice::Adapter(a) => Some(a),
        }
    }

    /// Rewrites the model for the device kernels, when tract has some for it.
    ///
    /// Returns false when the model is left for the CPU.
    pub fn accelerate(&self, model: &mut TypedModel) -> TractResult<bool> {
        let Some(adapter) = self.adapter() else { return Ok(false) };
        #[cfg(all(feature = "metal", any(target_os = "macos", target_os = "ios")))]
        if adapter.info.backend == "Metal" {
            use tract_core::transform::ModelTransform;
            tract_metal::MetalTransform::default().transform(model)?;
            return Ok(true);
        }
        let _ = model;
        warn!(
            "No tract kernels for {} adapter {}, evaluating on CPU",
            adapter.info.backend,
            adapter.description()
        );
        Ok(false)
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "CPU"),
            ComputeDevice::Adapter(a) => write!(f, "adapter {} ({})", a.index, a.description()),
        }
    }
}

/// Picks the compute device, asking the user when there is a choice.
///
/// The adapter list is printed, then lines are read from `input` until one holds
/// an index in `0..adapters.len()`. With no adapter, nothing is read.
pub fn select(
    adapters: &[AdapterDescriptor],
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> Result<ComputeDevice> {
    if adapters.is_empty() {
        writeln!(output, "There are no available adapters, running on CPU...")?;
        return Ok(ComputeDevice::Cpu);
    }
    for adapter in adapters {
        writeln!(output, "{adapter}")?;
    }
    writeln!(output, "Please enter the index of the adapter you want to use...")?;
    output.flush()?;
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line).context("Reading adapter index")? == 0 {
            bail!("Input closed before a valid adapter index was entered");
        }
        match parse_index(&line, adapters.len()) {
            Some(ix) => {
                writeln!(output, "Selected adapter at index {ix}")?;
                return Ok(ComputeDevice::Adapter(adapters[ix].clone()));
            }
            None => {
                debug!("Rejected adapter index {:?}", line.trim());
                writeln!(output, "Invalid index, please try again.")?;
                output.flush()?;
            }
        }
    }
}

fn parse_index(line: &str, len: usize) -> Option<usize> {
    line.trim().parse::<usize>().ok().filter(|ix| *ix < len)
}
