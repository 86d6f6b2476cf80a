//! Pick a graphics adapter, classify one image with an ONNX model on it.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use adsel_core::adapter::{self, WgpuSource};
//! use adsel_core::device::{self, ComputeDevice};
//!
//! let adapters = adapter::enumerate(&WgpuSource::default(), true);
//! let device = device::select(&adapters, &mut std::io::stdin().lock(), &mut std::io::stdout())?;
//! # let _: ComputeDevice = device;
//! # Ok(())
//! # }
//! ```
#[macro_use]
extern crate log;

pub mod adapter;
pub mod device;
pub mod frame;
pub mod inference;
pub mod labels;
pub mod pipeline;
pub mod report;

pub use adapter::{AdapterDescriptor, AdapterSource, WgpuSource};
pub use device::ComputeDevice;
pub use frame::ImageFrame;
pub use inference::{ModelLoader, Normalization, OnnxLoader, Preprocessing};
pub use labels::LabelTable;
pub use pipeline::Parameters;
pub use report::ScoreVector;
