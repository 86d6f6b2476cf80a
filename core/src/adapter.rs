//! Graphics adapter enumeration.
//!
//! Adapters come from an [`AdapterSource`], in system order. The descriptors
//! handed to the rest of the program carry an index that is contiguous over the
//! list the user actually sees, so the number displayed is the number typed.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use anyhow::{Result, anyhow};

/// Position of an adapter in the unfiltered system enumeration.
///
/// Stable for the lifetime of a run and never renumbered by filtering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AdapterId(pub usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AdapterKind {
    Discrete,
    Integrated,
    /// Hosted or forwarded adapter (remote display, virtual machine passthrough).
    Remote,
    /// Software rasterizer (WARP, llvmpipe, SwiftShader...).
    Software,
    Other,
}

impl AdapterKind {
    pub fn is_usable(&self) -> bool {
        !matches!(self, AdapterKind::Remote | AdapterKind::Software)
    }
}

impl From<wgpu::DeviceType> for AdapterKind {
    fn from(dt: wgpu::DeviceType) -> AdapterKind {
        match dt {
            wgpu::DeviceType::DiscreteGpu => AdapterKind::Discrete,
            wgpu::DeviceType::IntegratedGpu => AdapterKind::Integrated,
            wgpu::DeviceType::VirtualGpu => AdapterKind::Remote,
            wgpu::DeviceType::Cpu => AdapterKind::Software,
            wgpu::DeviceType::Other => AdapterKind::Other,
        }
    }
}

/// What the platform reports about one adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterInfo {
    pub name: String,
    pub kind: AdapterKind,
    pub backend: String,
    pub vendor: u32,
    pub device: u32,
    pub driver: String,
}

impl AdapterInfo {
    pub fn new(name: impl Into<String>, kind: AdapterKind) -> AdapterInfo {
        AdapterInfo {
            name: name.into(),
            kind,
            backend: String::new(),
            vendor: 0,
            device: 0,
            driver: String::new(),
        }
    }

    /// Lower is better. Native APIs first, GL last.
    fn backend_rank(&self) -> usize {
        match self.backend.as_str() {
            "Dx12" | "Metal" => 0,
            "Vulkan" => 1,
            "Gl" => 2,
            _ => 3,
        }
    }

    /// Same physical adapter seen through another backend.
    fn same_hardware(&self, other: &AdapterInfo) -> bool {
        self.vendor == other.vendor && self.device == other.device && self.name == other.name
    }
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(info: wgpu::AdapterInfo) -> AdapterInfo {
        AdapterInfo {
            name: info.name,
            kind: info.device_type.into(),
            backend: format!("{:?}", info.backend),
            vendor: info.vendor,
            device: info.device,
            driver: info.driver,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterDescriptor {
    pub index: usize,
    pub id: AdapterId,
    pub info: AdapterInfo,
}

impl AdapterDescriptor {
    pub fn description(&self) -> &str {
        &self.info.name
    }

    pub fn is_usable(&self) -> bool {
        self.info.kind.is_usable()
    }
}

impl fmt::Display for AdapterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Index: {}, Description: {}", self.index, self.description())
    }
}

/// Platform seam for adapter enumeration.
pub trait AdapterSource {
    fn adapters(&self) -> Result<Vec<AdapterInfo>>;
}

/// Enumerates adapters through every wgpu backend compiled in.
#[derive(Debug, Clone)]
pub struct WgpuSource {
    pub backends: wgpu::Backends,
}

impl Default for WgpuSource {
    fn default() -> WgpuSource {
        WgpuSource { backends: wgpu::Backends::all() }
    }
}

impl AdapterSource for WgpuSource {
    fn adapters(&self) -> Result<Vec<AdapterInfo>> {
        // Some drivers panic while being probed. Treat that as a failed enumeration.
        panic::catch_unwind(AssertUnwindSafe(|| {
            let instance = wgpu::Instance::default();
            instance
                .enumerate_adapters(self.backends)
                .into_iter()
                .map(|adapter| AdapterInfo::from(adapter.get_info()))
                .collect::<Vec<_>>()
        }))
        .map_err(|_| anyhow!("wgpu panicked during adapter enumeration"))
    }
}

/// Lists adapters in system order, optionally dropping software and remote ones.
///
/// An adapter reachable through several backends is listed once, through the
/// preferred backend. Never fails: an enumeration error yields an empty list,
/// which the caller turns into the CPU fallback.
pub fn enumerate(
    source: &dyn AdapterSource,
    exclude_software_and_remote: bool,
) -> Vec<AdapterDescriptor> {
    let infos = match source.adapters() {
        Ok(infos) => infos,
        Err(e) => {
            warn!("Adapter enumeration failed, continuing without adapters: {e:#}");
            return vec![];
        }
    };
    let all = dedup_backends(infos);
    for adapter in &all {
        debug!(
            "Found adapter {:?}: {} ({:?}, {}, vendor 0x{:04x}, driver {:?})",
            adapter.id,
            adapter.description(),
            adapter.info.kind,
            adapter.info.backend,
            adapter.info.vendor,
            adapter.info.driver
        );
    }
    if exclude_software_and_remote { filter_usable(all) } else { all }
}

/// Merges entries naming the same hardware, keeping the best ranked backend.
/// The merged entry takes the slot of the first one seen; ids stay the
/// positions in the raw enumeration.
fn dedup_backends(infos: Vec<AdapterInfo>) -> Vec<AdapterDescriptor> {
    let mut kept: Vec<AdapterDescriptor> = vec![];
    for (ix, info) in infos.into_iter().enumerate() {
        match kept.iter_mut().find(|k| k.info.same_hardware(&info)) {
            Some(k) => {
                debug!("{} is also exposed through {}", info.name, info.backend);
                if info.backend_rank() < k.info.backend_rank() {
                    k.id = AdapterId(ix);
                    k.info = info;
                }
            }
            None => kept.push(AdapterDescriptor { index: kept.len(), id: AdapterId(ix), info }),
        }
    }
    kept
}

/// Drops software and remote adapters and renumbers the rest contiguously.
pub fn filter_usable(adapters: Vec<AdapterDescriptor>) -> Vec<AdapterDescriptor> {
    adapters
        .into_iter()
        .filter(|a| {
            if !a.is_usable() {
                info!("Skipping {:?} adapter {}", a.info.kind, a.description());
            }
            a.is_usable()
        })
        .enumerate()
        .map(|(ix, a)| AdapterDescriptor { index: ix, ..a })
        .collect()
}
