//! Adapter and device acquisition.

use anyhow::{anyhow, Result};
use tracing::info;

/// Logical device, its queue and the adapter it was created on.
pub struct GpuDevice {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuDevice {
    /// Picks an adapter that can present to `surface` and opens a device on it.
    pub fn new(instance: &wgpu::Instance, surface: &wgpu::Surface<'_>) -> Result<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| anyhow!("No adapter can present to the window: {:?}", e))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("vgl device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))?;

        let info = adapter.get_info();
        info!(adapter = %info.name, backend = ?info.backend, "GPU device ready");

        Ok(Self { adapter, device, queue })
    }
}
