// Physical device selection
//
// A candidate qualifies when it exposes every required extension, offers at
// least one surface format and present mode for the window surface, and has
// queue families for graphics and presentation. The first qualifying device
// in enumeration order wins; if none qualifies we fall back to device 0 and
// let logical device creation report the problem.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;

use super::api::InstanceApi;

/// Queue family indices used by the renderer. They may be equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Outcome of device selection.
#[derive(Debug, Clone, Copy)]
pub struct Selection {
    pub physical_device: vk::PhysicalDevice,
    /// `None` only when the fallback device lacks the required families.
    pub queue_families: Option<QueueFamilyIndices>,
    /// `false` when no candidate passed and device 0 was taken.
    pub suitable: bool,
}

pub fn select_physical_device(
    instance: &dyn InstanceApi,
    surface: vk::SurfaceKHR,
    required_extensions: &[&CStr],
) -> Result<Selection> {
    let devices = instance
        .enumerate_physical_devices()
        .context("Failed to enumerate physical devices")?;

    let first = *devices.first().context("No Vulkan-capable GPU found")?;

    for &candidate in &devices {
        match qualify(instance, candidate, surface, required_extensions) {
            Ok(Some(families)) => {
                return Ok(Selection {
                    physical_device: candidate,
                    queue_families: Some(families),
                    suitable: true,
                });
            }
            Ok(None) => {}
            Err(e) => log::debug!("Skipping candidate {:?}: {:#}", candidate, e),
        }
    }

    log::warn!("No GPU satisfies every requirement, falling back to the first device");
    let queue_families = find_queue_families(instance, first, surface).unwrap_or_else(|e| {
        log::debug!("Queue family query failed on {:?}: {:#}", first, e);
        None
    });
    Ok(Selection {
        physical_device: first,
        queue_families,
        suitable: false,
    })
}

/// Queue families of `candidate` if it passes every check.
fn qualify(
    instance: &dyn InstanceApi,
    candidate: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    required_extensions: &[&CStr],
) -> Result<Option<QueueFamilyIndices>> {
    let extensions = supports_extensions(instance, candidate, required_extensions)?;
    let surface_ok = surface_adequate(instance, candidate, surface)?;
    let families = find_queue_families(instance, candidate, surface)?;

    log::debug!(
        "Candidate {:?}: extensions={} surface={} queues={:?}",
        candidate,
        extensions,
        surface_ok,
        families
    );

    Ok(families.filter(|_| extensions && surface_ok))
}

/// Every required extension must appear by exact name.
fn supports_extensions(
    instance: &dyn InstanceApi,
    physical_device: vk::PhysicalDevice,
    required: &[&CStr],
) -> Result<bool> {
    let available = instance.device_extension_names(physical_device)?;
    Ok(required.iter().all(|name| {
        let name = name.to_string_lossy();
        available.iter().any(|ext| *ext == name)
    }))
}

fn surface_adequate(
    instance: &dyn InstanceApi,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<bool> {
    let formats = instance.surface_formats(physical_device, surface)?;
    let present_modes = instance.surface_present_modes(physical_device, surface)?;
    Ok(!formats.is_empty() && !present_modes.is_empty())
}

/// Prefers one family that does both; otherwise the first of each.
pub fn find_queue_families(
    instance: &dyn InstanceApi,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<Option<QueueFamilyIndices>> {
    let families = instance.queue_family_properties(physical_device);

    let mut graphics = None;
    let mut present = None;

    for (index, props) in families.iter().enumerate() {
        let index = index as u32;
        let has_graphics =
            props.queue_count > 0 && props.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_present = instance.surface_support(physical_device, index, surface)?;

        if has_graphics && has_present {
            return Ok(Some(QueueFamilyIndices {
                graphics: index,
                present: index,
            }));
        }
        if has_graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if has_present && present.is_none() {
            present = Some(index);
        }
    }

    Ok(graphics
        .zip(present)
        .map(|(graphics, present)| QueueFamilyIndices { graphics, present }))
}
