//! Headless instance and device bringup for the demo binary
//!
//! Creates a Vulkan instance, picks the first physical device, and opens
//! a logical device with a graphics-capable queue and a compute queue
//! (a dedicated compute family when one exists, so the two-queue
//! handshake actually crosses queues on hardware that supports it).

use std::ffi::CStr;

use ash::{vk, Entry, Instance};

use crate::error::{ComputeError, CrateResult};

use super::debug::DebugMarkers;

/// The Vulkan objects everything else borrows from
pub struct VulkanContext {
    _entry: Entry,
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_family: u32,
    compute_family: u32,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device_name: String,
    debug_utils_enabled: bool,
}

impl VulkanContext {
    /// Load Vulkan and open a headless device.
    pub fn new() -> CrateResult<Self> {
        unsafe {
            let entry = Entry::load()?;

            let app_info = vk::ApplicationInfo::default()
                .application_name(c"Fluid Compute Demo")
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"fluid-compute-demo")
                .engine_version(vk::make_api_version(0, 1, 0, 0))
                .api_version(vk::API_VERSION_1_1);

            // Enable debug utils when the loader offers it; the capability
            // object below stays inert otherwise.
            let available_extensions = entry.enumerate_instance_extension_properties(None)?;
            let debug_utils_enabled = available_extensions.iter().any(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr()) == ash::ext::debug_utils::NAME
            });
            let mut extension_names = Vec::new();
            if debug_utils_enabled {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            let instance = entry.create_instance(
                &vk::InstanceCreateInfo::default()
                    .application_info(&app_info)
                    .enabled_extension_names(&extension_names),
                None,
            )?;

            let physical_devices = instance.enumerate_physical_devices()?;
            let device_count = physical_devices.len();
            let physical_device = physical_devices
                .into_iter()
                .next()
                .ok_or(ComputeError::NoVulkanDevice(device_count))?;

            let properties = instance.get_physical_device_properties(physical_device);
            let device_name = CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .to_string();
            let memory_properties = instance.get_physical_device_memory_properties(physical_device);

            let queue_families =
                instance.get_physical_device_queue_family_properties(physical_device);

            let graphics_family = queue_families
                .iter()
                .enumerate()
                .find(|(_, props)| props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|(idx, _)| idx as u32)
                .ok_or(ComputeError::NoGraphicsQueue)?;

            // Prefer a compute-only family; fall back to any compute-capable
            // one (possibly the graphics family itself).
            let compute_family = queue_families
                .iter()
                .enumerate()
                .find(|(_, props)| {
                    props.queue_flags.contains(vk::QueueFlags::COMPUTE)
                        && !props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                })
                .or_else(|| {
                    queue_families
                        .iter()
                        .enumerate()
                        .find(|(_, props)| props.queue_flags.contains(vk::QueueFlags::COMPUTE))
                })
                .map(|(idx, _)| idx as u32)
                .ok_or(ComputeError::NoComputeQueue)?;

            let queue_priorities = [1.0];
            let mut queue_infos = vec![vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_family)
                .queue_priorities(&queue_priorities)];
            if compute_family != graphics_family {
                queue_infos.push(
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(compute_family)
                        .queue_priorities(&queue_priorities),
                );
            }

            let device_features = vk::PhysicalDeviceFeatures::default();
            let device = instance.create_device(
                physical_device,
                &vk::DeviceCreateInfo::default()
                    .queue_create_infos(&queue_infos)
                    .enabled_features(&device_features),
                None,
            )?;

            let graphics_queue = device.get_device_queue(graphics_family, 0);
            let compute_queue = device.get_device_queue(compute_family, 0);

            Ok(Self {
                _entry: entry,
                instance,
                physical_device,
                device,
                graphics_family,
                compute_family,
                graphics_queue,
                compute_queue,
                memory_properties,
                device_name,
                debug_utils_enabled,
            })
        }
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    pub fn compute_family(&self) -> u32 {
        self.compute_family
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Debug-marker capability resolved at device init; no global state.
    pub fn debug_markers(&self) -> DebugMarkers {
        if self.debug_utils_enabled {
            DebugMarkers::new(&self.instance, &self.device)
        } else {
            DebugMarkers::disabled()
        }
    }

    /// Find a memory type matching `type_filter` with the given properties.
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> CrateResult<u32> {
        (0..self.memory_properties.memory_type_count)
            .find(|&i| {
                (type_filter & (1 << i)) != 0
                    && self.memory_properties.memory_types[i as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or_else(|| ComputeError::Other("Failed to find suitable memory type".to_string()))
    }

    /// Create a resettable command pool on `family` with one primary
    /// command buffer.
    pub fn create_command_buffer(
        &self,
        family: u32,
    ) -> CrateResult<(vk::CommandPool, vk::CommandBuffer)> {
        unsafe {
            let pool = self.device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                    .queue_family_index(family),
                None,
            )?;

            let buffers = self.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            );
            match buffers {
                Ok(buffers) => Ok((pool, buffers[0])),
                Err(err) => {
                    self.device.destroy_command_pool(pool, None);
                    Err(err.into())
                }
            }
        }
    }

    /// Record `record` into a transient command buffer, submit it on the
    /// graphics queue, and wait for completion.
    pub fn submit_one_shot(
        &self,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> CrateResult<()> {
        unsafe {
            let (pool, command_buffer) = self.create_command_buffer(self.graphics_family)?;

            let result = (|| -> CrateResult<()> {
                self.device.begin_command_buffer(
                    command_buffer,
                    &vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )?;
                record(&self.device, command_buffer);
                self.device.end_command_buffer(command_buffer)?;

                let command_buffers = [command_buffer];
                self.device.queue_submit(
                    self.graphics_queue,
                    &[vk::SubmitInfo::default().command_buffers(&command_buffers)],
                    vk::Fence::null(),
                )?;
                self.device.queue_wait_idle(self.graphics_queue)?;
                Ok(())
            })();

            self.device.destroy_command_pool(pool, None);
            result
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
