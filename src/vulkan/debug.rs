//! Debug-marker capability
//!
//! Wraps the optional `VK_EXT_debug_utils` command-label entry points as
//! an explicit capability object. Resolved once at device init and passed
//! by reference to whoever wants to emit labeled regions; when the
//! extension is absent every call is a no-op.

use std::ffi::CStr;

use ash::vk;

/// Optional debug-label recording
pub struct DebugMarkers {
    fns: Option<ash::ext::debug_utils::Device>,
}

impl DebugMarkers {
    /// Resolve the entry points; only valid when the instance enabled
    /// `VK_EXT_debug_utils`.
    pub fn new(instance: &ash::Instance, device: &ash::Device) -> Self {
        Self {
            fns: Some(ash::ext::debug_utils::Device::new(instance, device)),
        }
    }

    /// Capability absent; every call no-ops.
    pub fn disabled() -> Self {
        Self { fns: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.fns.is_some()
    }

    /// Open a labeled region in `command_buffer`.
    pub fn begin_region(&self, command_buffer: vk::CommandBuffer, name: &CStr) {
        if let Some(fns) = &self.fns {
            let label = vk::DebugUtilsLabelEXT::default().label_name(name);
            unsafe { fns.cmd_begin_debug_utils_label(command_buffer, &label) };
        }
    }

    /// Close the innermost labeled region.
    pub fn end_region(&self, command_buffer: vk::CommandBuffer) {
        if let Some(fns) = &self.fns {
            unsafe { fns.cmd_end_debug_utils_label(command_buffer) };
        }
    }
}
