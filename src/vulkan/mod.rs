//! Vulkan backend - the framework seam implemented over raw Vulkan via ash
//!
//! Everything device-touching lives here: the [`AshFramework`] the
//! programs allocate through, the [`AshComputeEncoder`] they record into,
//! headless instance/device bringup for the demo binary, compute target
//! textures, and the debug-marker capability object.

pub mod debug;
pub mod device;
pub mod encoder;
pub mod framework;
pub mod texture;

pub use debug::DebugMarkers;
pub use device::VulkanContext;
pub use encoder::AshComputeEncoder;
pub use framework::AshFramework;
pub use texture::TargetTexture;
