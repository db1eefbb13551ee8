//! Fluid Compute Demo Library
//!
//! Compute-shader pipeline orchestration over Vulkan:
//! - Typed program interfaces (binding slots + push-constant layouts)
//! - Compute programs owning pipeline, binding set and uniform block
//! - The stable-fluids pass graph with explicit resource dependencies
//! - The two-semaphore compute/graphics frame handshake
//!
//! Device-touching code is confined to [`vulkan`]; everything above it
//! goes through the [`context::FrameworkContext`] seam, which the
//! [`capture`] backend also implements so the whole orchestration surface
//! runs without a GPU.

pub mod binding;
pub mod capture;
pub mod context;
pub mod error;
pub mod graph;
pub mod interface;
pub mod program;
pub mod sync;
pub mod uniform;
pub mod vulkan;

pub use binding::{BindingDesc, BindingKind, BindingList};
pub use context::{ComputeEncoder, FrameworkContext, GpuTexture, PoolRequirements};
pub use error::{ComputeError, CrateResult};
pub use graph::{FluidConfig, FluidGraph, FluidTargets, PassId};
pub use interface::{InterfaceRegistry, ProgramInterface};
pub use program::ComputeProgram;
pub use sync::{FrameOrchestrator, FrameState, FrameSync};
pub use uniform::{UniformBlock, UniformLayout, UniformSet, UniformType};
