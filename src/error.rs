//! Error types for the library

use thiserror::Error;

/// Error types for the fluid compute demo
///
/// Configuration errors (unknown names, bad layouts, non-dense slots)
/// indicate a mismatch between a program's declared interface and its
/// shader. They are reported at the call that introduced them and are
/// never silently ignored.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Environment variable error: {0}")]
    VarError(#[from] std::env::VarError),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnvValue { name: String, value: String },

    #[error("No suitable Vulkan device found among {0} devices")]
    NoVulkanDevice(usize),

    #[error("Failed to find compute queue family")]
    NoComputeQueue,

    #[error("Failed to find graphics queue family")]
    NoGraphicsQueue,

    #[error("Program `{program}` has no uniform named `{name}`")]
    UnknownUniform { program: String, name: String },

    #[error("Uniform `{name}` is a {expected:?}, not a {requested:?}")]
    UniformTypeMismatch {
        name: String,
        expected: crate::uniform::UniformType,
        requested: crate::uniform::UniformType,
    },

    #[error(
        "Uniform `{name}` at byte offset {offset} breaks the running-sum layout (expected {expected})"
    )]
    NonContiguousUniform {
        name: String,
        offset: u32,
        expected: u32,
    },

    #[error("Uniform `{name}` at byte offset {offset} is not aligned to {align} bytes")]
    MisalignedUniform {
        name: String,
        offset: u32,
        align: u32,
    },

    #[error("Duplicate uniform name `{0}`")]
    DuplicateUniform(String),

    #[error("Program `{program}` has no binding slot named `{name}`")]
    UnknownBindingSlot { program: String, name: String },

    #[error("Duplicate binding slot name `{0}`")]
    DuplicateBindingSlot(String),

    #[error(
        "Binding slot `{name}` has index {slot}, expected {expected} (slots must be dense and in declaration order)"
    )]
    NonDenseBindingSlot {
        name: String,
        slot: u32,
        expected: u32,
    },

    #[error("Fluid resolution {width}x{height} is not a multiple of the {granularity}x{granularity} workgroup size")]
    InvalidResolution {
        width: u32,
        height: u32,
        granularity: u32,
    },

    #[error("Pipeline for program `{0}` has not been created yet")]
    PipelineNotCreated(String),

    #[error("Descriptor pool exhausted while allocating a binding set for layout {0:?}")]
    DescriptorPoolExhausted(ash::vk::DescriptorSetLayout),

    #[error("Frame sync used out of order: cannot {operation} while {state:?}")]
    FrameOutOfOrder {
        operation: &'static str,
        state: crate::sync::FrameState,
    },

    #[error("Failed to read shader `{path}`: {source}")]
    ShaderRead {
        path: String,
        source: std::io::Error,
    },

    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    #[error("Vulkan loading error: {0}")]
    VulkanLoading(#[from] ash::LoadingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Convenience type alias for Results with [`ComputeError`]
pub type CrateResult<T> = std::result::Result<T, ComputeError>;
