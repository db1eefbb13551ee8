//! Framework seam implementation over a raw Vulkan device
//!
//! [`AshFramework`] owns the resources every compute program shares: the
//! descriptor pool (sized up front from the programs' summed slot
//! counts), the pipeline cache, and the shader search path. It must
//! outlive every program built against it.

use std::path::PathBuf;

use ash::vk;

use crate::binding::{BindingDesc, BindingList};
use crate::context::{FrameworkContext, GpuTexture, PoolRequirements};
use crate::error::{ComputeError, CrateResult};

/// Shared Vulkan resources behind the [`FrameworkContext`] seam
pub struct AshFramework {
    device: ash::Device,
    descriptor_pool: vk::DescriptorPool,
    pipeline_cache: vk::PipelineCache,
    shader_dir: PathBuf,
}

impl AshFramework {
    /// Create the shared pool and cache.
    ///
    /// `requirements` must cover every program that will ever allocate
    /// from this framework; an undersized pool fails allocation at
    /// program construction, which is fatal by design.
    pub fn new(
        device: ash::Device,
        requirements: PoolRequirements,
        shader_dir: impl Into<PathBuf>,
    ) -> CrateResult<Self> {
        let pool_sizes = requirements.pool_sizes();
        let descriptor_pool = unsafe {
            device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(requirements.binding_sets)
                    .pool_sizes(&pool_sizes),
                None,
            )?
        };

        let pipeline_cache = match unsafe {
            device.create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None)
        } {
            Ok(cache) => cache,
            Err(err) => {
                unsafe { device.destroy_descriptor_pool(descriptor_pool, None) };
                return Err(err.into());
            }
        };

        Ok(Self {
            device,
            descriptor_pool,
            pipeline_cache,
            shader_dir: shader_dir.into(),
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Path convention: `<shader_dir>/<name>.comp.spv`
    fn shader_path(&self, name: &str) -> PathBuf {
        self.shader_dir.join(format!("{name}.comp.spv"))
    }
}

impl FrameworkContext for AshFramework {
    fn create_binding_set_layout(
        &self,
        bindings: &BindingList,
    ) -> CrateResult<vk::DescriptorSetLayout> {
        let entries = bindings.set_layout_bindings();

        let layout = unsafe {
            self.device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&entries),
                None,
            )?
        };
        Ok(layout)
    }

    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
        push_constant_size: u32,
    ) -> CrateResult<vk::PipelineLayout> {
        let set_layouts = [set_layout];
        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(push_constant_size)];

        let mut info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        // A zero-sized push-constant range is invalid; omit the range
        // entirely for programs without uniforms.
        if push_constant_size > 0 {
            info = info.push_constant_ranges(&push_constant_ranges);
        }

        let layout = unsafe { self.device.create_pipeline_layout(&info, None)? };
        Ok(layout)
    }

    fn allocate_binding_set(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> CrateResult<vk::DescriptorSet> {
        let set_layouts = [layout];
        let sets = unsafe {
            self.device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(self.descriptor_pool)
                    .set_layouts(&set_layouts),
            )
        }
        .map_err(|err| match err {
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                ComputeError::DescriptorPoolExhausted(layout)
            }
            other => other.into(),
        })?;
        Ok(sets[0])
    }

    fn write_image_binding(&self, set: vk::DescriptorSet, slot: &BindingDesc, texture: &GpuTexture) {
        let image_info = [texture.descriptor_info()];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(slot.slot)
            .descriptor_type(slot.kind.descriptor_type())
            .image_info(&image_info);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }

    fn create_compute_pipeline(
        &self,
        layout: vk::PipelineLayout,
        shader: &str,
    ) -> CrateResult<vk::Pipeline> {
        let path = self.shader_path(shader);
        let bytes = std::fs::read(&path).map_err(|source| ComputeError::ShaderRead {
            path: path.display().to_string(),
            source,
        })?;
        let code = ash::util::read_spv(&mut std::io::Cursor::new(&bytes)).map_err(|source| {
            ComputeError::ShaderRead {
                path: path.display().to_string(),
                source,
            }
        })?;

        let module = unsafe {
            self.device
                .create_shader_module(&vk::ShaderModuleCreateInfo::default().code(&code), None)?
        };

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");

        let result = unsafe {
            self.device.create_compute_pipelines(
                self.pipeline_cache,
                &[vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout)],
                None,
            )
        };

        // The module is consumed by pipeline creation either way.
        unsafe { self.device.destroy_shader_module(module, None) };

        match result {
            Ok(pipelines) => Ok(pipelines[0]),
            Err((_, err)) => Err(err.into()),
        }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn destroy_binding_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }
}

impl Drop for AshFramework {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_cache(self.pipeline_cache, None);
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
        }
    }
}
