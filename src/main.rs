//! Headless fluid demo: the compute pass graph driven through the
//! two-queue frame handshake, no window required
//!
//! Each frame updates the per-pass parameters and the wandering force
//! jet, re-records the compute sequence when something changed, then
//! submits compute and graphics work linked by the semaphore handshake.
//! The graphics submission carries only the visibility barrier that a
//! windowed renderer would place before sampling the velocity field.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use ash::vk;
use glam::Vec2;
use rand::Rng;

use fluid_compute_demo::{
    sync::compute_write_to_sample_barrier,
    vulkan::{AshComputeEncoder, AshFramework, TargetTexture, VulkanContext},
    FluidConfig, FluidGraph, FluidTargets, FrameOrchestrator,
};

/// A force jet that orbits the grid center with a little jitter, standing
/// in for the pointer input of the windowed version.
struct JetPath {
    previous: Vec2,
    force: f32,
    rng: rand::rngs::ThreadRng,
}

impl JetPath {
    fn new(force: f32) -> Self {
        Self {
            previous: Vec2::new(0.5, 0.5),
            force,
            rng: rand::thread_rng(),
        }
    }

    fn step(&mut self, time: f32) -> (Vec2, Vec2) {
        let angle = time * 0.8;
        let radius = 0.3 + self.rng.gen_range(-0.02..0.02f32);
        let origin = Vec2::new(
            0.5 + radius * angle.cos(),
            0.5 + radius * angle.sin(),
        );
        let vector = (origin - self.previous) * self.force;
        self.previous = origin;
        (origin, vector)
    }
}

fn env_or(name: &str, default: u32) -> Result<u32> {
    match std::env::var(name) {
        Ok(value) => Ok(value.parse()?),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err.into()),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    println!("=== Fluid Compute Demo (headless) ===\n");

    let config = FluidConfig::from_env()?;
    let frames = env_or("FLUID_FRAMES", 240)?;
    let shader_dir =
        std::env::var("FLUID_SHADER_DIR").unwrap_or_else(|_| "shaders".to_string());

    println!(
        "Simulating {}x{} grid, {} Jacobi iterations, {} frames",
        config.width, config.height, config.jacobi_iterations, frames
    );

    let context = VulkanContext::new()?;
    println!("Using device: {}", context.device_name());
    log::debug!(
        "graphics family {}, compute family {}",
        context.graphics_family(),
        context.compute_family()
    );

    // The pool is sized from every pass's interface before any program
    // allocates from it.
    let framework = Arc::new(AshFramework::new(
        context.device().clone(),
        FluidGraph::pool_requirements(),
        shader_dir,
    )?);

    let velocity_a = TargetTexture::new(&context, config.width, config.height, vk::Format::R32G32_SFLOAT)?;
    let velocity_b = TargetTexture::new(&context, config.width, config.height, vk::Format::R32G32_SFLOAT)?;
    let velocity_c = TargetTexture::new(&context, config.width, config.height, vk::Format::R32G32_SFLOAT)?;
    let force = TargetTexture::new(&context, config.width, config.height, vk::Format::R32G32_SFLOAT)?;
    let divergence = TargetTexture::new(&context, config.width, config.height, vk::Format::R32_SFLOAT)?;
    let pressure_a = TargetTexture::new(&context, config.width, config.height, vk::Format::R32_SFLOAT)?;
    let pressure_b = TargetTexture::new(&context, config.width, config.height, vk::Format::R32_SFLOAT)?;

    let targets = FluidTargets {
        velocity_a: velocity_a.handle(),
        velocity_b: velocity_b.handle(),
        velocity_c: velocity_c.handle(),
        force: force.handle(),
        divergence: divergence.handle(),
        pressure_a: pressure_a.handle(),
        pressure_b: pressure_b.handle(),
    };

    let mut graph = FluidGraph::new(framework.clone(), config, targets)?;
    let mut orchestrator = FrameOrchestrator::new(
        context.device(),
        context.graphics_queue(),
        context.compute_queue(),
    )?;

    let (compute_pool, compute_cmd) = context.create_command_buffer(context.compute_family())?;
    let (graphics_pool, graphics_cmd) = context.create_command_buffer(context.graphics_family())?;
    let markers = context.debug_markers();

    // The graphics sequence never changes: just the barrier that makes
    // compute writes visible to fragment-stage sampling.
    unsafe {
        let device = context.device();
        device.begin_command_buffer(graphics_cmd, &vk::CommandBufferBeginInfo::default())?;
        markers.begin_region(graphics_cmd, c"fluid sample barrier");
        device.cmd_pipeline_barrier(
            graphics_cmd,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[compute_write_to_sample_barrier(graph.output().image)],
        );
        markers.end_region(graphics_cmd);
        device.end_command_buffer(graphics_cmd)?;
    }

    let frame_fence =
        unsafe { context.device().create_fence(&vk::FenceCreateInfo::default(), None)? };

    let mut jet = JetPath::new(config.jet_force);
    let mut time = 0.0f32;
    let delta_time = 1.0 / 60.0;
    let started = Instant::now();

    for frame in 0..frames {
        time += delta_time;
        graph.set_frame_params(delta_time, time, frame as i32)?;
        let (origin, vector) = jet.step(time);
        graph.set_jet(origin, vector)?;

        if graph.needs_record() {
            // Never re-record a sequence the GPU may still be consuming.
            orchestrator.wait_compute_idle()?;
            let mut encoder = AshComputeEncoder::begin(context.device(), compute_cmd)?;
            markers.begin_region(compute_cmd, c"fluid step");
            graph.record(&mut encoder)?;
            markers.end_region(compute_cmd);
            encoder.finish()?;
        }

        orchestrator.submit_compute(compute_cmd)?;
        orchestrator.submit_graphics(graphics_cmd, None, None, frame_fence)?;
        orchestrator.finish_frame()?;

        unsafe {
            context.device().wait_for_fences(&[frame_fence], true, u64::MAX)?;
            context.device().reset_fences(&[frame_fence])?;
        }

        if frame % 60 == 0 {
            log::info!("frame {frame}: jet at ({:.2}, {:.2})", origin.x, origin.y);
        }
    }

    orchestrator.wait_idle()?;
    let elapsed = started.elapsed();
    println!(
        "\nSimulated {} frames in {:.2}s ({:.1} fps)",
        frames,
        elapsed.as_secs_f64(),
        frames as f64 / elapsed.as_secs_f64()
    );

    unsafe {
        context.device().destroy_fence(frame_fence, None);
        context.device().destroy_command_pool(compute_pool, None);
        context.device().destroy_command_pool(graphics_pool, None);
    }

    Ok(())
}
