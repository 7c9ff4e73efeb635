//! 在 mock 后端上构建完整的 frame graph，渲染几帧并打印执行计划
//!
//! 用法：`frame_graph_dump [settings.toml]`，不需要 GPU

use std::rc::Rc;

use anyhow::Context;
use ash::vk;
use kestrel_crate_tools::init_log::init_log;
use kestrel_gfx::mock::MockGfxDevice;
use kestrel_render_interface::{
    pipeline_settings::{PipelineSettings, RendererConfig},
    scene::{CameraState, GpuSceneView, SceneSource},
};
use kestrel_renderer::{FrameOutcome, Renderer, render_pipeline::RenderPipelines};

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 1280,
    height: 720,
};
const FRAME_COUNT: usize = 3;

/// 没有几何体的场景，只用于观察 graph 的结构
struct EmptyScene {
    view: GpuSceneView,
}
impl SceneSource for EmptyScene {
    fn camera(&self) -> CameraState {
        CameraState::default()
    }

    fn scene_view(&self) -> &GpuSceneView {
        &self.view
    }
}

fn load_settings() -> anyhow::Result<PipelineSettings> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(PipelineSettings::default());
    };
    let text = std::fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
    PipelineSettings::from_toml_str(&text).with_context(|| format!("invalid settings in {path}"))
}

fn main() -> anyhow::Result<()> {
    init_log();

    let settings = load_settings()?;
    log::info!("pipeline settings:\n{}", settings.to_toml_string()?);

    let device = MockGfxDevice::new();
    let surface = device.create_present_surface(EXTENT, 3);
    let scene = Rc::new(EmptyScene {
        view: GpuSceneView::default(),
    });
    let mut renderer = Renderer::new(
        &device,
        Box::new(surface),
        scene,
        RenderPipelines::placeholder(),
        settings,
        RendererConfig::default(),
    )?;

    for _ in 0..FRAME_COUNT {
        let outcome = renderer.render_frame()?;
        if outcome != FrameOutcome::Presented {
            log::warn!("frame {} was skipped", renderer.frame_id());
        }
    }

    renderer.graph().print_execution_plan();
    log::info!(
        "{} frames, {} commands recorded",
        renderer.frame_id(),
        device.commands().len()
    );

    renderer.destroy()?;
    Ok(())
}
