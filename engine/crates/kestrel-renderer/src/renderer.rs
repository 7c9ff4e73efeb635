use std::rc::Rc;

use ash::vk;
use itertools::Itertools;
use kestrel_gfx::{
    device::GfxDevice,
    swapchain::{GfxPresentResult, GfxPresentSurface},
};
use kestrel_render_graph::{RenderGraph, RgFrameContext};
use kestrel_render_interface::{
    frame_counter::FrameCounter,
    pipeline_settings::{FrameSettings, PipelineSettings, RendererConfig},
    scene::SceneSource,
};

use crate::{
    error::{RendererError, RendererResult},
    fif::FifManager,
    render_pipeline::{
        RenderPipelines,
        frame_graph::{FrameGraphBuilder, FrameGraphInputs},
        resource_names as names,
    },
    render_present::RenderPresent,
};

/// 一次 `render_frame` 的结果
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// 命令已提交，image 已交给呈现引擎
    Presented,
    /// 本帧没有提交任何工作（表面过期、窗口最小化）
    Skipped,
}

/// 帧循环：acquire → 等待 slot → 写入 PerFrameData → 录制 graph → submit → present
pub struct Renderer<'d> {
    device: &'d dyn GfxDevice,

    present: RenderPresent,
    fif: FifManager,
    graph: RenderGraph<'static>,

    scene: Rc<dyn SceneSource>,
    pipelines: RenderPipelines,
    settings: PipelineSettings,
    frame_settings: FrameSettings,

    /// 等到下一帧开始时再处理的尺寸变化
    pending_extent: Option<vk::Extent2D>,
}

// new & init
impl<'d> Renderer<'d> {
    pub fn new(
        device: &'d dyn GfxDevice,
        surface: Box<dyn GfxPresentSurface>,
        scene: Rc<dyn SceneSource>,
        pipelines: RenderPipelines,
        settings: PipelineSettings,
        config: RendererConfig,
    ) -> RendererResult<Self> {
        let present = RenderPresent::new(device, surface)?;
        let fif = FifManager::new(device, FrameCounter::new(0, config.fif_count))?;
        let frame_settings = FrameSettings::new(present.extent());
        let graph = Self::build_graph(device, &scene, pipelines, settings, frame_settings, &present, &fif)?;

        Ok(Self {
            device,
            present,
            fif,
            graph,
            scene,
            pipelines,
            settings,
            frame_settings,
            pending_extent: None,
        })
    }

    fn build_graph(
        device: &dyn GfxDevice,
        scene: &Rc<dyn SceneSource>,
        pipelines: RenderPipelines,
        settings: PipelineSettings,
        frame_settings: FrameSettings,
        present: &RenderPresent,
        fif: &FifManager,
    ) -> RendererResult<RenderGraph<'static>> {
        let inputs = Rc::new(FrameGraphInputs {
            scene: scene.clone(),
            pipelines,
            settings,
            per_frame_data: fif.per_frame_data_addresses(),
        });
        let mut graph = FrameGraphBuilder::new(inputs, frame_settings, present.format()).build()?;
        graph.compile(device)?;
        Ok(graph)
    }

    pub fn destroy(self) -> RendererResult<()> {
        let device = self.device;
        device.wait_idle()?;
        self.graph.destroy(device);
        self.fif.destroy(device)?;
        self.present.destroy(device);
        log::info!("renderer destroyed");
        Ok(())
    }
}

// getters
impl Renderer<'_> {
    #[inline]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[inline]
    pub fn frame_settings(&self) -> &FrameSettings {
        &self.frame_settings
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.fif.frame_id()
    }

    #[inline]
    pub fn graph(&self) -> &RenderGraph<'static> {
        &self.graph
    }

    #[inline]
    pub fn fif(&self) -> &FifManager {
        &self.fif
    }

    #[inline]
    pub fn present(&self) -> &RenderPresent {
        &self.present
    }
}

// frame
impl Renderer<'_> {
    /// 渲染并呈现一帧
    ///
    /// 表面过期时排空 GPU、重建表面并以新尺寸重新编译 graph，本帧跳过
    pub fn render_frame(&mut self) -> RendererResult<FrameOutcome> {
        let _span = kestrel_crate_tools::profile_span!("Renderer::render_frame");
        let device = self.device;

        if let Some(extent) = self.pending_extent {
            if extent.width == 0 || extent.height == 0 {
                log::debug!("render frame skipped: zero sized surface");
                return Ok(FrameOutcome::Skipped);
            }
            self.pending_extent = None;
            self.rebuild_surface(extent)?;
        } else if self.present.is_stale() {
            self.rebuild_surface(self.present.extent())?;
        }

        let Some(image_index) = self.present.acquire_image(device)? else {
            self.rebuild_surface(self.present.extent())?;
            return Ok(FrameOutcome::Skipped);
        };

        let slot = self.fif.begin_frame(device)?;
        let extent = self.frame_settings.frame_extent;
        self.fif.write_per_frame_data(
            device,
            &self.scene.camera(),
            self.scene.model_transform(),
            &self.settings,
            extent,
        )?;

        let Some(swapchain_image) = self.present.current_image() else {
            self.fif.abandon_frame(device)?;
            return Ok(FrameOutcome::Skipped);
        };
        let frame = RgFrameContext::new(self.fif.frame_id(), slot, extent)
            .with_profiling(self.settings.profiling_enabled)
            .with_external(names::SWAPCHAIN, swapchain_image);

        let recorded = {
            let mut cmd = device.command_recorder(self.fif.current_slot().command_buffer());
            self.graph.execute(cmd.as_mut(), &frame)
        };
        if let Err(e) = recorded {
            log::error!("frame {} recording failed: {e}", self.fif.frame_id());
            self.fif.abandon_frame(device)?;
            return Err(e.into());
        }
        if frame.profiling {
            self.graph.stats().log_summary();
        }

        let signal = self.present.current_render_complete_semaphore().copied().into_iter().collect_vec();
        self.fif.submit(device, &signal)?;
        let result = self.present.present_image()?;
        log::trace!("frame {} presented on image {image_index}: {result:?}", self.fif.frame_id());

        self.fif.advance();
        kestrel_crate_tools::profile_frame_mark();

        Ok(match result {
            GfxPresentResult::OutOfDate => FrameOutcome::Skipped,
            _ => FrameOutcome::Presented,
        })
    }

    /// 记录新的表面尺寸，在下一帧开始时生效
    pub fn resize(&mut self, extent: vk::Extent2D) {
        if extent == self.frame_settings.frame_extent && !self.present.is_stale() {
            self.pending_extent = None;
            return;
        }
        log::info!("resize requested: {}x{}", extent.width, extent.height);
        self.pending_extent = Some(extent);
    }

    /// 排空 GPU，重建表面，以表面的实际尺寸重新编译 graph
    fn rebuild_surface(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        let _span = kestrel_crate_tools::profile_span!("Renderer::rebuild_surface");
        let device = self.device;

        self.fif.wait_all(device)?;
        self.present.rebuild_after_resized(device, extent)?;

        let new_extent = self.present.extent();
        self.frame_settings.frame_extent = new_extent;
        self.graph.recompile(device, new_extent)?;
        log::info!("render graph recompiled for {}x{}", new_extent.width, new_extent.height);
        Ok(())
    }
}

// settings
impl Renderer<'_> {
    /// 替换管线设置
    ///
    /// 设置决定了 graph 的资源与 pass，因此旧的 graph 在 GPU 空闲后被整体替换
    pub fn set_settings(&mut self, settings: PipelineSettings) -> RendererResult<()> {
        if settings == self.settings {
            return Ok(());
        }
        let device = self.device;
        self.fif.wait_all(device)?;
        device.wait_idle()?;

        let graph = Self::build_graph(
            device,
            &self.scene,
            self.pipelines,
            settings,
            self.frame_settings,
            &self.present,
            &self.fif,
        )?;
        let old_graph = std::mem::replace(&mut self.graph, graph);
        old_graph.destroy(device);
        self.settings = settings;

        log::info!("pipeline settings applied: [{}]", self.graph.execution_order_names().join(", "));
        Ok(())
    }

    /// 从 TOML 文本加载设置，缺失的字段使用默认值
    pub fn apply_settings_toml(&mut self, text: &str) -> RendererResult<()> {
        let settings = PipelineSettings::from_toml_str(text).map_err(|e| RendererError::Settings(e.to_string()))?;
        self.set_settings(settings)
    }
}

#[cfg(test)]
mod tests {
    use kestrel_gfx::mock::{MockEvent, MockGfxDevice, MockPresentSurface};

    use super::*;
    use crate::render_pipeline::test_utils::test_scene;

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 320, height: 180 };

    fn renderer(device: &MockGfxDevice, surface: MockPresentSurface) -> Renderer<'_> {
        kestrel_crate_tools::init_log::init_test_log();
        Renderer::new(
            device,
            Box::new(surface),
            Rc::new(test_scene(true, true)),
            RenderPipelines::placeholder(),
            PipelineSettings::default(),
            RendererConfig::default(),
        )
        .unwrap()
    }

    fn count(events: &[MockEvent], f: impl Fn(&MockEvent) -> bool) -> usize {
        events.iter().filter(|e| f(e)).count()
    }

    #[test]
    fn frames_are_submitted_and_presented() {
        let device = MockGfxDevice::new();
        let mut renderer = renderer(&device, device.create_present_surface(EXTENT, 3));
        device.clear_events();

        for _ in 0..4 {
            assert_eq!(renderer.render_frame().unwrap(), FrameOutcome::Presented);
        }
        assert_eq!(renderer.frame_id(), 4);

        let events = device.events();
        assert_eq!(count(&events, |e| matches!(e, MockEvent::Submit { .. })), 4);
        assert_eq!(count(&events, |e| matches!(e, MockEvent::Present { .. })), 4);

        // 每次 submit signal 的 semaphore 正是随后 present 等待的 semaphore
        let submits = events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Submit { signal, .. } => Some(signal.clone()),
                _ => None,
            })
            .collect_vec();
        let presents = events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Present { wait, .. } => Some(wait.clone()),
                _ => None,
            })
            .collect_vec();
        assert_eq!(submits, presents);

        renderer.destroy().unwrap();
        assert_eq!(device.live_image_count(), 0);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_and_skips() {
        let device = MockGfxDevice::new();
        let mut surface = device.create_present_surface(EXTENT, 2);
        surface.fail_acquires(1);
        let mut renderer = renderer(&device, surface);
        device.clear_events();

        assert_eq!(renderer.render_frame().unwrap(), FrameOutcome::Skipped);
        let events = device.events();
        let idle = events.iter().position(|e| *e == MockEvent::WaitIdle).unwrap();
        let recreate = events.iter().position(|e| *e == MockEvent::RecreateSurface(EXTENT)).unwrap();
        assert!(idle < recreate);
        assert_eq!(count(&events, |e| matches!(e, MockEvent::Submit { .. })), 0);
        // graph 的内部资源被重新创建
        assert!(count(&events, |e| matches!(e, MockEvent::CreateImage { .. })) > 0);
        assert_eq!(renderer.frame_id(), 0);

        assert_eq!(renderer.render_frame().unwrap(), FrameOutcome::Presented);
        assert_eq!(renderer.frame_id(), 1);
    }

    #[test]
    fn suboptimal_present_rebuilds_before_the_next_frame() {
        let device = MockGfxDevice::new();
        let mut surface = device.create_present_surface(EXTENT, 2);
        surface.queue_present_result(GfxPresentResult::Suboptimal);
        let mut renderer = renderer(&device, surface);

        assert_eq!(renderer.render_frame().unwrap(), FrameOutcome::Presented);
        assert!(renderer.present().is_stale());
        device.clear_events();

        assert_eq!(renderer.render_frame().unwrap(), FrameOutcome::Presented);
        let events = device.events();
        let recreate = events.iter().position(|e| *e == MockEvent::RecreateSurface(EXTENT)).unwrap();
        let acquire = events.iter().position(|e| matches!(e, MockEvent::Acquire { .. })).unwrap();
        assert!(recreate < acquire);
        assert!(!renderer.present().is_stale());
    }

    #[test]
    fn resize_recompiles_with_the_new_extent() {
        let device = MockGfxDevice::new();
        let mut renderer = renderer(&device, device.create_present_surface(EXTENT, 2));
        renderer.render_frame().unwrap();

        // 最小化时不渲染，也不重建
        renderer.resize(vk::Extent2D { width: 0, height: 0 });
        device.clear_events();
        assert_eq!(renderer.render_frame().unwrap(), FrameOutcome::Skipped);
        assert!(device.events().is_empty());

        let new_extent = vk::Extent2D { width: 640, height: 360 };
        renderer.resize(new_extent);
        assert_eq!(renderer.render_frame().unwrap(), FrameOutcome::Presented);
        assert!(device.events().contains(&MockEvent::RecreateSurface(new_extent)));
        assert_eq!(renderer.frame_settings().frame_extent, new_extent);
        assert_eq!(renderer.graph().resource(names::HDR_COLOR).unwrap().extent(), new_extent);
        assert_eq!(
            renderer.graph().resource(names::RTAO_RAW).unwrap().extent(),
            vk::Extent2D { width: 320, height: 180 }
        );
    }

    #[test]
    fn settings_change_rebuilds_the_graph() {
        let device = MockGfxDevice::new();
        let mut renderer = renderer(&device, device.create_present_surface(EXTENT, 2));
        renderer.render_frame().unwrap();

        renderer
            .apply_settings_toml(
                r#"
                [rtao]
                enabled = false
                "#,
            )
            .unwrap();
        assert!(!renderer.settings().rtao.enabled);
        assert!(!renderer.graph().execution_order_names().contains(&"rtao-trace"));
        assert_eq!(renderer.render_frame().unwrap(), FrameOutcome::Presented);

        let err = renderer.apply_settings_toml("unknown_key = 1").unwrap_err();
        assert!(matches!(err, RendererError::Settings(_)));
        assert!(!renderer.settings().rtao.enabled);
    }

    #[test]
    fn profiling_collects_pass_stats() {
        let device = MockGfxDevice::new();
        let mut renderer = renderer(&device, device.create_present_surface(EXTENT, 2));
        let settings = PipelineSettings {
            profiling_enabled: true,
            ..Default::default()
        };
        renderer.set_settings(settings).unwrap();
        renderer.render_frame().unwrap();

        let stats = renderer.graph().stats();
        assert!(stats.pass("depth-prepass").is_some());
        assert!(stats.pass("tonemap").is_some());
        assert!(stats.total_barrier_count() > 0);
    }
}
