use std::rc::Rc;

use ash::vk;
use kestrel_render_graph::{RenderGraph, RgFrameContext, RgImageDesc, RgImageState};
use kestrel_render_interface::{
    pipeline_settings::{FrameSettings, PipelineSettings},
    scene::SceneSource,
};

use crate::{
    error::RendererResult,
    render_pipeline::{
        RenderPipelines,
        bloom::BloomPass,
        depth_prepass::DepthPrepass,
        forward::ForwardPass,
        occlusion_cull::OcclusionCullPass,
        resource_names as names,
        rtao::{denoise::RtaoDenoisePass, trace::RtaoTracePass, upsample::RtaoUpsamplePass},
        skybox::SkyboxPass,
        tonemap::TonemapPass,
    },
};

/// 所有 pass 共享的输入
///
/// graph 在多帧之间复用，pass 持有这里的 `Rc`；设置改变时整个 graph 重建。
pub struct FrameGraphInputs {
    pub scene: Rc<dyn SceneSource>,
    pub pipelines: RenderPipelines,
    pub settings: PipelineSettings,
    /// 每个 frame slot 的 PerFrameData 地址，按 slot 索引排列
    pub per_frame_data: Vec<vk::DeviceAddress>,
}
impl FrameGraphInputs {
    #[inline]
    pub fn per_frame_data(&self, frame: &RgFrameContext) -> vk::DeviceAddress {
        self.per_frame_data.get(frame.frame_slot).copied().unwrap_or_default()
    }
}

/// 组装一帧的 render graph
///
/// 声明顺序：depth prepass → occlusion cull → RTAO (trace → denoise → upsample)
/// → skybox → forward → bloom → tonemap
pub struct FrameGraphBuilder {
    inputs: Rc<FrameGraphInputs>,
    frame_settings: FrameSettings,
    surface_format: vk::Format,
}

// new & init
impl FrameGraphBuilder {
    pub fn new(inputs: Rc<FrameGraphInputs>, frame_settings: FrameSettings, surface_format: vk::Format) -> Self {
        Self {
            inputs,
            frame_settings,
            surface_format,
        }
    }

    /// 返回尚未编译的 graph
    pub fn build(&self) -> RendererResult<RenderGraph<'static>> {
        let mut graph = RenderGraph::new();
        self.add_resources(&mut graph)?;
        self.add_passes(&mut graph)?;
        Ok(graph)
    }
}

// resources
impl FrameGraphBuilder {
    fn add_resources(&self, graph: &mut RenderGraph<'static>) -> RendererResult<()> {
        let settings = &self.inputs.settings;
        let extent = self.frame_settings.frame_extent;
        let sampled_storage = vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED;

        graph.add_resource(
            names::DEPTH,
            RgImageDesc::new_2d(
                self.frame_settings.depth_format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                extent,
                RgImageState::ShaderRead,
            ),
        )?;
        graph.add_resource(
            names::DEPTH_PYRAMID,
            RgImageDesc::new_2d(vk::Format::R32_SFLOAT, sampled_storage, extent, RgImageState::StorageRead)
                .with_divisor(2),
        )?;
        graph.add_resource(
            names::HDR_COLOR,
            RgImageDesc::new_2d(
                self.frame_settings.color_format,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | sampled_storage,
                extent,
                RgImageState::ShaderRead,
            ),
        )?;

        if settings.rtao.enabled {
            let ao = |final_state: RgImageState| {
                RgImageDesc::new_2d(vk::Format::R16_SFLOAT, sampled_storage, extent, final_state)
                    .with_divisor(settings.resolution_divisor())
            };
            graph.add_resource(names::RTAO_RAW, ao(RgImageState::StorageRead))?;
            graph.add_resource(names::RTAO_HISTORY_0, ao(RgImageState::ShaderRead))?;
            graph.add_resource(names::RTAO_HISTORY_1, ao(RgImageState::ShaderRead))?;
            graph.add_resource(names::RTAO_DENOISE_PING, ao(RgImageState::ShaderRead))?;
            graph.add_resource(names::RTAO_DENOISE_PONG, ao(RgImageState::ShaderRead))?;
            graph.add_resource(
                names::RTAO_FULL,
                RgImageDesc::new_2d(vk::Format::R16_SFLOAT, sampled_storage, extent, RgImageState::ShaderRead),
            )?;
        }

        if settings.bloom.enabled {
            let bloom = RgImageDesc::new_2d(
                self.frame_settings.color_format,
                sampled_storage,
                extent,
                RgImageState::ShaderRead,
            )
            .with_divisor(2);
            graph.add_resource(names::BLOOM_BRIGHT, bloom.clone())?;
            graph.add_resource(names::BLOOM_BLUR, bloom)?;
        }

        graph.add_external(
            names::SWAPCHAIN,
            self.surface_format,
            extent,
            RgImageState::Undefined,
            RgImageState::Present,
        )?;
        Ok(())
    }
}

// passes
impl FrameGraphBuilder {
    fn add_passes(&self, graph: &mut RenderGraph<'static>) -> RendererResult<()> {
        let settings = &self.inputs.settings;

        graph.add_pass(DepthPrepass::new(self.inputs.clone()))?;
        graph.add_pass(OcclusionCullPass::new(self.inputs.clone()))?;

        if settings.rtao.enabled {
            graph.add_pass(RtaoTracePass::new(self.inputs.clone()))?;
            graph.add_pass(RtaoDenoisePass::new(self.inputs.clone()))?;
            graph.add_pass(RtaoUpsamplePass::new(self.inputs.clone()))?;
        }

        graph.add_pass(SkyboxPass::new(self.inputs.clone()))?;
        graph.add_pass(ForwardPass::new(self.inputs.clone()))?;

        if settings.bloom.enabled {
            graph.add_pass(BloomPass::new(self.inputs.clone()))?;
        }

        graph.add_pass(TonemapPass::new(self.inputs.clone()))?;
        Ok(())
    }
}
