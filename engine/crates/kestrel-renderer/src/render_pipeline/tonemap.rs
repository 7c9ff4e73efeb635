use std::rc::Rc;

use kestrel_gfx::commands::{GfxAttachment, GfxClearValue, GfxImageBinding, GfxRenderingInfo};
use kestrel_render_graph::{RgImageState, RgPass, RgPassBuilder, RgPassContext, RgResult};

use crate::render_pipeline::{DrawPushConstants, frame_graph::FrameGraphInputs, resource_names as names};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct TonemapPushConstants {
    exposure: f32,
    gamma: f32,
    bloom_intensity: f32,
    debug_view: u32,
    /// 与 [`DrawPushConstants`] 的 flag 相同
    flags: u32,
}

/// HDR → swapchain
///
/// 合成 bloom，按 debug view 输出最终颜色、AO、深度或 bloom
pub struct TonemapPass {
    inputs: Rc<FrameGraphInputs>,
}
impl TonemapPass {
    pub fn new(inputs: Rc<FrameGraphInputs>) -> Self {
        Self { inputs }
    }
}

impl RgPass for TonemapPass {
    fn name(&self) -> &str {
        "tonemap"
    }

    fn setup(&mut self, builder: &mut RgPassBuilder) {
        builder
            .read_as(names::HDR_COLOR, RgImageState::ShaderRead)
            .read_as(names::BLOOM_BRIGHT, RgImageState::ShaderRead)
            .read_as(names::RTAO_FULL, RgImageState::ShaderRead)
            .read_as(names::DEPTH, RgImageState::ShaderRead)
            .write_as(names::SWAPCHAIN, RgImageState::ColorAttachment);
    }

    fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()> {
        let pipeline = &self.inputs.pipelines.tonemap;
        let settings = &self.inputs.settings;
        let sampler = self.inputs.pipelines.linear_sampler;

        let mut flags = 0;
        if ctx.image(names::RTAO_FULL).is_some() {
            flags |= DrawPushConstants::FLAG_AO;
        }
        if ctx.image(names::BLOOM_BRIGHT).is_some() {
            flags |= DrawPushConstants::FLAG_BLOOM;
        }
        let push_constants = TonemapPushConstants {
            exposure: settings.tonemap.exposure,
            gamma: settings.tonemap.gamma,
            bloom_intensity: settings.bloom.intensity,
            debug_view: settings.debug_view.as_u32(),
            flags,
        };

        ctx.cmd.begin_rendering(&GfxRenderingInfo {
            extent: ctx.extent(names::SWAPCHAIN),
            color_attachments: vec![GfxAttachment::clear(
                ctx.image_view(names::SWAPCHAIN),
                RgImageState::ColorAttachment.layout(),
                GfxClearValue::Color([0.0, 0.0, 0.0, 1.0]),
            )],
            depth_attachment: None,
        });
        ctx.cmd.bind_pipeline(pipeline);
        ctx.cmd.push_images(
            pipeline,
            0,
            &[
                GfxImageBinding::sampled(0, ctx.image_view(names::HDR_COLOR), sampler),
                GfxImageBinding::sampled(1, ctx.image_view(names::BLOOM_BRIGHT), sampler),
                GfxImageBinding::sampled(2, ctx.image_view(names::RTAO_FULL), sampler),
                GfxImageBinding::sampled(3, ctx.image_view(names::DEPTH), sampler),
            ],
        );
        ctx.cmd.push_constants(pipeline, 0, bytemuck::bytes_of(&push_constants));
        ctx.cmd.draw(3, 1);
        ctx.cmd.end_rendering();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::{self, Handle};
    use kestrel_gfx::{
        device::GfxDevice,
        handles::GfxImage,
        mock::{MockCommand, MockGfxDevice},
    };
    use kestrel_render_graph::{RenderGraph, RgFrameContext, RgImageDesc};
    use kestrel_render_interface::pipeline_settings::{DebugView, PipelineSettings};

    use super::*;
    use crate::render_pipeline::test_utils::{test_inputs, test_scene};

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 16, height: 16 };

    #[test]
    fn writes_swapchain_and_leaves_it_presentable() {
        let device = MockGfxDevice::new();
        let mut settings = PipelineSettings::default();
        settings.debug_view = DebugView::Depth;

        let mut graph = RenderGraph::new();
        graph
            .add_resource(
                names::HDR_COLOR,
                RgImageDesc::new_2d(
                    vk::Format::R16G16B16A16_SFLOAT,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                    EXTENT,
                    RgImageState::ShaderRead,
                ),
            )
            .unwrap();
        graph
            .add_external(
                names::SWAPCHAIN,
                vk::Format::B8G8R8A8_SRGB,
                EXTENT,
                RgImageState::Undefined,
                RgImageState::Present,
            )
            .unwrap();
        graph
            .add_pass(TonemapPass::new(test_inputs(settings, test_scene(false, false))))
            .unwrap();
        graph.compile(&device).unwrap();

        let swapchain = GfxImage::external(
            vk::Image::from_raw(0x77),
            vk::ImageView::from_raw(0x78),
            EXTENT,
            vk::Format::B8G8R8A8_SRGB,
            vk::ImageAspectFlags::COLOR,
        );
        let frame = RgFrameContext::new(0, 0, EXTENT).with_external(names::SWAPCHAIN, swapchain);
        let cmd_buffer = device.allocate_command_buffer("test").unwrap();
        {
            let mut cmd = device.command_recorder(&cmd_buffer);
            graph.execute(cmd.as_mut(), &frame).unwrap();
        }

        let commands = device.commands();
        assert!(commands.contains(&MockCommand::BeginRendering {
            extent: EXTENT,
            color_views: vec![swapchain.view],
            depth_view: None,
        }));
        assert!(commands.contains(&MockCommand::Draw {
            vertex_count: 3,
            instance_count: 1,
        }));

        // AO 与 bloom 不存在：绑定 null，flag 为 0
        let push_constants = commands
            .iter()
            .find_map(|c| match c {
                MockCommand::PushConstants { data, .. } => Some(bytemuck::pod_read_unaligned::<TonemapPushConstants>(data)),
                _ => None,
            })
            .unwrap();
        assert_eq!(push_constants.flags, 0);
        assert_eq!(push_constants.debug_view, DebugView::Depth.as_u32());
        let images = commands
            .iter()
            .find_map(|c| match c {
                MockCommand::PushImages(images) => Some(images.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(images[2].1, vk::ImageView::null());

        assert_eq!(graph.external_state(names::SWAPCHAIN, swapchain.handle), Some(RgImageState::Present));
    }
}
