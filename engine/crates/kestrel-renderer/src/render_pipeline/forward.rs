use std::rc::Rc;

use kestrel_gfx::commands::{GfxAttachment, GfxImageBinding, GfxRenderingInfo};
use kestrel_render_graph::{RgImageState, RgPass, RgPassBuilder, RgPassContext, RgResult};

use crate::render_pipeline::{DrawPushConstants, draw_scene, frame_graph::FrameGraphInputs, resource_names as names};

/// 前向着色
///
/// 深度来自 prepass（只读），AO 来自 RTAO；AO 被关闭时 `rtao_full` 不存在，
/// 绑定的 view 为 null，shader 通过 flag 跳过采样。
pub struct ForwardPass {
    inputs: Rc<FrameGraphInputs>,
}
impl ForwardPass {
    pub fn new(inputs: Rc<FrameGraphInputs>) -> Self {
        Self { inputs }
    }
}

impl RgPass for ForwardPass {
    fn name(&self) -> &str {
        "forward"
    }

    fn setup(&mut self, builder: &mut RgPassBuilder) {
        builder
            .read_as(names::DEPTH, RgImageState::DepthReadOnly)
            .read_write_as(names::HDR_COLOR, RgImageState::ColorAttachment)
            .read_as(names::RTAO_FULL, RgImageState::ShaderRead)
            // indirect 参数由 occlusion cull 写入，pyramid 是它在 graph 中可见的输出
            .read_as(names::DEPTH_PYRAMID, RgImageState::StorageRead);
    }

    fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()> {
        let pipeline = &self.inputs.pipelines.forward;
        let settings = &self.inputs.settings;
        let ao_view = ctx.image_view(names::RTAO_FULL);

        let mut push_constants = DrawPushConstants {
            per_frame_data: self.inputs.per_frame_data(ctx.frame),
            debug_view: settings.debug_view.as_u32(),
            flags: 0,
        };
        if ctx.image(names::RTAO_FULL).is_some() {
            push_constants.flags |= DrawPushConstants::FLAG_AO;
        }

        ctx.cmd.begin_rendering(&GfxRenderingInfo {
            extent: ctx.extent(names::HDR_COLOR),
            color_attachments: vec![GfxAttachment::load(
                ctx.image_view(names::HDR_COLOR),
                RgImageState::ColorAttachment.layout(),
            )],
            depth_attachment: Some(GfxAttachment::read_only(
                ctx.image_view(names::DEPTH),
                RgImageState::DepthReadOnly.layout(),
            )),
        });
        ctx.cmd.bind_pipeline(pipeline);
        ctx.cmd.push_images(
            pipeline,
            1,
            &[GfxImageBinding::sampled(0, ao_view, self.inputs.pipelines.linear_sampler)],
        );
        draw_scene(
            &mut *ctx.cmd,
            pipeline,
            self.inputs.scene.scene_view(),
            bytemuck::bytes_of(&push_constants),
            true,
        );
        ctx.cmd.end_rendering();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use kestrel_gfx::{
        device::GfxDevice,
        mock::{MockCommand, MockGfxDevice},
    };
    use kestrel_render_graph::{RenderGraph, RgFrameContext, RgImageDesc};
    use kestrel_render_interface::pipeline_settings::PipelineSettings;

    use super::*;
    use crate::render_pipeline::{
        skybox::SkyboxPass,
        test_utils::{test_inputs, test_scene},
    };

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 32, height: 32 };

    #[test]
    fn forward_runs_after_skybox_and_draws_indirect() {
        let device = MockGfxDevice::new();
        let inputs = test_inputs(PipelineSettings::default(), test_scene(true, false));
        let mut graph = RenderGraph::new();
        graph
            .add_resource(
                names::DEPTH,
                RgImageDesc::new_2d(
                    vk::Format::D32_SFLOAT,
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                    EXTENT,
                    RgImageState::ShaderRead,
                ),
            )
            .unwrap();
        graph
            .add_resource(
                names::HDR_COLOR,
                RgImageDesc::new_2d(
                    vk::Format::R16G16B16A16_SFLOAT,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    EXTENT,
                    RgImageState::ShaderRead,
                ),
            )
            .unwrap();
        graph.add_pass(SkyboxPass::new(inputs.clone())).unwrap();
        graph.add_pass(ForwardPass::new(inputs)).unwrap();
        graph.compile(&device).unwrap();
        assert_eq!(graph.execution_order_names(), vec!["skybox", "forward"]);

        let cmd_buffer = device.allocate_command_buffer("test").unwrap();
        {
            let mut cmd = device.command_recorder(&cmd_buffer);
            graph.execute(cmd.as_mut(), &RgFrameContext::new(0, 0, EXTENT)).unwrap();
        }

        let commands = device.commands();
        // rtao_full 与 depth_pyramid 不存在，pass 照常执行
        assert!(commands.contains(&MockCommand::PushImages(vec![(
            0,
            vk::ImageView::null(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        )])));
        assert!(commands.iter().any(|c| matches!(c, MockCommand::DrawIndexedIndirect { draw_count: 2, .. })));
        assert_eq!(graph.resource_state(names::DEPTH), Some(RgImageState::DepthReadOnly));
        assert_eq!(graph.resource_state(names::HDR_COLOR), Some(RgImageState::ColorAttachment));

        // skybox 的清屏写入必须在 forward load 之前完成，layout 不变也要有 barrier
        let hdr = graph
            .last_barriers("forward")
            .iter()
            .filter(|barrier| barrier.resource == names::HDR_COLOR)
            .collect::<Vec<_>>();
        assert_eq!(hdr.len(), 1);
        assert_eq!((hdr[0].from, hdr[0].to), (RgImageState::ColorAttachment, RgImageState::ColorAttachment));
        assert_eq!(hdr[0].mask.src_access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert!(hdr[0].mask.dst_access.contains(vk::AccessFlags2::COLOR_ATTACHMENT_READ));
    }
}
