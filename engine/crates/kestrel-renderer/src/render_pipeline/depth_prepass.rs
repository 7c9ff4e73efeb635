use std::rc::Rc;

use kestrel_gfx::commands::{GfxAttachment, GfxClearValue, GfxRenderingInfo};
use kestrel_render_graph::{RgImageState, RgPass, RgPassBuilder, RgPassContext, RgResult};

use crate::render_pipeline::{DrawPushConstants, draw_scene, frame_graph::FrameGraphInputs, resource_names as names};

/// 只写深度，后续的 forward 使用 `EQUAL` 深度测试
pub struct DepthPrepass {
    inputs: Rc<FrameGraphInputs>,
}
impl DepthPrepass {
    pub fn new(inputs: Rc<FrameGraphInputs>) -> Self {
        Self { inputs }
    }
}

impl RgPass for DepthPrepass {
    fn name(&self) -> &str {
        "depth-prepass"
    }

    fn setup(&mut self, builder: &mut RgPassBuilder) {
        builder.write_as(names::DEPTH, RgImageState::DepthAttachment);
    }

    fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()> {
        let scene = self.inputs.scene.scene_view();
        let push_constants = DrawPushConstants {
            per_frame_data: self.inputs.per_frame_data(ctx.frame),
            ..Default::default()
        };

        ctx.cmd.begin_rendering(&GfxRenderingInfo {
            extent: ctx.extent(names::DEPTH),
            color_attachments: vec![],
            depth_attachment: Some(GfxAttachment::clear(
                ctx.image_view(names::DEPTH),
                RgImageState::DepthAttachment.layout(),
                GfxClearValue::DepthStencil { depth: 1.0, stencil: 0 },
            )),
        });
        draw_scene(
            &mut *ctx.cmd,
            &self.inputs.pipelines.depth_prepass,
            scene,
            bytemuck::bytes_of(&push_constants),
            false,
        );
        ctx.cmd.end_rendering();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use kestrel_gfx::mock::{MockCommand, MockGfxDevice};
    use kestrel_render_graph::{RenderGraph, RgFrameContext, RgImageDesc};
    use kestrel_render_interface::pipeline_settings::PipelineSettings;

    use super::*;
    use crate::render_pipeline::test_utils::{test_inputs, test_scene};

    #[test]
    fn clears_depth_and_draws_every_record() {
        let extent = vk::Extent2D { width: 64, height: 64 };
        let device = MockGfxDevice::new();
        let mut graph = RenderGraph::new();
        graph
            .add_resource(
                names::DEPTH,
                RgImageDesc::new_2d(
                    vk::Format::D32_SFLOAT,
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                    extent,
                    RgImageState::ShaderRead,
                ),
            )
            .unwrap();
        graph
            .add_pass(DepthPrepass::new(test_inputs(PipelineSettings::default(), test_scene(true, false))))
            .unwrap();
        graph.compile(&device).unwrap();

        let cmd_buffer = kestrel_gfx::device::GfxDevice::allocate_command_buffer(&device, "test").unwrap();
        {
            let mut cmd = kestrel_gfx::device::GfxDevice::command_recorder(&device, &cmd_buffer);
            graph.execute(cmd.as_mut(), &RgFrameContext::new(0, 0, extent)).unwrap();
        }

        let commands = device.commands();
        let depth_view = graph.get_resource_view(names::DEPTH);
        assert!(commands.contains(&MockCommand::BeginRendering {
            extent,
            color_views: vec![],
            depth_view: Some(depth_view),
        }));
        // prepass 不使用 indirect 参数
        let draws = commands.iter().filter(|c| matches!(c, MockCommand::DrawIndexed(_))).count();
        assert_eq!(draws, 2);
        assert_eq!(graph.resource_state(names::DEPTH), Some(RgImageState::DepthAttachment));
    }
}
