use std::rc::Rc;

use kestrel_gfx::commands::{GfxAttachment, GfxClearValue, GfxRenderingInfo};
use kestrel_render_graph::{RgImageState, RgPass, RgPassBuilder, RgPassContext, RgResult};

use crate::render_pipeline::{DrawPushConstants, frame_graph::FrameGraphInputs, resource_names as names};

/// 清空 HDR 颜色并用全屏三角形绘制天空
pub struct SkyboxPass {
    inputs: Rc<FrameGraphInputs>,
}
impl SkyboxPass {
    pub fn new(inputs: Rc<FrameGraphInputs>) -> Self {
        Self { inputs }
    }
}

impl RgPass for SkyboxPass {
    fn name(&self) -> &str {
        "skybox"
    }

    fn setup(&mut self, builder: &mut RgPassBuilder) {
        builder.write_as(names::HDR_COLOR, RgImageState::ColorAttachment);
    }

    fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()> {
        let pipeline = &self.inputs.pipelines.skybox;
        let push_constants = DrawPushConstants {
            per_frame_data: self.inputs.per_frame_data(ctx.frame),
            ..Default::default()
        };

        ctx.cmd.begin_rendering(&GfxRenderingInfo {
            extent: ctx.extent(names::HDR_COLOR),
            color_attachments: vec![GfxAttachment::clear(
                ctx.image_view(names::HDR_COLOR),
                RgImageState::ColorAttachment.layout(),
                GfxClearValue::Color([0.0, 0.0, 0.0, 1.0]),
            )],
            depth_attachment: None,
        });
        ctx.cmd.bind_pipeline(pipeline);
        ctx.cmd.push_constants(pipeline, 0, bytemuck::bytes_of(&push_constants));
        ctx.cmd.draw(3, 1);
        ctx.cmd.end_rendering();
        Ok(())
    }
}
