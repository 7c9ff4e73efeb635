use std::rc::Rc;

use ash::vk;
use kestrel_gfx::{commands::GfxImageBinding, device::dispatch_group_count};
use kestrel_render_graph::{RgImageState, RgPass, RgPassBuilder, RgPassContext, RgResult};

use crate::render_pipeline::{
    COMPUTE_LOCAL_SIZE, frame_graph::FrameGraphInputs, resource_names as names, rtao::AtrousSchedule,
};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct UpsamplePushConstants {
    per_frame_data: vk::DeviceAddress,
    source_extent: [u32; 2],
}

/// 深度引导的双边上采样，把 denoise 的结果放大到帧分辨率
pub struct RtaoUpsamplePass {
    inputs: Rc<FrameGraphInputs>,
    /// denoise 最终写入的 buffer
    source: &'static str,
}
impl RtaoUpsamplePass {
    pub fn new(inputs: Rc<FrameGraphInputs>) -> Self {
        let source = AtrousSchedule::new(inputs.settings.rtao.denoise_iterations).final_name();
        Self { inputs, source }
    }
}

impl RgPass for RtaoUpsamplePass {
    fn name(&self) -> &str {
        "rtao-upsample"
    }

    fn setup(&mut self, builder: &mut RgPassBuilder) {
        builder
            .read_as(self.source, RgImageState::ShaderRead)
            .read_as(names::DEPTH, RgImageState::ShaderRead)
            .write_as(names::RTAO_FULL, RgImageState::StorageWrite);
    }

    fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()> {
        let pipeline = &self.inputs.pipelines.rtao_upsample;
        let sampler = self.inputs.pipelines.linear_sampler;
        let source_extent = ctx.extent(self.source);
        let push_constants = UpsamplePushConstants {
            per_frame_data: self.inputs.per_frame_data(ctx.frame),
            source_extent: [source_extent.width, source_extent.height],
        };

        ctx.cmd.bind_pipeline(pipeline);
        ctx.cmd.push_images(
            pipeline,
            0,
            &[
                GfxImageBinding::sampled(0, ctx.image_view(self.source), sampler),
                GfxImageBinding::sampled(1, ctx.image_view(names::DEPTH), sampler),
                GfxImageBinding::storage(2, ctx.image_view(names::RTAO_FULL)),
            ],
        );
        ctx.cmd.push_constants(pipeline, 0, bytemuck::bytes_of(&push_constants));
        ctx.cmd.dispatch(dispatch_group_count(ctx.extent(names::RTAO_FULL), COMPUTE_LOCAL_SIZE));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kestrel_gfx::{
        device::GfxDevice,
        mock::{MockCommand, MockGfxDevice},
    };
    use kestrel_render_graph::{RenderGraph, RgFrameContext, RgImageDesc};
    use kestrel_render_interface::pipeline_settings::PipelineSettings;

    use super::*;
    use crate::render_pipeline::test_utils::{test_inputs, test_scene};

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 80, height: 48 };

    #[test]
    fn samples_the_final_denoise_buffer_at_full_resolution() {
        let device = MockGfxDevice::new();
        let mut settings = PipelineSettings::default();
        settings.rtao.denoise_iterations = 4;
        let usage = vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED;

        let mut graph = RenderGraph::new();
        graph
            .add_resource(
                names::DEPTH,
                RgImageDesc::new_2d(vk::Format::D32_SFLOAT, vk::ImageUsageFlags::SAMPLED, EXTENT, RgImageState::ShaderRead),
            )
            .unwrap();
        for name in AtrousSchedule::PING_PONG {
            graph
                .add_resource(
                    name,
                    RgImageDesc::new_2d(vk::Format::R16_SFLOAT, usage, EXTENT, RgImageState::ShaderRead).with_divisor(2),
                )
                .unwrap();
        }
        graph
            .add_resource(
                names::RTAO_FULL,
                RgImageDesc::new_2d(vk::Format::R16_SFLOAT, usage, EXTENT, RgImageState::ShaderRead),
            )
            .unwrap();
        graph
            .add_pass(RtaoUpsamplePass::new(test_inputs(settings, test_scene(false, false))))
            .unwrap();
        graph.compile(&device).unwrap();

        let cmd_buffer = device.allocate_command_buffer("test").unwrap();
        {
            let mut cmd = device.command_recorder(&cmd_buffer);
            graph.execute(cmd.as_mut(), &RgFrameContext::new(0, 0, EXTENT)).unwrap();
        }

        // 4 次迭代的结果在 pong
        let pong = graph.get_resource_view(names::RTAO_DENOISE_PONG);
        let commands = device.commands();
        let images = commands
            .iter()
            .find_map(|c| match c {
                MockCommand::PushImages(images) => Some(images.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(images[0].1, pong);
        assert!(commands.contains(&MockCommand::Dispatch([10, 6, 1])));
        assert_eq!(graph.resource_state(names::RTAO_FULL), Some(RgImageState::StorageWrite));
        assert_eq!(graph.resource_state(names::RTAO_DENOISE_PONG), Some(RgImageState::ShaderRead));
        // ping 没有被声明
        assert_eq!(graph.resource_state(names::RTAO_DENOISE_PING), Some(RgImageState::Undefined));
    }
}
