use std::rc::Rc;

use ash::vk;
use itertools::Itertools;
use kestrel_gfx::{commands::GfxImageBinding, device::dispatch_group_count};
use kestrel_render_graph::{RgImageState, RgPass, RgPassBuilder, RgPassContext, RgResult};

use crate::render_pipeline::{
    COMPUTE_LOCAL_SIZE, frame_graph::FrameGraphInputs, resource_names as names, rtao::AtrousSchedule,
};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct DenoisePushConstants {
    per_frame_data: vk::DeviceAddress,
    step: u32,
    iteration: u32,
    phi_depth: f32,
    phi_normal: f32,
}

/// 深度与法线引导的 à-trous 滤波
///
/// 每次迭代的采样间隔翻倍，输入输出在 ping-pong 之间交替，
/// 迭代之间的 barrier 由 pass 自己通过 graph 录制。
pub struct RtaoDenoisePass {
    inputs: Rc<FrameGraphInputs>,
    schedule: AtrousSchedule,
}
impl RtaoDenoisePass {
    pub fn new(inputs: Rc<FrameGraphInputs>) -> Self {
        let schedule = AtrousSchedule::new(inputs.settings.rtao.denoise_iterations);
        if schedule.iterations() != inputs.settings.rtao.denoise_iterations {
            log::warn!(
                "rtao-denoise: iterations {} clamped to {}",
                inputs.settings.rtao.denoise_iterations,
                schedule.iterations()
            );
        }
        Self { inputs, schedule }
    }

    #[inline]
    pub fn schedule(&self) -> &AtrousSchedule {
        &self.schedule
    }
}

impl RgPass for RtaoDenoisePass {
    fn name(&self) -> &str {
        "rtao-denoise"
    }

    fn setup(&mut self, builder: &mut RgPassBuilder) {
        builder
            .read_as(names::RTAO_RAW, RgImageState::StorageRead)
            .read_as(names::DEPTH, RgImageState::ShaderRead);

        // 只声明实际会写入的 ping-pong buffer
        for target in self.schedule.iter().map(|iteration| iteration.target_name()).unique() {
            builder.write_as(target, RgImageState::StorageWrite);
        }
    }

    fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()> {
        let pipeline = &self.inputs.pipelines.rtao_denoise;
        let rtao = &self.inputs.settings.rtao;
        let per_frame_data = self.inputs.per_frame_data(ctx.frame);
        let depth_view = ctx.image_view(names::DEPTH);

        ctx.cmd.bind_pipeline(pipeline);
        for iteration in self.schedule.iter() {
            let source = iteration.source.resource_name();
            let target = iteration.target_name();

            // 上一次迭代的输出成为这一次的输入
            if iteration.index > 0 {
                ctx.transition_images(&[(source, RgImageState::StorageRead), (target, RgImageState::StorageWrite)])?;
            }

            ctx.cmd.push_images(
                pipeline,
                0,
                &[
                    GfxImageBinding::storage(0, ctx.image_view(source)),
                    GfxImageBinding::storage(1, ctx.image_view(target)),
                    GfxImageBinding::sampled(2, depth_view, self.inputs.pipelines.linear_sampler),
                ],
            );
            let push_constants = DenoisePushConstants {
                per_frame_data,
                step: iteration.step,
                iteration: iteration.index,
                phi_depth: rtao.phi_depth,
                phi_normal: rtao.phi_normal,
            };
            ctx.cmd.push_constants(pipeline, 0, bytemuck::bytes_of(&push_constants));
            ctx.cmd.dispatch(dispatch_group_count(ctx.extent(target), COMPUTE_LOCAL_SIZE));
        }

        ctx.transition_image(self.schedule.final_name(), RgImageState::ShaderRead)
    }
}
