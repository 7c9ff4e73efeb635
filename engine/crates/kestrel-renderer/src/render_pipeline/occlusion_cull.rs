use std::rc::Rc;

use ash::vk;
use kestrel_gfx::{
    barrier::{GfxBarrierMask, GfxBufferBarrier},
    commands::GfxImageBinding,
    device::dispatch_group_count,
};
use kestrel_render_graph::{RgImageState, RgPass, RgPassBuilder, RgPassContext, RgResult};

use crate::render_pipeline::{COMPUTE_LOCAL_SIZE, frame_graph::FrameGraphInputs, resource_names as names};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct CullPushConstants {
    per_frame_data: vk::DeviceAddress,
    /// 0: 生成 depth pyramid；1: 剔除 draw 并写入 indirect 参数
    mode: u32,
    draw_count: u32,
}

/// 从深度生成半分辨率的 depth pyramid，再根据 pyramid 剔除 draw，
/// 结果写入 indirect buffer 供 forward 使用
pub struct OcclusionCullPass {
    inputs: Rc<FrameGraphInputs>,
}
impl OcclusionCullPass {
    const MODE_BUILD_PYRAMID: u32 = 0;
    const MODE_CULL: u32 = 1;
    const DRAWS_PER_GROUP: u32 = 64;

    pub fn new(inputs: Rc<FrameGraphInputs>) -> Self {
        Self { inputs }
    }

    /// compute 写入 indirect 参数 → draw indirect 读取
    pub fn indirect_barrier_mask() -> GfxBarrierMask {
        GfxBarrierMask::new(
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
            vk::PipelineStageFlags2::DRAW_INDIRECT,
            vk::AccessFlags2::INDIRECT_COMMAND_READ,
        )
    }
}

impl RgPass for OcclusionCullPass {
    fn name(&self) -> &str {
        "occlusion-cull"
    }

    fn setup(&mut self, builder: &mut RgPassBuilder) {
        builder
            .read_as(names::DEPTH, RgImageState::ShaderRead)
            .write_as(names::DEPTH_PYRAMID, RgImageState::StorageWrite);
    }

    fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()> {
        let pipeline = &self.inputs.pipelines.occlusion_cull;
        let scene = self.inputs.scene.scene_view();
        let mut push_constants = CullPushConstants {
            per_frame_data: self.inputs.per_frame_data(ctx.frame),
            mode: Self::MODE_BUILD_PYRAMID,
            draw_count: scene.draws.len() as u32,
        };

        ctx.cmd.bind_pipeline(pipeline);
        ctx.cmd.push_images(
            pipeline,
            0,
            &[
                GfxImageBinding::sampled(0, ctx.image_view(names::DEPTH), self.inputs.pipelines.linear_sampler),
                GfxImageBinding::storage(1, ctx.image_view(names::DEPTH_PYRAMID)),
            ],
        );
        ctx.cmd.push_constants(pipeline, 0, bytemuck::bytes_of(&push_constants));
        ctx.cmd.dispatch(dispatch_group_count(ctx.extent(names::DEPTH_PYRAMID), COMPUTE_LOCAL_SIZE));

        // 剔除读取 pyramid；下一帧的剔除也会读取它
        ctx.transition_image(names::DEPTH_PYRAMID, RgImageState::StorageRead)?;

        if scene.indirect_buffer == vk::Buffer::null() || scene.draws.is_empty() {
            log::trace!("occlusion-cull: no indirect buffer, skip culling");
            return Ok(());
        }
        push_constants.mode = Self::MODE_CULL;
        ctx.cmd.push_constants(pipeline, 0, bytemuck::bytes_of(&push_constants));
        ctx.cmd.dispatch([push_constants.draw_count.div_ceil(Self::DRAWS_PER_GROUP), 1, 1]);
        Ok(())
    }

    fn end(&mut self, ctx: &mut RgPassContext<'_>) {
        let scene = self.inputs.scene.scene_view();
        if scene.indirect_buffer == vk::Buffer::null() {
            return;
        }
        ctx.cmd.buffer_barriers(&[GfxBufferBarrier::new()
            .buffer(scene.indirect_buffer, 0, vk::WHOLE_SIZE)
            .mask(Self::indirect_barrier_mask())]);
    }
}
