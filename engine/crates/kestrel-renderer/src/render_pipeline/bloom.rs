use std::rc::Rc;

use kestrel_gfx::{commands::GfxImageBinding, device::dispatch_group_count};
use kestrel_render_graph::{RgImageState, RgPass, RgPassBuilder, RgPassContext, RgResult};

use crate::render_pipeline::{COMPUTE_LOCAL_SIZE, frame_graph::FrameGraphInputs, resource_names as names};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct BloomPushConstants {
    threshold: f32,
    intensity: f32,
    /// 模糊方向，extract 时不使用
    direction: [i32; 2],
}

/// 半分辨率 bloom：提取亮部后做一次分离的高斯模糊
///
/// 最终结果写回 `bloom_bright`，`bloom_blur` 只是中间结果
pub struct BloomPass {
    inputs: Rc<FrameGraphInputs>,
}
impl BloomPass {
    pub fn new(inputs: Rc<FrameGraphInputs>) -> Self {
        Self { inputs }
    }

    fn blur(&self, ctx: &mut RgPassContext<'_>, source: &str, target: &str, direction: [i32; 2]) {
        let pipeline = &self.inputs.pipelines.bloom_blur;
        let push_constants = BloomPushConstants {
            direction,
            ..self.push_constants()
        };
        ctx.cmd.bind_pipeline(pipeline);
        ctx.cmd.push_images(
            pipeline,
            0,
            &[
                GfxImageBinding::storage(0, ctx.image_view(source)),
                GfxImageBinding::storage(1, ctx.image_view(target)),
            ],
        );
        ctx.cmd.push_constants(pipeline, 0, bytemuck::bytes_of(&push_constants));
        ctx.cmd.dispatch(dispatch_group_count(ctx.extent(target), COMPUTE_LOCAL_SIZE));
    }

    fn push_constants(&self) -> BloomPushConstants {
        let bloom = &self.inputs.settings.bloom;
        BloomPushConstants {
            threshold: bloom.threshold,
            intensity: bloom.intensity,
            direction: [0, 0],
        }
    }
}

impl RgPass for BloomPass {
    fn name(&self) -> &str {
        "bloom"
    }

    fn setup(&mut self, builder: &mut RgPassBuilder) {
        builder
            .read_as(names::HDR_COLOR, RgImageState::ShaderRead)
            .write_as(names::BLOOM_BRIGHT, RgImageState::StorageWrite)
            .write_as(names::BLOOM_BLUR, RgImageState::StorageWrite);
    }

    fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()> {
        let pipeline = &self.inputs.pipelines.bloom_extract;
        ctx.cmd.bind_pipeline(pipeline);
        ctx.cmd.push_images(
            pipeline,
            0,
            &[
                GfxImageBinding::sampled(0, ctx.image_view(names::HDR_COLOR), self.inputs.pipelines.linear_sampler),
                GfxImageBinding::storage(1, ctx.image_view(names::BLOOM_BRIGHT)),
            ],
        );
        ctx.cmd.push_constants(pipeline, 0, bytemuck::bytes_of(&self.push_constants()));
        ctx.cmd.dispatch(dispatch_group_count(ctx.extent(names::BLOOM_BRIGHT), COMPUTE_LOCAL_SIZE));

        // horizontal: bright -> blur
        ctx.transition_image(names::BLOOM_BRIGHT, RgImageState::StorageRead)?;
        self.blur(ctx, names::BLOOM_BRIGHT, names::BLOOM_BLUR, [1, 0]);

        // vertical: blur -> bright
        ctx.transition_images(&[
            (names::BLOOM_BLUR, RgImageState::StorageRead),
            (names::BLOOM_BRIGHT, RgImageState::StorageWrite),
        ])?;
        self.blur(ctx, names::BLOOM_BLUR, names::BLOOM_BRIGHT, [0, 1]);
        Ok(())
    }
}
