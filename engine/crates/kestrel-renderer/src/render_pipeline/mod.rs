//! 所有的渲染 pass
//!
//! 每个 pass 持有一份 [`frame_graph::FrameGraphInputs`] 的引用，
//! 通过资源名在 render graph 中声明读写；连接方式见 [`frame_graph::FrameGraphBuilder`]。

use ash::vk::{self, Handle};
use kestrel_gfx::{commands::GfxPipeline, device::GfxCommandRecorder};
use kestrel_render_interface::scene::GpuSceneView;

pub mod bloom;
pub mod depth_prepass;
pub mod forward;
pub mod frame_graph;
pub mod occlusion_cull;
pub mod rtao;
pub mod skybox;
pub mod tonemap;

/// render graph 中的资源名
pub mod resource_names {
    pub const DEPTH: &str = "depth";
    pub const DEPTH_PYRAMID: &str = "depth_pyramid";
    pub const HDR_COLOR: &str = "hdr_color";

    pub const RTAO_RAW: &str = "rtao_raw";
    pub const RTAO_HISTORY_0: &str = "rtao_history_0";
    pub const RTAO_HISTORY_1: &str = "rtao_history_1";
    pub const RTAO_DENOISE_PING: &str = "rtao_denoise_ping";
    pub const RTAO_DENOISE_PONG: &str = "rtao_denoise_pong";
    pub const RTAO_FULL: &str = "rtao_full";

    pub const BLOOM_BRIGHT: &str = "bloom_bright";
    pub const BLOOM_BLUR: &str = "bloom_blur";

    /// 每帧由呈现表面提供
    pub const SWAPCHAIN: &str = "swapchain";
}

/// compute pass 的 local size
pub(crate) const COMPUTE_LOCAL_SIZE: [u32; 2] = [8, 8];

/// 由外部（shader loader）创建好的 pipeline 与 sampler
#[derive(Copy, Clone, Debug)]
pub struct RenderPipelines {
    pub depth_prepass: GfxPipeline,
    pub occlusion_cull: GfxPipeline,
    pub skybox: GfxPipeline,
    pub forward: GfxPipeline,
    pub rtao_trace: GfxPipeline,
    pub rtao_denoise: GfxPipeline,
    pub rtao_upsample: GfxPipeline,
    pub bloom_extract: GfxPipeline,
    pub bloom_blur: GfxPipeline,
    pub tonemap: GfxPipeline,
    pub linear_sampler: vk::Sampler,
}
impl RenderPipelines {
    /// 使用假句柄填充，只能配合 mock 后端使用
    pub fn placeholder() -> Self {
        let handles = |i: u64| (vk::Pipeline::from_raw(0xC0DE_0000 + i), vk::PipelineLayout::from_raw(0xC0DE_1000 + i));
        let graphics = |i: u64| {
            let (pipeline, layout) = handles(i);
            GfxPipeline::graphics(pipeline, layout)
        };
        let compute = |i: u64| {
            let (pipeline, layout) = handles(i);
            GfxPipeline::compute(pipeline, layout)
        };

        Self {
            depth_prepass: graphics(1),
            occlusion_cull: compute(2),
            skybox: graphics(3),
            forward: graphics(4),
            rtao_trace: compute(5),
            rtao_denoise: compute(6),
            rtao_upsample: compute(7),
            bloom_extract: compute(8),
            bloom_blur: compute(9),
            tonemap: graphics(10),
            linear_sampler: vk::Sampler::from_raw(0xC0DE_2000),
        }
    }
}

/// 绘制场景的 draw 列表
///
/// `indirect` 为 true 且场景提供了 indirect buffer 时，使用 occlusion cull 写入的参数
pub(crate) fn draw_scene(
    cmd: &mut dyn GfxCommandRecorder,
    pipeline: &GfxPipeline,
    scene: &GpuSceneView,
    push_constants: &[u8],
    indirect: bool,
) {
    cmd.bind_pipeline(pipeline);
    if scene.material_set != vk::DescriptorSet::null() {
        cmd.bind_descriptor_set(pipeline, 0, scene.material_set);
    }
    cmd.push_constants(pipeline, 0, push_constants);

    if !scene.has_geometry() {
        return;
    }
    cmd.bind_vertex_buffer(scene.vertex_buffer, 0);
    cmd.bind_index_buffer(scene.index_buffer, 0, scene.index_type);

    if indirect && scene.indirect_buffer != vk::Buffer::null() {
        cmd.draw_indexed_indirect(
            scene.indirect_buffer,
            0,
            scene.draws.len() as u32,
            size_of::<vk::DrawIndexedIndirectCommand>() as u32,
        );
    } else {
        for draw in scene.indexed_draws() {
            cmd.draw_indexed(&draw);
        }
    }
}

/// 光栅化 pass 共用的 push constant
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct DrawPushConstants {
    pub per_frame_data: vk::DeviceAddress,
    pub debug_view: u32,
    /// bit 0: AO 可用；bit 1: bloom 可用
    pub flags: u32,
}
impl DrawPushConstants {
    pub const FLAG_AO: u32 = 1 << 0;
    pub const FLAG_BLOOM: u32 = 1 << 1;
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::rc::Rc;

    use kestrel_render_interface::{
        pipeline_settings::PipelineSettings,
        scene::{CameraState, GpuDrawRecord, GpuSceneView, SceneSource},
    };

    use super::*;
    use crate::render_pipeline::frame_graph::FrameGraphInputs;

    pub struct TestScene {
        pub view: GpuSceneView,
    }
    impl SceneSource for TestScene {
        fn camera(&self) -> CameraState {
            CameraState::default()
        }

        fn scene_view(&self) -> &GpuSceneView {
            &self.view
        }
    }

    pub fn test_scene(indirect: bool, tlas: bool) -> TestScene {
        TestScene {
            view: GpuSceneView {
                vertex_buffer: vk::Buffer::from_raw(0xB000),
                index_buffer: vk::Buffer::from_raw(0xB001),
                index_type: vk::IndexType::UINT32,
                draws: vec![
                    GpuDrawRecord {
                        vertex_offset: 0,
                        first_index: 0,
                        index_count: 36,
                        material_index: 0,
                    },
                    GpuDrawRecord {
                        vertex_offset: 24,
                        first_index: 36,
                        index_count: 6,
                        material_index: 1,
                    },
                ],
                indirect_buffer: if indirect { vk::Buffer::from_raw(0xB002) } else { vk::Buffer::null() },
                material_set: vk::DescriptorSet::null(),
                tlas: tlas.then(|| kestrel_gfx::commands::GfxTlasUpdate {
                    tlas: vk::AccelerationStructureKHR::from_raw(0xA5),
                    instance_data: 0,
                    instance_count: 2,
                    scratch_data: 0,
                }),
            },
        }
    }

    pub fn test_inputs(settings: PipelineSettings, scene: TestScene) -> Rc<FrameGraphInputs> {
        Rc::new(FrameGraphInputs {
            scene: Rc::new(scene),
            pipelines: RenderPipelines::placeholder(),
            settings,
            per_frame_data: vec![0x1000, 0x2000],
        })
    }
}
