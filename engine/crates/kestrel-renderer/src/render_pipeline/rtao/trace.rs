use std::rc::Rc;

use ash::vk;
use kestrel_gfx::{barrier::GfxBarrierMask, commands::GfxImageBinding, device::dispatch_group_count};
use kestrel_render_graph::{RgFrameContext, RgImageState, RgPass, RgPassBuilder, RgPassContext, RgResult};

use crate::render_pipeline::{
    COMPUTE_LOCAL_SIZE, frame_graph::FrameGraphInputs, resource_names as names, rtao::RtaoHistory,
};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct TracePushConstants {
    per_frame_data: vk::DeviceAddress,
    ray_count: u32,
    radius: f32,
    history_weight: f32,
    disocclusion_threshold: f32,
    /// 0 时 shader 不读取 history
    history_valid: u32,
    /// 0 时不发射射线，AO 视为无遮挡
    tlas_valid: u32,
}

/// 写入 history 时的帧、AO 分辨率与资源代数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct HistoryStamp {
    frame_id: u64,
    extent: vk::Extent2D,
    generation: u64,
}

/// 刷新 TLAS，以深度重建的位置为起点追踪 AO 射线，并与上一帧的 history 混合
///
/// 输出同时写入 `rtao_raw` 与本帧的 history
pub struct RtaoTracePass {
    inputs: Rc<FrameGraphInputs>,
    last_frame: Option<HistoryStamp>,
}
impl RtaoTracePass {
    pub fn new(inputs: Rc<FrameGraphInputs>) -> Self {
        Self {
            inputs,
            last_frame: None,
        }
    }

    /// TLAS 构建 → ray query 读取
    pub fn tlas_barrier_mask() -> GfxBarrierMask {
        GfxBarrierMask::new(
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        )
    }

    /// history 只有在上一帧刚好写入、且图像没有被重新创建时才有效
    fn history_valid(&self, current: HistoryStamp) -> bool {
        self.last_frame
            == Some(HistoryStamp {
                frame_id: current.frame_id.wrapping_sub(1),
                ..current
            })
    }
}

impl RgPass for RtaoTracePass {
    fn name(&self) -> &str {
        "rtao-trace"
    }

    fn setup(&mut self, builder: &mut RgPassBuilder) {
        builder
            .read_as(names::DEPTH, RgImageState::ShaderRead)
            .write_as(names::RTAO_RAW, RgImageState::StorageWrite);

        // history 的读写角色每帧交换，状态由 required_state 决定
        for history in RtaoHistory::NAMES {
            builder.read(history).write(history);
        }
    }

    fn required_state(&self, resource: &str, frame: &RgFrameContext) -> Option<RgImageState> {
        let (history_in, history_out) = RtaoHistory::names(frame.frame_id);
        if resource == history_out {
            Some(RgImageState::StorageWrite)
        } else if resource == history_in {
            Some(RgImageState::ShaderRead)
        } else {
            None
        }
    }

    fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()> {
        let pipeline = &self.inputs.pipelines.rtao_trace;
        let rtao = &self.inputs.settings.rtao;
        let scene = self.inputs.scene.scene_view();
        let frame_id = ctx.frame.frame_id;
        let extent = ctx.extent(names::RTAO_RAW);

        if let Some(tlas) = &scene.tlas {
            ctx.cmd.build_tlas(tlas);
            ctx.cmd.memory_barrier(Self::tlas_barrier_mask());
        } else {
            log::trace!("rtao-trace: no tlas, ao is unoccluded");
        }

        let stamp = HistoryStamp {
            frame_id,
            extent,
            generation: ctx.resource_generation(),
        };
        let history_valid = self.history_valid(stamp);
        if !history_valid {
            log::debug!("rtao-trace: history reset at frame {frame_id}");
        }
        let push_constants = TracePushConstants {
            per_frame_data: self.inputs.per_frame_data(ctx.frame),
            ray_count: rtao.ray_count,
            radius: rtao.radius,
            history_weight: rtao.history_weight,
            disocclusion_threshold: rtao.disocclusion_threshold,
            history_valid: history_valid as u32,
            tlas_valid: scene.tlas.is_some() as u32,
        };

        let (history_in, history_out) = RtaoHistory::names(frame_id);
        let sampler = self.inputs.pipelines.linear_sampler;
        ctx.cmd.bind_pipeline(pipeline);
        ctx.cmd.push_images(
            pipeline,
            0,
            &[
                GfxImageBinding::sampled(0, ctx.image_view(names::DEPTH), sampler),
                GfxImageBinding::storage(1, ctx.image_view(names::RTAO_RAW)),
                GfxImageBinding::sampled(2, ctx.image_view(history_in), sampler),
                GfxImageBinding::storage(3, ctx.image_view(history_out)),
            ],
        );
        ctx.cmd.push_constants(pipeline, 0, bytemuck::bytes_of(&push_constants));
        ctx.cmd.dispatch(dispatch_group_count(extent, COMPUTE_LOCAL_SIZE));

        self.last_frame = Some(stamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kestrel_gfx::{
        device::GfxDevice,
        mock::{MockCommand, MockGfxDevice},
    };
    use kestrel_render_graph::{RenderGraph, RgImageDesc};
    use kestrel_render_interface::pipeline_settings::PipelineSettings;

    use super::*;
    use crate::render_pipeline::test_utils::{TestScene, test_inputs, test_scene};

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 64, height: 64 };

    fn graph(scene: TestScene) -> RenderGraph<'static> {
        let mut graph = RenderGraph::new();
        graph
            .add_resource(
                names::DEPTH,
                RgImageDesc::new_2d(
                    vk::Format::D32_SFLOAT,
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                    EXTENT,
                    RgImageState::ShaderRead,
                ),
            )
            .unwrap();
        let ao = |final_state| {
            RgImageDesc::new_2d(
                vk::Format::R16_SFLOAT,
                vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
                EXTENT,
                final_state,
            )
            .with_divisor(2)
        };
        graph.add_resource(names::RTAO_RAW, ao(RgImageState::StorageRead)).unwrap();
        graph.add_resource(names::RTAO_HISTORY_0, ao(RgImageState::ShaderRead)).unwrap();
        graph.add_resource(names::RTAO_HISTORY_1, ao(RgImageState::ShaderRead)).unwrap();
        graph
            .add_pass(RtaoTracePass::new(test_inputs(PipelineSettings::default(), scene)))
            .unwrap();
        graph
    }

    fn execute(device: &MockGfxDevice, graph: &mut RenderGraph<'static>, frame_id: u64, extent: vk::Extent2D) {
        let cmd_buffer = device.allocate_command_buffer("test").unwrap();
        let mut cmd = device.command_recorder(&cmd_buffer);
        graph
            .execute(cmd.as_mut(), &RgFrameContext::new(frame_id, 0, extent))
            .unwrap();
    }

    /// 按帧顺序记录的 `history_valid`
    fn history_valid_flags(device: &MockGfxDevice) -> Vec<u32> {
        device
            .commands()
            .iter()
            .filter_map(|c| match c {
                MockCommand::PushConstants { data, .. } => {
                    Some(bytemuck::pod_read_unaligned::<TracePushConstants>(data).history_valid)
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn history_roles_swap_between_frames() {
        let device = MockGfxDevice::new();
        let mut graph = graph(test_scene(false, true));
        graph.compile(&device).unwrap();

        execute(&device, &mut graph, 0, EXTENT);
        assert_eq!(graph.resource_state(names::RTAO_HISTORY_0), Some(RgImageState::StorageWrite));
        assert_eq!(graph.resource_state(names::RTAO_HISTORY_1), Some(RgImageState::ShaderRead));

        execute(&device, &mut graph, 1, EXTENT);
        assert_eq!(graph.resource_state(names::RTAO_HISTORY_0), Some(RgImageState::ShaderRead));
        assert_eq!(graph.resource_state(names::RTAO_HISTORY_1), Some(RgImageState::StorageWrite));

        // 第一帧没有 history，第二帧连续
        assert_eq!(history_valid_flags(&device), vec![0, 1]);
    }

    #[test]
    fn skipped_frame_or_resize_invalidates_history() {
        let device = MockGfxDevice::new();
        let mut graph = graph(test_scene(false, true));
        graph.compile(&device).unwrap();

        execute(&device, &mut graph, 0, EXTENT);
        execute(&device, &mut graph, 2, EXTENT);

        let resized = vk::Extent2D { width: 128, height: 64 };
        graph.recompile(&device, resized).unwrap();
        execute(&device, &mut graph, 3, resized);
        execute(&device, &mut graph, 4, resized);

        assert_eq!(history_valid_flags(&device), vec![0, 0, 0, 1]);
    }

    #[test]
    fn same_size_recreation_invalidates_history() {
        let device = MockGfxDevice::new();
        let mut graph = graph(test_scene(false, true));
        graph.compile(&device).unwrap();

        // 表面过期后以相同尺寸重建，history 图像的内容已经丢失
        execute(&device, &mut graph, 0, EXTENT);
        graph.recompile(&device, EXTENT).unwrap();
        execute(&device, &mut graph, 1, EXTENT);
        execute(&device, &mut graph, 2, EXTENT);

        assert_eq!(history_valid_flags(&device), vec![0, 0, 1]);
    }

    #[test]
    fn tlas_refit_precedes_the_trace() {
        let device = MockGfxDevice::new();
        let scene = test_scene(false, true);
        let tlas = scene.view.tlas.unwrap().tlas;
        let mut graph = graph(scene);
        graph.compile(&device).unwrap();
        execute(&device, &mut graph, 0, EXTENT);

        let commands = device.commands();
        let build = commands.iter().position(|c| *c == MockCommand::BuildTlas(tlas)).unwrap();
        assert_eq!(commands[build + 1], MockCommand::MemoryBarrier(RtaoTracePass::tlas_barrier_mask()));
        let dispatch = commands.iter().position(|c| matches!(c, MockCommand::Dispatch(_))).unwrap();
        assert!(build < dispatch);
        // AO 为半分辨率 32x32
        assert_eq!(commands[dispatch], MockCommand::Dispatch([4, 4, 1]));
    }

    #[test]
    fn missing_tlas_still_dispatches_unoccluded() {
        let device = MockGfxDevice::new();
        let mut graph = graph(test_scene(false, false));
        graph.compile(&device).unwrap();
        execute(&device, &mut graph, 0, EXTENT);

        let commands = device.commands();
        assert!(!commands.iter().any(|c| matches!(c, MockCommand::BuildTlas(_))));
        let tlas_valid = commands
            .iter()
            .find_map(|c| match c {
                MockCommand::PushConstants { data, .. } => {
                    Some(bytemuck::pod_read_unaligned::<TracePushConstants>(data).tlas_valid)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(tlas_valid, 0);
        assert_eq!(commands.iter().filter(|c| matches!(c, MockCommand::Dispatch(_))).count(), 1);
    }
}
