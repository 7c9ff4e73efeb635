//! RenderGraph 的编译与执行
//!
//! 注册阶段收集资源与 Pass；`compile` 构建依赖图、排序并分配资源；
//! 之后每帧 `execute` 按固定顺序执行 Pass，并在每个 Pass 前后插入 barrier。

use std::time::Instant;

use ash::vk;
use itertools::Itertools;
use kestrel_gfx::device::{GfxCommandRecorder, GfxDevice};

use crate::{
    barrier::{RgBarrierEngine, RgBarrierPolicy, RgBarrierRecord},
    error::{RgError, RgResult},
    graph::RgDependencyGraph,
    image_resource::{RgImageDesc, RgImageResource},
    pass::{RgFrameContext, RgPass, RgPassBuilder, RgPassContext, RgResourceAccess},
    resource_registry::{RgImageHandle, RgResourceRegistry},
    state::RgImageState,
    stats::{RgExecutionStats, RgPassStats},
};

const PASS_LABEL_COLOR: [f32; 4] = [0.2, 0.6, 0.9, 1.0];

/// Pass 节点数据
struct RgPassNode<'a> {
    name: String,
    reads: Vec<RgResourceAccess>,
    writes: Vec<RgResourceAccess>,
    pass: Box<dyn RgPass + 'a>,
}

pub struct RenderGraph<'a> {
    resources: RgResourceRegistry,
    passes: Vec<RgPassNode<'a>>,

    /// 编译后的执行顺序（Pass 索引）
    execution_order: Vec<usize>,
    compiled: bool,

    barrier_engine: RgBarrierEngine,
    /// 最近一次执行中每个 Pass 录制的 barrier，按 Pass 索引
    last_barriers: Vec<Vec<RgBarrierRecord>>,
    stats: RgExecutionStats,
}

impl Default for RenderGraph<'_> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<'a> RenderGraph<'a> {
    pub fn new() -> Self {
        Self::with_barrier_policy(RgBarrierPolicy::default())
    }

    pub fn with_barrier_policy(policy: RgBarrierPolicy) -> Self {
        Self {
            resources: RgResourceRegistry::new(),
            passes: Vec::new(),
            execution_order: Vec::new(),
            compiled: false,
            barrier_engine: RgBarrierEngine::new(policy),
            last_barriers: Vec::new(),
            stats: RgExecutionStats::default(),
        }
    }

    /// 注册内部资源，内存在 `compile` 时分配
    pub fn add_resource(&mut self, name: &str, desc: RgImageDesc) -> RgResult<RgImageHandle> {
        if self.compiled {
            return Err(RgError::AlreadyCompiled {
                what: "resource",
                name: name.to_string(),
            });
        }
        self.resources.register(RgImageResource::internal(name, desc))
    }

    /// 注册外部资源，具体 image 每帧通过 [`RgFrameContext::with_external`] 提供
    pub fn add_external(
        &mut self,
        name: &str,
        format: vk::Format,
        extent: vk::Extent2D,
        initial_state: RgImageState,
        final_state: RgImageState,
    ) -> RgResult<RgImageHandle> {
        if self.compiled {
            return Err(RgError::AlreadyCompiled {
                what: "resource",
                name: name.to_string(),
            });
        }
        let desc = RgImageDesc::new_2d(format, vk::ImageUsageFlags::empty(), extent, final_state)
            .with_initial_state(initial_state);
        self.resources.register(RgImageResource::external(name, desc))
    }

    /// 添加 Pass，立即调用其 `setup` 收集资源声明
    pub fn add_pass(&mut self, pass: impl RgPass + 'a) -> RgResult<()> {
        self.add_boxed_pass(Box::new(pass))
    }

    pub fn add_boxed_pass(&mut self, mut pass: Box<dyn RgPass + 'a>) -> RgResult<()> {
        let name = pass.name().to_string();
        if self.compiled {
            return Err(RgError::AlreadyCompiled { what: "pass", name });
        }
        if self.passes.iter().any(|node| node.name == name) {
            return Err(RgError::DuplicatePass(name));
        }

        let mut builder = RgPassBuilder::default();
        pass.setup(&mut builder);
        self.passes.push(RgPassNode {
            name,
            reads: builder.reads,
            writes: builder.writes,
            pass,
        });
        Ok(())
    }
}

// getters
impl RenderGraph<'_> {
    #[inline]
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    #[inline]
    pub fn execution_order(&self) -> &[usize] {
        &self.execution_order
    }

    /// 按执行顺序排列的 Pass 名字
    pub fn execution_order_names(&self) -> Vec<&str> {
        self.execution_order.iter().map(|&idx| self.passes[idx].name.as_str()).collect_vec()
    }

    #[inline]
    pub fn resources(&self) -> &RgResourceRegistry {
        &self.resources
    }

    #[inline]
    pub fn resource(&self, name: &str) -> Option<&RgImageResource> {
        self.resources.get_by_name(name)
    }

    /// 内部资源的 view；外部资源或未注册的名字返回 null handle，调用方需要检查
    #[inline]
    pub fn get_resource_view(&self, name: &str) -> vk::ImageView {
        self.resources.image_view(name)
    }

    /// 内部资源当前的状态
    #[inline]
    pub fn resource_state(&self, name: &str) -> Option<RgImageState> {
        self.resources.get_by_name(name).and_then(|resource| resource.current_state())
    }

    /// 外部资源中某个具体 image 的状态
    pub fn external_state(&self, name: &str, image: vk::Image) -> Option<RgImageState> {
        self.resources
            .get_by_name(name)
            .filter(|resource| resource.is_external())
            .map(|resource| resource.state_of(image))
    }

    /// 参见 [`RgResourceRegistry::generation`]
    #[inline]
    pub fn resource_generation(&self) -> u64 {
        self.resources.generation()
    }

    #[inline]
    pub fn stats(&self) -> &RgExecutionStats {
        &self.stats
    }

    /// 最近一次执行中 `pass` 录制的 barrier
    pub fn last_barriers(&self, pass: &str) -> &[RgBarrierRecord] {
        self.passes
            .iter()
            .position(|node| node.name == pass)
            .and_then(|idx| self.last_barriers.get(idx))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[inline]
    pub fn barrier_engine_mut(&mut self) -> &mut RgBarrierEngine {
        &mut self.barrier_engine
    }
}

// compile & execute
impl RenderGraph<'_> {
    /// 构建依赖图，计算执行顺序，分配内部资源
    ///
    /// 存在循环依赖时返回 [`RgError::CycleDetected`]，此时不会分配任何资源
    pub fn compile(&mut self, device: &dyn GfxDevice) -> RgResult<()> {
        if self.compiled {
            log::warn!("render graph is already compiled");
            return Ok(());
        }
        let _span = kestrel_crate_tools::profile_span!("RenderGraph::compile");

        let reads = self
            .passes
            .iter()
            .map(|node| node.reads.iter().map(|access| access.name.as_str()).collect_vec())
            .collect_vec();
        let writes = self
            .passes
            .iter()
            .map(|node| node.writes.iter().map(|access| access.name.as_str()).collect_vec())
            .collect_vec();
        let graph = RgDependencyGraph::build(&reads, &writes);
        for edge in graph.edges() {
            log::trace!(
                "dependency: {} -> {} ({})",
                self.passes[edge.producer].name,
                self.passes[edge.consumer].name,
                edge.resource
            );
        }

        let order = graph.topological_sort().map_err(|cycle| RgError::CycleDetected {
            passes: cycle.into_iter().map(|idx| self.passes[idx].name.clone()).collect_vec(),
        })?;

        self.resources.allocate(device)?;
        self.execution_order = order;
        self.last_barriers = vec![Vec::new(); self.passes.len()];
        self.compiled = true;

        log::info!("render graph compiled: [{}]", self.execution_order_names().join(" → "));
        Ok(())
    }

    /// 呈现表面尺寸变化后重新创建资源，Pass 与执行顺序保持不变
    ///
    /// 调用前需要确保 GPU 不再使用旧资源
    pub fn recompile(&mut self, device: &dyn GfxDevice, extent: vk::Extent2D) -> RgResult<()> {
        if !self.compiled {
            return Err(RgError::NotCompiled);
        }
        self.resources.recompile(device, extent)?;
        self.last_barriers.iter_mut().for_each(Vec::clear);
        Ok(())
    }

    /// 按执行顺序录制所有 Pass
    ///
    /// 每个 Pass 之前先转换输入，再转换输出，目标状态依次取：静态指定的状态、
    /// `RgPass::required_state`、资源声明的 final state。
    /// Pass 之后，写入过的可呈现外部资源立即转换回 `Present`。
    pub fn execute(&mut self, cmd: &mut dyn GfxCommandRecorder, frame: &RgFrameContext) -> RgResult<()> {
        if !self.compiled {
            return Err(RgError::NotCompiled);
        }
        let _span = kestrel_crate_tools::profile_span!("RenderGraph::execute");

        let Self {
            resources,
            passes,
            execution_order,
            barrier_engine,
            last_barriers,
            stats,
            ..
        } = self;
        stats.clear();

        for &pass_idx in execution_order.iter() {
            let node = &mut passes[pass_idx];
            let records = &mut last_barriers[pass_idx];
            records.clear();

            let start = Instant::now();
            cmd.begin_label(&node.name, PASS_LABEL_COLOR);

            // 输入在前，输出在后；同时读写的资源只转换一次
            let requests = node
                .reads
                .iter()
                .chain(node.writes.iter())
                .map(|access| {
                    let state = access.state.or_else(|| node.pass.required_state(&access.name, frame));
                    (access.name.as_str(), state)
                })
                .unique()
                .collect_vec();
            resources.transition(&mut *cmd, barrier_engine, frame, &requests, records)?;

            {
                let mut ctx = RgPassContext::new(&mut *cmd, frame, &node.name, resources, barrier_engine, records);
                node.pass.begin(&mut ctx);
                node.pass.execute(&mut ctx)?;
                node.pass.end(&mut ctx);
            }

            let present = node
                .writes
                .iter()
                .filter(|access| {
                    resources
                        .get_by_name(&access.name)
                        .is_some_and(|resource| resource.is_external() && resource.final_state() == RgImageState::Present)
                })
                .map(|access| (access.name.as_str(), Some(RgImageState::Present)))
                .collect_vec();
            if !present.is_empty() {
                resources.transition(&mut *cmd, barrier_engine, frame, &present, records)?;
            }

            cmd.end_label();

            if frame.profiling {
                stats.passes.push(RgPassStats {
                    name: node.name.clone(),
                    cpu_time: start.elapsed(),
                    barrier_count: records.len(),
                });
            }
        }

        Ok(())
    }

    /// 释放所有内部资源
    pub fn release(&mut self, device: &dyn GfxDevice) {
        self.resources.release(device);
    }

    pub fn destroy(mut self, device: &dyn GfxDevice) {
        self.release(device);
    }
}

// debug
impl RenderGraph<'_> {
    /// 打印执行计划（用于调试）
    pub fn print_execution_plan(&self) {
        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              RenderGraph Execution Plan                          ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Passes: {}  |  Resources: {}  |  Execution Order: [{}]",
            self.passes.len(),
            self.resources.len(),
            self.execution_order_names().join(" → ")
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (order, &pass_idx) in self.execution_order.iter().enumerate() {
            let node = &self.passes[pass_idx];

            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!("│ [{}/{}] Pass: \"{}\"", order + 1, self.execution_order.len(), node.name);
            log::info!("├─────────────────────────────────────────────────────────────────┤");

            if !node.reads.is_empty() {
                log::info!("│ Image Reads:");
                for access in &node.reads {
                    log::info!("│   📖 \"{}\" @ {}", access.name, self.describe_access(access));
                }
            }
            if !node.writes.is_empty() {
                log::info!("│ Image Writes:");
                for access in &node.writes {
                    log::info!("│   ✏️  \"{}\" @ {}", access.name, self.describe_access(access));
                }
            }

            let barriers = self.last_barriers.get(pass_idx).map(Vec::as_slice).unwrap_or_default();
            if !barriers.is_empty() {
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                log::info!("│ Barriers (last execution): {}", barriers.len());
                for barrier in barriers {
                    let layout_change = if barrier.from.layout() != barrier.to.layout() {
                        format!("{:?} → {:?}", barrier.from.layout(), barrier.to.layout())
                    } else {
                        format!("{:?} (no layout change)", barrier.to.layout())
                    };
                    log::info!("│   🚧 \"{}\": {} → {} | {}", barrier.resource, barrier.from, barrier.to, layout_change);
                    log::info!(
                        "│      src: {} / {}",
                        Self::format_pipeline_stage(barrier.mask.src_stage),
                        Self::format_access_flags(barrier.mask.src_access)
                    );
                    log::info!(
                        "│      dst: {} / {}",
                        Self::format_pipeline_stage(barrier.mask.dst_stage),
                        Self::format_access_flags(barrier.mask.dst_access)
                    );
                }
            }
            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }
    }

    fn describe_access(&self, access: &RgResourceAccess) -> String {
        match (access.state, self.resources.get_by_name(&access.name)) {
            (Some(state), _) => format!("{state}"),
            (None, Some(resource)) => format!("{} (final state or per-frame override)", resource.final_state()),
            (None, None) => "<unregistered>".to_string(),
        }
    }

    fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
        if stage == vk::PipelineStageFlags2::NONE {
            return "NONE".to_string();
        }

        let mut stages = Vec::new();
        let known = [
            (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
            (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
            (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
            (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
            (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
            (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
            (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
            (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
            (vk::PipelineStageFlags2::TRANSFER, "TRANSFER"),
            (vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR, "ACCEL_STRUCT_BUILD"),
            (vk::PipelineStageFlags2::ALL_COMMANDS, "ALL_COMMANDS"),
        ];
        for (flag, name) in known {
            if stage.contains(flag) {
                stages.push(name);
            }
        }

        if stages.is_empty() { format!("{:?}", stage) } else { stages.join(" | ") }
    }

    fn format_access_flags(access: vk::AccessFlags2) -> String {
        if access == vk::AccessFlags2::NONE {
            return "NONE".to_string();
        }

        let mut flags = Vec::new();
        let known = [
            (vk::AccessFlags2::INDIRECT_COMMAND_READ, "INDIRECT_CMD_READ"),
            (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
            (vk::AccessFlags2::SHADER_STORAGE_READ, "STORAGE_READ"),
            (vk::AccessFlags2::SHADER_STORAGE_WRITE, "STORAGE_WRITE"),
            (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACH_READ"),
            (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACH_WRITE"),
            (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_ATTACH_READ"),
            (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_ATTACH_WRITE"),
            (vk::AccessFlags2::TRANSFER_READ, "TRANSFER_READ"),
            (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
            (vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR, "ACCEL_STRUCT_READ"),
            (vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR, "ACCEL_STRUCT_WRITE"),
            (vk::AccessFlags2::MEMORY_READ, "MEMORY_READ"),
            (vk::AccessFlags2::MEMORY_WRITE, "MEMORY_WRITE"),
        ];
        for (flag, name) in known {
            if access.contains(flag) {
                flags.push(name);
            }
        }

        if flags.is_empty() { format!("{:?}", access) } else { flags.join(" | ") }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use ash::vk::Handle;
    use kestrel_gfx::{
        handles::GfxImage,
        mock::{MockCommand, MockGfxDevice},
    };

    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 64, height: 64 };

    type Hook = fn(&str, &RgFrameContext) -> Option<RgImageState>;

    #[derive(Default)]
    struct TestPass {
        name: String,
        reads: Vec<(&'static str, Option<RgImageState>)>,
        writes: Vec<(&'static str, Option<RgImageState>)>,
        hook: Option<Hook>,
        /// execute 中额外的状态转换
        inner: Vec<(&'static str, RgImageState)>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl TestPass {
        fn new(name: &str, log: &Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                log: log.clone(),
                ..Default::default()
            }
        }

        fn read(mut self, name: &'static str, state: Option<RgImageState>) -> Self {
            self.reads.push((name, state));
            self
        }

        fn write(mut self, name: &'static str, state: Option<RgImageState>) -> Self {
            self.writes.push((name, state));
            self
        }
    }

    impl RgPass for TestPass {
        fn name(&self) -> &str {
            &self.name
        }

        fn setup(&mut self, builder: &mut RgPassBuilder) {
            for &(name, state) in &self.reads {
                match state {
                    Some(state) => builder.read_as(name, state),
                    None => builder.read(name),
                };
            }
            for &(name, state) in &self.writes {
                match state {
                    Some(state) => builder.write_as(name, state),
                    None => builder.write(name),
                };
            }
        }

        fn required_state(&self, resource: &str, frame: &RgFrameContext) -> Option<RgImageState> {
            self.hook.and_then(|hook| hook(resource, frame))
        }

        fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()> {
            self.log.borrow_mut().push(self.name.clone());
            for &(name, state) in &self.inner {
                ctx.transition_image(name, state)?;
            }
            ctx.cmd.draw(3, 1);
            Ok(())
        }
    }

    fn history_roles(resource: &str, frame: &RgFrameContext) -> Option<RgImageState> {
        let out = format!("history_{}", frame.frame_id % 2);
        Some(if resource == out { RgImageState::StorageWrite } else { RgImageState::ShaderRead })
    }

    fn color(final_state: RgImageState) -> RgImageDesc {
        RgImageDesc::new_2d(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
            EXTENT,
            final_state,
        )
    }

    fn depth() -> RgImageDesc {
        RgImageDesc::new_2d(
            vk::Format::D32_SFLOAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            EXTENT,
            RgImageState::ShaderRead,
        )
    }

    fn swapchain_image(raw: u64) -> GfxImage {
        GfxImage::external(
            vk::Image::from_raw(raw),
            vk::ImageView::from_raw(raw + 1000),
            EXTENT,
            vk::Format::B8G8R8A8_SRGB,
            vk::ImageAspectFlags::COLOR,
        )
    }

    #[test]
    fn depth_prepass_runs_before_forward() {
        let device = MockGfxDevice::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut graph = RenderGraph::new();
        graph.add_resource("depth", depth()).unwrap();
        graph.add_resource("color", color(RgImageState::ShaderRead)).unwrap();
        // 声明顺序与依赖相反
        graph
            .add_pass(
                TestPass::new("forward", &log)
                    .read("depth", None)
                    .write("color", Some(RgImageState::ColorAttachment)),
            )
            .unwrap();
        graph
            .add_pass(TestPass::new("depth_prepass", &log).write("depth", Some(RgImageState::DepthAttachment)))
            .unwrap();
        graph.compile(&device).unwrap();

        assert_eq!(graph.execution_order_names(), ["depth_prepass", "forward"]);
        assert_eq!(device.live_image_count(), 2);
    }

    #[test]
    fn additions_after_compile_are_rejected() {
        let device = MockGfxDevice::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut graph = RenderGraph::new();
        graph.add_pass(TestPass::new("a", &log)).unwrap();
        assert!(matches!(graph.add_pass(TestPass::new("a", &log)), Err(RgError::DuplicatePass(_))));
        graph.compile(&device).unwrap();

        assert!(matches!(
            graph.add_resource("late", depth()),
            Err(RgError::AlreadyCompiled { what: "resource", .. })
        ));
        assert!(matches!(
            graph.add_pass(TestPass::new("b", &log)),
            Err(RgError::AlreadyCompiled { what: "pass", .. })
        ));
    }

    #[test]
    fn cycle_fails_without_allocating() {
        let device = MockGfxDevice::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut graph = RenderGraph::new();
        graph.add_resource("x", color(RgImageState::ShaderRead)).unwrap();
        graph.add_resource("y", color(RgImageState::ShaderRead)).unwrap();
        graph.add_pass(TestPass::new("a", &log).read("y", None).write("x", None)).unwrap();
        graph.add_pass(TestPass::new("b", &log).read("x", None).write("y", None)).unwrap();

        let err = graph.compile(&device).unwrap_err();
        let RgError::CycleDetected { passes } = err else {
            panic!("expected a cycle error");
        };
        assert!(passes.contains(&"a".to_string()) && passes.contains(&"b".to_string()));
        assert!(!graph.is_compiled());
        assert!(graph.execution_order().is_empty());
        assert_eq!(device.live_image_count(), 0);

        let cmd_buffer = device.allocate_command_buffer("cmd").unwrap();
        let mut cmd = device.command_recorder(&cmd_buffer);
        assert!(matches!(graph.execute(&mut *cmd, &RgFrameContext::default()), Err(RgError::NotCompiled)));
    }

    #[test]
    fn execute_transitions_and_leaves_final_states() {
        let device = MockGfxDevice::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut graph = RenderGraph::new();
        graph.add_resource("depth", depth()).unwrap();
        graph.add_resource("color", color(RgImageState::ShaderRead)).unwrap();
        graph
            .add_pass(TestPass::new("depth_prepass", &log).write("depth", Some(RgImageState::DepthAttachment)))
            .unwrap();
        graph
            .add_pass(
                TestPass::new("forward", &log)
                    .read("depth", None)
                    .read("optional", None)
                    .write("color", Some(RgImageState::ColorAttachment)),
            )
            .unwrap();
        graph.add_pass(TestPass::new("post", &log).read("color", None)).unwrap();
        graph.compile(&device).unwrap();

        let cmd_buffer = device.allocate_command_buffer("cmd").unwrap();
        let mut cmd = device.command_recorder(&cmd_buffer);
        let frame = RgFrameContext::new(0, 0, EXTENT);
        graph.execute(&mut *cmd, &frame).unwrap();

        assert_eq!(*log.borrow(), ["depth_prepass", "forward", "post"]);
        assert_eq!(graph.resource_state("depth"), Some(RgImageState::ShaderRead));
        assert_eq!(graph.resource_state("color"), Some(RgImageState::ShaderRead));

        let forward = graph.last_barriers("forward");
        assert_eq!(forward.len(), 2);
        assert_eq!((forward[0].resource.as_str(), forward[0].to), ("depth", RgImageState::ShaderRead));
        assert_eq!((forward[1].from, forward[1].to), (RgImageState::Undefined, RgImageState::ColorAttachment));

        // 每个 Pass 的 barrier 合并为一次调用，并位于 label 之内
        let commands = device.commands();
        let barrier_calls = commands.iter().filter(|c| matches!(c, MockCommand::ImageBarriers(_))).count();
        assert_eq!(barrier_calls, 3);
        assert_eq!(commands[0], MockCommand::BeginLabel("depth_prepass".to_string()));
        assert!(matches!(commands[1], MockCommand::ImageBarriers(_)));

        // 第二帧：状态已经满足，不再需要从 Undefined 开始
        graph.execute(&mut *cmd, &frame.clone()).unwrap();
        assert_eq!(graph.last_barriers("depth_prepass")[0].from, RgImageState::ShaderRead);
    }

    #[test]
    fn external_images_return_to_present_and_are_tracked_per_handle() {
        let device = MockGfxDevice::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut graph = RenderGraph::with_barrier_policy(RgBarrierPolicy::Strict);
        graph
            .add_external(
                "swapchain",
                vk::Format::B8G8R8A8_SRGB,
                EXTENT,
                RgImageState::Undefined,
                RgImageState::Present,
            )
            .unwrap();
        graph
            .add_pass(TestPass::new("tonemap", &log).write("swapchain", Some(RgImageState::ColorAttachment)))
            .unwrap();
        graph.compile(&device).unwrap();
        assert_eq!(graph.get_resource_view("swapchain"), vk::ImageView::null());

        let cmd_buffer = device.allocate_command_buffer("cmd").unwrap();
        let mut cmd = device.command_recorder(&cmd_buffer);
        let (a, b) = (swapchain_image(1), swapchain_image(2));

        graph.execute(&mut *cmd, &RgFrameContext::new(0, 0, EXTENT).with_external("swapchain", a)).unwrap();
        let barriers = graph.last_barriers("tonemap");
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].from, RgImageState::Undefined);
        assert_eq!(barriers[1].to, RgImageState::Present);
        assert_eq!(graph.external_state("swapchain", a.handle), Some(RgImageState::Present));
        assert_eq!(graph.external_state("swapchain", b.handle), Some(RgImageState::Undefined));

        graph.execute(&mut *cmd, &RgFrameContext::new(1, 1, EXTENT).with_external("swapchain", b)).unwrap();
        assert_eq!(graph.last_barriers("tonemap")[0].from, RgImageState::Undefined);

        graph.execute(&mut *cmd, &RgFrameContext::new(2, 0, EXTENT).with_external("swapchain", a)).unwrap();
        assert_eq!(graph.last_barriers("tonemap")[0].from, RgImageState::Present);

        // 没有提供外部 image 时跳过
        graph.execute(&mut *cmd, &RgFrameContext::new(3, 1, EXTENT)).unwrap();
        assert!(graph.last_barriers("tonemap").is_empty());
    }

    #[test]
    fn per_frame_override_and_inner_transitions() {
        let device = MockGfxDevice::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut graph = RenderGraph::new();
        graph.add_resource("history_0", color(RgImageState::ShaderRead)).unwrap();
        graph.add_resource("history_1", color(RgImageState::ShaderRead)).unwrap();
        graph.add_resource("ping", color(RgImageState::ShaderRead)).unwrap();

        let mut pass = TestPass::new("trace", &log)
            .read("history_0", None)
            .read("history_1", None)
            .write("history_0", None)
            .write("history_1", None)
            .write("ping", Some(RgImageState::StorageWrite));
        pass.hook = Some(history_roles);
        pass.inner = vec![("ping", RgImageState::StorageRead)];
        graph.add_pass(pass).unwrap();
        graph.compile(&device).unwrap();

        let cmd_buffer = device.allocate_command_buffer("cmd").unwrap();
        let mut cmd = device.command_recorder(&cmd_buffer);

        graph.execute(&mut *cmd, &RgFrameContext::new(0, 0, EXTENT)).unwrap();
        assert_eq!(graph.resource_state("history_0"), Some(RgImageState::StorageWrite));
        assert_eq!(graph.resource_state("history_1"), Some(RgImageState::ShaderRead));
        assert_eq!(graph.resource_state("ping"), Some(RgImageState::StorageRead));

        graph.execute(&mut *cmd, &RgFrameContext::new(1, 1, EXTENT)).unwrap();
        assert_eq!(graph.resource_state("history_0"), Some(RgImageState::ShaderRead));
        assert_eq!(graph.resource_state("history_1"), Some(RgImageState::StorageWrite));
        // StorageRead -> StorageWrite -> StorageRead
        let ping = graph.last_barriers("trace").iter().filter(|b| b.resource == "ping").count();
        assert_eq!(ping, 2);
    }

    #[test]
    fn stats_are_collected_only_when_profiling() {
        kestrel_crate_tools::init_log::init_test_log();
        let device = MockGfxDevice::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut graph = RenderGraph::new();
        graph.add_resource("color", color(RgImageState::ShaderRead)).unwrap();
        graph
            .add_pass(TestPass::new("clear", &log).write("color", Some(RgImageState::ColorAttachment)))
            .unwrap();
        graph.compile(&device).unwrap();

        let cmd_buffer = device.allocate_command_buffer("cmd").unwrap();
        let mut cmd = device.command_recorder(&cmd_buffer);
        graph.execute(&mut *cmd, &RgFrameContext::new(0, 0, EXTENT)).unwrap();
        assert!(graph.stats().passes.is_empty());

        graph.execute(&mut *cmd, &RgFrameContext::new(1, 1, EXTENT).with_profiling(true)).unwrap();
        let stats = graph.stats();
        assert_eq!(stats.passes.len(), 1);
        assert_eq!(stats.passes[0].name, "clear");
        assert_eq!(stats.total_cpu_time(), stats.passes[0].cpu_time);
        graph.print_execution_plan();
    }

    #[test]
    fn recompile_resizes_and_resets_states() {
        let device = MockGfxDevice::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut graph = RenderGraph::new();
        graph.add_resource("ao", color(RgImageState::ShaderRead).with_divisor(2)).unwrap();
        graph.add_pass(TestPass::new("ao", &log).write("ao", Some(RgImageState::StorageWrite))).unwrap();
        assert!(matches!(graph.recompile(&device, EXTENT), Err(RgError::NotCompiled)));
        graph.compile(&device).unwrap();

        let cmd_buffer = device.allocate_command_buffer("cmd").unwrap();
        let mut cmd = device.command_recorder(&cmd_buffer);
        graph.execute(&mut *cmd, &RgFrameContext::new(0, 0, EXTENT)).unwrap();
        let handle = graph.resources().handle("ao");

        let generation = graph.resource_generation();
        graph.recompile(&device, vk::Extent2D { width: 200, height: 100 }).unwrap();
        assert_eq!(graph.resource_generation(), generation + 1);
        assert_eq!(graph.resources().handle("ao"), handle);
        assert_eq!(graph.resource_state("ao"), Some(RgImageState::Undefined));
        assert_eq!(graph.resource("ao").unwrap().extent(), vk::Extent2D { width: 100, height: 50 });
        assert_eq!(device.live_image_count(), 1);

        graph.destroy(&device);
        assert_eq!(device.live_image_count(), 0);
    }

    #[test]
    fn missing_view_is_null() {
        let graph = RenderGraph::new();
        assert_eq!(graph.get_resource_view("nonexistent"), vk::ImageView::null());
    }
}
