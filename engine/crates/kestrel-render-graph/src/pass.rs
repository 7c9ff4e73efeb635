//! Pass 定义和构建器
//!
//! 提供 `RgPass` trait 用于声明式定义渲染 Pass，
//! 以及 `RgPassBuilder` 用于在 setup 阶段按名字声明资源依赖。

use std::collections::HashMap;

use ash::vk;
use kestrel_gfx::{device::GfxCommandRecorder, handles::GfxImage};

use crate::{
    barrier::{RgBarrierEngine, RgBarrierRecord},
    error::RgResult,
    resource_registry::RgResourceRegistry,
    state::RgImageState,
};

/// 每帧传入 graph 的上下文
///
/// 外部资源（例如本帧 acquire 到的 swapchain image）也通过它提供。
#[derive(Clone, Debug, Default)]
pub struct RgFrameContext {
    pub frame_id: u64,
    /// 当前使用的 frame in flight 槽位
    pub frame_slot: usize,
    pub extent: vk::Extent2D,
    /// 开启后记录每个 Pass 的 CPU 耗时
    pub profiling: bool,
    external_images: HashMap<String, GfxImage>,
}

// new & init
impl RgFrameContext {
    pub fn new(frame_id: u64, frame_slot: usize, extent: vk::Extent2D) -> Self {
        Self {
            frame_id,
            frame_slot,
            extent,
            profiling: false,
            external_images: HashMap::new(),
        }
    }

    #[inline]
    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    #[inline]
    pub fn with_external(mut self, name: impl Into<String>, image: GfxImage) -> Self {
        self.external_images.insert(name.into(), image);
        self
    }
}

// getters
impl RgFrameContext {
    #[inline]
    pub fn external_image(&self, name: &str) -> Option<&GfxImage> {
        self.external_images.get(name)
    }
}

/// Pass 对一个资源的访问声明
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgResourceAccess {
    pub name: String,
    /// 静态指定的状态，优先级最高
    pub state: Option<RgImageState>,
}

/// Pass 构建器
///
/// 在 `RgPass::setup()` 中使用，声明 Pass 的资源依赖。
#[derive(Debug, Default)]
pub struct RgPassBuilder {
    pub(crate) reads: Vec<RgResourceAccess>,
    pub(crate) writes: Vec<RgResourceAccess>,
}

impl RgPassBuilder {
    /// 声明读取，使用资源的 final state 或 `required_state` 的结果
    #[inline]
    pub fn read(&mut self, name: &str) -> &mut Self {
        self.push_read(name, None)
    }

    /// 声明读取，并指定需要的状态
    #[inline]
    pub fn read_as(&mut self, name: &str, state: RgImageState) -> &mut Self {
        self.push_read(name, Some(state))
    }

    #[inline]
    pub fn write(&mut self, name: &str) -> &mut Self {
        self.push_write(name, None)
    }

    #[inline]
    pub fn write_as(&mut self, name: &str, state: RgImageState) -> &mut Self {
        self.push_write(name, Some(state))
    }

    /// 声明读写同一资源（累积、后处理）
    pub fn read_write_as(&mut self, name: &str, state: RgImageState) -> &mut Self {
        self.read_as(name, state).write_as(name, state)
    }

    fn push_read(&mut self, name: &str, state: Option<RgImageState>) -> &mut Self {
        self.reads.push(RgResourceAccess {
            name: name.to_string(),
            state,
        });
        self
    }

    fn push_write(&mut self, name: &str, state: Option<RgImageState>) -> &mut Self {
        self.writes.push(RgResourceAccess {
            name: name.to_string(),
            state,
        });
        self
    }

    #[inline]
    pub fn reads(&self) -> &[RgResourceAccess] {
        &self.reads
    }

    #[inline]
    pub fn writes(&self) -> &[RgResourceAccess] {
        &self.writes
    }
}

/// RgPass trait
///
/// 定义渲染图中的一个 Pass。执行顺序为 `begin` → `execute` → `end`，
/// 三者之前 graph 已经把所有声明的资源转换到了需要的状态。
///
/// # 示例
///
/// ```ignore
/// struct BlurPass;
///
/// impl RgPass for BlurPass {
///     fn name(&self) -> &str {
///         "blur"
///     }
///
///     fn setup(&mut self, builder: &mut RgPassBuilder) {
///         builder.read_as("input", RgImageState::ShaderRead).write_as("output", RgImageState::StorageWrite);
///     }
///
///     fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()> {
///         let input = ctx.image_view("input");
///         let output = ctx.image_view("output");
///         // 绑定 pipeline, dispatch...
///         Ok(())
///     }
/// }
/// ```
///
/// # 线程安全
///
/// Pass 不需要是 Send + Sync，因为 RenderGraph 只在录制线程中使用。
pub trait RgPass {
    fn name(&self) -> &str;

    /// 声明 Pass 的资源依赖，在 `add_pass` 时调用一次
    fn setup(&mut self, builder: &mut RgPassBuilder);

    /// 每帧的状态覆盖，用于角色随帧变化的资源（例如 temporal history）
    ///
    /// 只对 setup 中没有静态指定状态的资源生效
    fn required_state(&self, _resource: &str, _frame: &RgFrameContext) -> Option<RgImageState> {
        None
    }

    fn begin(&mut self, _ctx: &mut RgPassContext<'_>) {}

    /// 录制命令，命令缓冲区已经开始录制
    fn execute(&mut self, ctx: &mut RgPassContext<'_>) -> RgResult<()>;

    fn end(&mut self, _ctx: &mut RgPassContext<'_>) {}
}

/// Pass 执行时的上下文
///
/// 提供命令录制、帧信息以及按名字查询资源。
pub struct RgPassContext<'a> {
    pub cmd: &'a mut dyn GfxCommandRecorder,
    pub frame: &'a RgFrameContext,

    pass_name: &'a str,
    resources: &'a mut RgResourceRegistry,
    barrier_engine: &'a mut RgBarrierEngine,
    barrier_records: &'a mut Vec<RgBarrierRecord>,
}

// new & init
impl<'a> RgPassContext<'a> {
    pub(crate) fn new(
        cmd: &'a mut dyn GfxCommandRecorder,
        frame: &'a RgFrameContext,
        pass_name: &'a str,
        resources: &'a mut RgResourceRegistry,
        barrier_engine: &'a mut RgBarrierEngine,
        barrier_records: &'a mut Vec<RgBarrierRecord>,
    ) -> Self {
        Self {
            cmd,
            frame,
            pass_name,
            resources,
            barrier_engine,
            barrier_records,
        }
    }
}

// getters
impl RgPassContext<'_> {
    #[inline]
    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    /// 本帧 `name` 对应的 image
    #[inline]
    pub fn image(&self, name: &str) -> Option<GfxImage> {
        self.resources.resolve_image(name, self.frame)
    }

    /// 资源不存在时返回 null handle
    #[inline]
    pub fn image_view(&self, name: &str) -> vk::ImageView {
        self.image(name).map(|image| image.view).unwrap_or_default()
    }

    /// 资源不存在时返回帧尺寸
    #[inline]
    pub fn extent(&self, name: &str) -> vk::Extent2D {
        self.image(name).map(|image| image.extent).unwrap_or(self.frame.extent)
    }

    #[inline]
    pub fn state(&self, name: &str) -> Option<RgImageState> {
        self.resources.state(name, self.frame)
    }

    /// 内部资源的分配代数，变化说明图像被重新创建过
    #[inline]
    pub fn resource_generation(&self) -> u64 {
        self.resources.generation()
    }
}

// tools
impl RgPassContext<'_> {
    /// Pass 内部的状态转换（例如 ping-pong），graph 记录的状态同步更新
    pub fn transition_image(&mut self, name: &str, state: RgImageState) -> RgResult<()> {
        self.transition_images(&[(name, state)])
    }

    /// 多个资源的转换合并为一次 barrier 录制
    pub fn transition_images(&mut self, requests: &[(&str, RgImageState)]) -> RgResult<()> {
        let requests = requests.iter().map(|&(name, state)| (name, Some(state))).collect::<Vec<_>>();
        self.resources.transition(
            &mut *self.cmd,
            self.barrier_engine,
            self.frame,
            &requests,
            self.barrier_records,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_declaration_order() {
        let mut builder = RgPassBuilder::default();
        builder
            .read("depth")
            .read_as("history", RgImageState::ShaderRead)
            .write_as("color", RgImageState::ColorAttachment)
            .read_write_as("accum", RgImageState::StorageWrite);

        let reads = builder.reads().iter().map(|access| access.name.as_str()).collect::<Vec<_>>();
        assert_eq!(reads, ["depth", "history", "accum"]);
        assert_eq!(builder.reads()[0].state, None);
        assert_eq!(builder.writes()[1].state, Some(RgImageState::StorageWrite));
    }

    #[test]
    fn frame_context_carries_external_images() {
        use ash::vk::Handle;

        let image = GfxImage::external(
            vk::Image::from_raw(3),
            vk::ImageView::from_raw(4),
            vk::Extent2D { width: 2, height: 2 },
            vk::Format::B8G8R8A8_SRGB,
            vk::ImageAspectFlags::COLOR,
        );
        let frame = RgFrameContext::new(7, 1, image.extent).with_external("swapchain", image);
        assert_eq!(frame.external_image("swapchain").map(|image| image.view), Some(image.view));
        assert!(frame.external_image("other").is_none());
    }
}
