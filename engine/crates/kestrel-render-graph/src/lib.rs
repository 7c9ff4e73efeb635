//! Render Graph - 声明式渲染图系统
//!
//! 提供自动依赖分析和 barrier 生成的渲染图抽象。
//!
//! # 核心概念
//!
//! - **RgImageResource**: 按名字注册的图像资源，分为内部资源（graph 拥有内存）和外部资源（例如 swapchain image）
//! - **RgImageState**: 图像在某个时刻的使用方式，对应一个 layout 以及一组 stage/access
//! - **RgPass**: 渲染 Pass trait，在 setup 中按名字声明输入输出，在 begin/execute/end 中录制命令
//! - **RenderGraph**: 注册资源与 Pass，编译出执行顺序，并在执行时自动插入 barrier
//!
//! # 使用示例
//!
//! ```ignore
//! let mut graph = RenderGraph::new();
//! graph.add_resource("depth", RgImageDesc::new_2d(vk::Format::D32_SFLOAT, usage, extent, RgImageState::ShaderRead))?;
//! graph.add_external("swapchain", format, extent, RgImageState::Undefined, RgImageState::Present)?;
//! graph.add_pass(DepthPrepass::new(..))?;
//! graph.add_pass(TonemapPass::new(..))?;
//! graph.compile(&device)?;
//!
//! // 每帧
//! let frame = RgFrameContext::new(frame_id, slot, extent).with_external("swapchain", swapchain_image);
//! graph.execute(&mut *recorder, &frame)?;
//! ```
//!
//! # 模块结构
//!
//! - `state`: 图像状态
//! - `barrier`: 状态转换到 stage/access mask 的映射
//! - `image_resource`, `resource_registry`: 资源描述与注册表
//! - `pass`: Pass trait、builder 与执行上下文
//! - `graph`: 依赖图和拓扑排序
//! - `render_graph`: 编译与执行
//! - `stats`: 每个 Pass 的 CPU 耗时统计

pub mod barrier;
pub mod error;
pub mod graph;
pub mod image_resource;
pub mod pass;
pub mod render_graph;
pub mod resource_registry;
pub mod state;
pub mod stats;

pub use barrier::{RgBarrierEngine, RgBarrierPolicy, RgBarrierRecord};
pub use error::{RgError, RgResult};
pub use image_resource::{RgImageDesc, RgImageResource};
pub use pass::{RgFrameContext, RgPass, RgPassBuilder, RgPassContext};
pub use render_graph::RenderGraph;
pub use resource_registry::{RgImageHandle, RgResourceRegistry};
pub use state::RgImageState;
pub use stats::{RgExecutionStats, RgPassStats};
