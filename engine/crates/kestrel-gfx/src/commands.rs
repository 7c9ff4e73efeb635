//! 录制与提交命令时使用的参数结构

use ash::vk;
use itertools::Itertools;

use crate::handles::{GfxCommandBuffer, GfxSemaphore};

/// Gfx 关于 submitInfo 的封装，更易用
#[derive(Default, Clone, Debug)]
pub struct GfxSubmitInfo {
    command_buffers: Vec<vk::CommandBuffer>,
    wait_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
    signal_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
}

impl GfxSubmitInfo {
    pub fn new(commands: &[GfxCommandBuffer]) -> Self {
        Self {
            command_buffers: commands.iter().map(|cmd| cmd.handle()).collect_vec(),
            wait_infos: vec![],
            signal_infos: vec![],
        }
    }

    #[inline]
    pub fn wait(mut self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.wait_infos.push(
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore.handle())
                .stage_mask(stage)
                .value(value.unwrap_or_default()),
        );
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.signal_infos.push(
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore.handle())
                .stage_mask(stage)
                .value(value.unwrap_or_default()),
        );
        self
    }
}
// getters
impl GfxSubmitInfo {
    #[inline]
    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }

    pub fn wait_semaphores(&self) -> impl Iterator<Item = vk::Semaphore> + '_ {
        self.wait_infos.iter().map(|info| info.semaphore)
    }

    pub fn signal_semaphores(&self) -> impl Iterator<Item = vk::Semaphore> + '_ {
        self.signal_infos.iter().map(|info| info.semaphore)
    }

    /// 组装 `vk::SubmitInfo2`，借用的 vec 需要在提交完成前一直存活
    pub fn vk_infos<'a>(&'a self, cmd_infos: &'a [vk::CommandBufferSubmitInfo<'a>]) -> vk::SubmitInfo2<'a> {
        vk::SubmitInfo2::default()
            .command_buffer_infos(cmd_infos)
            .wait_semaphore_infos(&self.wait_infos)
            .signal_semaphore_infos(&self.signal_infos)
    }

    pub fn vk_command_buffer_infos(&self) -> Vec<vk::CommandBufferSubmitInfo<'static>> {
        self.command_buffers
            .iter()
            .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(*cmd))
            .collect_vec()
    }
}

/// 避免直接使用 `vk::ClearValue` 这个 union
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GfxClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}
impl GfxClearValue {
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            Self::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            Self::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GfxAttachment {
    pub view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear: GfxClearValue,
}
impl GfxAttachment {
    /// 清空后写入
    pub fn clear(view: vk::ImageView, layout: vk::ImageLayout, clear: GfxClearValue) -> Self {
        Self {
            view,
            layout,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear,
        }
    }

    /// 保留已有内容继续写入
    pub fn load(view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        Self {
            view,
            layout,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear: GfxClearValue::Color([0.0; 4]),
        }
    }

    /// 只读的深度附件
    pub fn read_only(view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        Self {
            store_op: vk::AttachmentStoreOp::NONE,
            ..Self::load(view, layout)
        }
    }

    pub fn to_vk(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.view)
            .image_layout(self.layout)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(self.clear.to_vk())
    }
}

/// dynamic rendering 的参数，viewport 与 scissor 覆盖整个 `extent`
#[derive(Clone, Debug, Default)]
pub struct GfxRenderingInfo {
    pub extent: vk::Extent2D,
    pub color_attachments: Vec<GfxAttachment>,
    pub depth_attachment: Option<GfxAttachment>,
}

/// 由外部（shader loader）创建的 pipeline，这里只按引用绑定
#[derive(Clone, Copy, Debug)]
pub struct GfxPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
    pub push_constant_stages: vk::ShaderStageFlags,
}
impl GfxPipeline {
    pub fn graphics(pipeline: vk::Pipeline, layout: vk::PipelineLayout) -> Self {
        Self {
            pipeline,
            layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            push_constant_stages: vk::ShaderStageFlags::ALL_GRAPHICS,
        }
    }

    pub fn compute(pipeline: vk::Pipeline, layout: vk::PipelineLayout) -> Self {
        Self {
            pipeline,
            layout,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            push_constant_stages: vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// 通过 push descriptor 绑定的 image
#[derive(Clone, Copy, Debug)]
pub struct GfxImageBinding {
    pub binding: u32,
    pub view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub descriptor_type: vk::DescriptorType,
    pub sampler: vk::Sampler,
}
impl GfxImageBinding {
    pub fn storage(binding: u32, view: vk::ImageView) -> Self {
        Self {
            binding,
            view,
            layout: vk::ImageLayout::GENERAL,
            descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
            sampler: vk::Sampler::null(),
        }
    }

    pub fn sampled(binding: u32, view: vk::ImageView, sampler: vk::Sampler) -> Self {
        Self {
            binding,
            view,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            sampler,
        }
    }
}

/// 每帧 TLAS refit 的参数
#[derive(Clone, Copy, Debug)]
pub struct GfxTlasUpdate {
    pub tlas: vk::AccelerationStructureKHR,
    pub instance_data: vk::DeviceAddress,
    pub instance_count: u32,
    pub scratch_data: vk::DeviceAddress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxDrawIndexed {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}
