//! 设备抽象
//!
//! 设备、分配器与 command pool 都由实现者独占，通过 `&self` 借给上层使用，
//! 因此所有方法都只需要共享引用；实现内部自行处理可变状态。

use ash::vk;

use crate::{
    barrier::{GfxBarrierMask, GfxBufferBarrier, GfxImageBarrier},
    commands::{GfxDrawIndexed, GfxImageBinding, GfxPipeline, GfxRenderingInfo, GfxSubmitInfo, GfxTlasUpdate},
    error::GfxResult,
    handles::{GfxBuffer, GfxBufferDesc, GfxCommandBuffer, GfxFence, GfxImage, GfxImageDesc, GfxSemaphore},
};

pub trait GfxDevice {
    // resources
    fn create_image(&self, desc: &GfxImageDesc) -> GfxResult<GfxImage>;
    fn destroy_image(&self, image: GfxImage);
    fn create_buffer(&self, desc: &GfxBufferDesc) -> GfxResult<GfxBuffer>;
    fn destroy_buffer(&self, buffer: GfxBuffer);
    /// 写入持久映射的 buffer
    fn write_buffer(&self, buffer: &GfxBuffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()>;

    // sync
    fn create_fence(&self, signaled: bool, debug_name: &str) -> GfxResult<GfxFence>;
    fn destroy_fence(&self, fence: GfxFence);
    /// 阻塞等待 fence，`timeout` 单位为纳秒
    fn wait_fence(&self, fence: &GfxFence, timeout: u64) -> GfxResult<()>;
    fn reset_fence(&self, fence: &GfxFence) -> GfxResult<()>;
    fn fence_signaled(&self, fence: &GfxFence) -> GfxResult<bool>;
    fn create_semaphore(&self, debug_name: &str) -> GfxResult<GfxSemaphore>;
    fn destroy_semaphore(&self, semaphore: GfxSemaphore);

    // commands
    fn allocate_command_buffer(&self, debug_name: &str) -> GfxResult<GfxCommandBuffer>;
    fn free_command_buffer(&self, command_buffer: GfxCommandBuffer);
    /// 重置并以 one-time-submit 方式开始录制
    fn begin_command_buffer(&self, command_buffer: &GfxCommandBuffer) -> GfxResult<()>;
    fn end_command_buffer(&self, command_buffer: &GfxCommandBuffer) -> GfxResult<()>;
    fn command_recorder<'a>(&'a self, command_buffer: &GfxCommandBuffer) -> Box<dyn GfxCommandRecorder + 'a>;

    // queue
    fn submit(&self, submit_info: &GfxSubmitInfo, fence: Option<&GfxFence>) -> GfxResult<()>;
    fn wait_idle(&self) -> GfxResult<()>;
}

/// 向一个正在录制的命令缓冲写入命令
pub trait GfxCommandRecorder {
    fn begin_label(&mut self, label: &str, color: [f32; 4]);
    fn end_label(&mut self);

    /// 一次调用内的所有 barrier 会合并为一个 `vkCmdPipelineBarrier2`
    fn image_barriers(&mut self, barriers: &[GfxImageBarrier]);
    fn buffer_barriers(&mut self, barriers: &[GfxBufferBarrier]);
    fn memory_barrier(&mut self, mask: GfxBarrierMask);

    /// 同时设置覆盖整个渲染区域的 viewport 与 scissor
    fn begin_rendering(&mut self, info: &GfxRenderingInfo);
    fn end_rendering(&mut self);

    fn bind_pipeline(&mut self, pipeline: &GfxPipeline);
    fn push_images(&mut self, pipeline: &GfxPipeline, set: u32, bindings: &[GfxImageBinding]);
    fn bind_descriptor_set(&mut self, pipeline: &GfxPipeline, set: u32, descriptor_set: vk::DescriptorSet);
    fn push_constants(&mut self, pipeline: &GfxPipeline, offset: u32, data: &[u8]);
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize);
    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType);

    fn draw(&mut self, vertex_count: u32, instance_count: u32);
    fn draw_indexed(&mut self, draw: &GfxDrawIndexed);
    fn draw_indexed_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, draw_count: u32, stride: u32);
    fn dispatch(&mut self, group_count: [u32; 3]);
    fn build_tlas(&mut self, update: &GfxTlasUpdate);
}

/// 计算 dispatch 的 group 数量：向上取整
#[inline]
pub fn dispatch_group_count(extent: vk::Extent2D, local_size: [u32; 2]) -> [u32; 3] {
    [extent.width.div_ceil(local_size[0]), extent.height.div_ceil(local_size[1]), 1]
}
