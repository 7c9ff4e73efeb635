//! 记录所有调用的 mock 后端
//!
//! 没有 GPU 时用来驱动 render graph 与帧同步：每一次设备调用、每一条录制的命令
//! 都会按顺序追加到共享的事件日志中，测试直接断言这个日志。
//!
//! fence 的模拟规则：
//! - submit 时 fence 必须是 unsignaled，之后进入 pending
//! - wait pending 的 fence 立即完成（模拟 GPU 执行完毕）
//! - wait 一个从未提交过的 unsignaled fence 返回 [`GfxError::Timeout`]

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    rc::Rc,
};

use ash::vk::{self, Handle};
use slotmap::SlotMap;

use crate::{
    barrier::{GfxBarrierMask, GfxBufferBarrier, GfxImageBarrier},
    commands::{GfxDrawIndexed, GfxImageBinding, GfxPipeline, GfxRenderingInfo, GfxSubmitInfo, GfxTlasUpdate},
    device::{GfxCommandRecorder, GfxDevice},
    error::{GfxError, GfxResult},
    handles::{
        GfxAllocationHandle, GfxBuffer, GfxBufferDesc, GfxCommandBuffer, GfxFence, GfxImage, GfxImageDesc,
        GfxSemaphore,
    },
    swapchain::{GfxAcquireResult, GfxPresentResult, GfxPresentSurface},
};

#[derive(Clone, Debug, PartialEq)]
pub struct MockImageBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub mask: GfxBarrierMask,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MockCommand {
    BeginLabel(String),
    EndLabel,
    ImageBarriers(Vec<MockImageBarrier>),
    BufferBarriers(Vec<vk::Buffer>),
    MemoryBarrier(GfxBarrierMask),
    BeginRendering {
        extent: vk::Extent2D,
        color_views: Vec<vk::ImageView>,
        depth_view: Option<vk::ImageView>,
    },
    EndRendering,
    BindPipeline(vk::Pipeline),
    PushImages(Vec<(u32, vk::ImageView, vk::ImageLayout)>),
    BindDescriptorSet {
        set: u32,
        descriptor_set: vk::DescriptorSet,
    },
    PushConstants {
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed(GfxDrawIndexed),
    DrawIndexedIndirect {
        buffer: vk::Buffer,
        draw_count: u32,
    },
    Dispatch([u32; 3]),
    BuildTlas(vk::AccelerationStructureKHR),
}

#[derive(Clone, Debug, PartialEq)]
pub enum MockEvent {
    CreateImage { name: String, image: vk::Image, extent: vk::Extent2D },
    DestroyImage(vk::Image),
    CreateBuffer { name: String, buffer: vk::Buffer },
    DestroyBuffer(vk::Buffer),
    WriteBuffer { buffer: vk::Buffer, offset: vk::DeviceSize, size: usize },
    CreateFence { fence: vk::Fence, signaled: bool },
    DestroyFence(vk::Fence),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    Command { command_buffer: vk::CommandBuffer, command: MockCommand },
    Submit {
        command_buffers: Vec<vk::CommandBuffer>,
        wait: Vec<vk::Semaphore>,
        signal: Vec<vk::Semaphore>,
        fence: Option<vk::Fence>,
    },
    WaitIdle,
    Acquire { image_index: u32, fence: vk::Fence },
    Present { image_index: u32, wait: Vec<vk::Semaphore> },
    RecreateSurface(vk::Extent2D),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockFenceState {
    Unsignaled,
    Pending,
    Signaled,
}

/// device 与 surface 共享的模拟状态
#[derive(Default)]
struct MockShared {
    events: RefCell<Vec<MockEvent>>,
    next_handle: Cell<u64>,
    fences: RefCell<HashMap<vk::Fence, MockFenceState>>,
}
impl MockShared {
    fn next_raw(&self) -> u64 {
        let raw = self.next_handle.get() + 1;
        self.next_handle.set(raw);
        raw
    }

    fn push(&self, event: MockEvent) {
        self.events.borrow_mut().push(event);
    }
}

#[derive(Default)]
pub struct MockGfxDevice {
    shared: Rc<MockShared>,
    allocations: RefCell<SlotMap<GfxAllocationHandle, String>>,
    buffer_contents: RefCell<HashMap<vk::Buffer, Vec<u8>>>,
    live_images: RefCell<HashSet<vk::Image>>,
}

// new & init
impl MockGfxDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建与该 device 共享 fence 状态和事件日志的呈现表面
    pub fn create_present_surface(&self, extent: vk::Extent2D, image_count: u32) -> MockPresentSurface {
        let mut surface = MockPresentSurface {
            shared: self.shared.clone(),
            images: vec![],
            extent,
            format: vk::Format::B8G8R8A8_SRGB,
            next_index: 0,
            out_of_date_acquires: 0,
            queued_present_results: vec![],
        };
        surface.create_images(image_count);
        surface
    }
}

// getters
impl MockGfxDevice {
    /// 当前事件日志的快照
    pub fn events(&self) -> Vec<MockEvent> {
        self.shared.events.borrow().clone()
    }

    pub fn take_events(&self) -> Vec<MockEvent> {
        std::mem::take(&mut *self.shared.events.borrow_mut())
    }

    pub fn clear_events(&self) {
        self.shared.events.borrow_mut().clear();
    }

    /// 所有录制过的命令，按录制顺序
    pub fn commands(&self) -> Vec<MockCommand> {
        self.shared
            .events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                MockEvent::Command { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fence_state(&self, fence: &GfxFence) -> Option<MockFenceState> {
        self.shared.fences.borrow().get(&fence.handle()).copied()
    }

    pub fn buffer_contents(&self, buffer: &GfxBuffer) -> Vec<u8> {
        self.buffer_contents.borrow().get(&buffer.handle).cloned().unwrap_or_default()
    }

    pub fn live_image_count(&self) -> usize {
        self.live_images.borrow().len()
    }
}

impl GfxDevice for MockGfxDevice {
    fn create_image(&self, desc: &GfxImageDesc) -> GfxResult<GfxImage> {
        let image = vk::Image::from_raw(self.shared.next_raw());
        let view = vk::ImageView::from_raw(self.shared.next_raw());
        let allocation = self.allocations.borrow_mut().insert(desc.name.clone());
        self.live_images.borrow_mut().insert(image);
        self.shared.push(MockEvent::CreateImage {
            name: desc.name.clone(),
            image,
            extent: desc.extent,
        });
        Ok(GfxImage {
            handle: image,
            view,
            allocation: Some(allocation),
            extent: desc.extent,
            format: desc.format,
            aspect: desc.aspect,
        })
    }

    fn destroy_image(&self, image: GfxImage) {
        if let Some(allocation) = image.allocation {
            self.allocations.borrow_mut().remove(allocation);
        }
        self.live_images.borrow_mut().remove(&image.handle);
        self.shared.push(MockEvent::DestroyImage(image.handle));
    }

    fn create_buffer(&self, desc: &GfxBufferDesc) -> GfxResult<GfxBuffer> {
        let handle = vk::Buffer::from_raw(self.shared.next_raw());
        let allocation = self.allocations.borrow_mut().insert(desc.name.clone());
        self.buffer_contents.borrow_mut().insert(handle, vec![0; desc.size as usize]);
        self.shared.push(MockEvent::CreateBuffer {
            name: desc.name.clone(),
            buffer: handle,
        });
        Ok(GfxBuffer {
            handle,
            allocation,
            size: desc.size,
            device_address: 0,
        })
    }

    fn destroy_buffer(&self, buffer: GfxBuffer) {
        self.allocations.borrow_mut().remove(buffer.allocation);
        self.buffer_contents.borrow_mut().remove(&buffer.handle);
        self.shared.push(MockEvent::DestroyBuffer(buffer.handle));
    }

    fn write_buffer(&self, buffer: &GfxBuffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let mut contents = self.buffer_contents.borrow_mut();
        let bytes = contents.get_mut(&buffer.handle).ok_or(GfxError::UnknownAllocation)?;
        let begin = offset as usize;
        let end = begin + data.len();
        if end > bytes.len() {
            return Err(GfxError::Vk(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        bytes[begin..end].copy_from_slice(data);
        self.shared.push(MockEvent::WriteBuffer {
            buffer: buffer.handle,
            offset,
            size: data.len(),
        });
        Ok(())
    }

    fn create_fence(&self, signaled: bool, _debug_name: &str) -> GfxResult<GfxFence> {
        let fence = vk::Fence::from_raw(self.shared.next_raw());
        let state = if signaled { MockFenceState::Signaled } else { MockFenceState::Unsignaled };
        self.shared.fences.borrow_mut().insert(fence, state);
        self.shared.push(MockEvent::CreateFence { fence, signaled });
        Ok(GfxFence::new(fence))
    }

    fn destroy_fence(&self, fence: GfxFence) {
        self.shared.fences.borrow_mut().remove(&fence.handle());
        self.shared.push(MockEvent::DestroyFence(fence.handle()));
    }

    fn wait_fence(&self, fence: &GfxFence, _timeout: u64) -> GfxResult<()> {
        let mut fences = self.shared.fences.borrow_mut();
        let state = fences.get_mut(&fence.handle()).ok_or(GfxError::Vk(vk::Result::ERROR_UNKNOWN))?;
        match *state {
            MockFenceState::Unsignaled => return Err(GfxError::Timeout),
            MockFenceState::Pending | MockFenceState::Signaled => *state = MockFenceState::Signaled,
        }
        drop(fences);
        self.shared.push(MockEvent::WaitFence(fence.handle()));
        Ok(())
    }

    fn reset_fence(&self, fence: &GfxFence) -> GfxResult<()> {
        let mut fences = self.shared.fences.borrow_mut();
        let state = fences.get_mut(&fence.handle()).ok_or(GfxError::Vk(vk::Result::ERROR_UNKNOWN))?;
        if *state == MockFenceState::Pending {
            // 重置仍在使用中的 fence 是非法的
            return Err(GfxError::Vk(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        *state = MockFenceState::Unsignaled;
        drop(fences);
        self.shared.push(MockEvent::ResetFence(fence.handle()));
        Ok(())
    }

    fn fence_signaled(&self, fence: &GfxFence) -> GfxResult<bool> {
        Ok(self.fence_state(fence) == Some(MockFenceState::Signaled))
    }

    fn create_semaphore(&self, _debug_name: &str) -> GfxResult<GfxSemaphore> {
        Ok(GfxSemaphore::new(vk::Semaphore::from_raw(self.shared.next_raw())))
    }

    fn destroy_semaphore(&self, _semaphore: GfxSemaphore) {}

    fn allocate_command_buffer(&self, debug_name: &str) -> GfxResult<GfxCommandBuffer> {
        Ok(GfxCommandBuffer::new(vk::CommandBuffer::from_raw(self.shared.next_raw()), debug_name))
    }

    fn free_command_buffer(&self, _command_buffer: GfxCommandBuffer) {}

    fn begin_command_buffer(&self, command_buffer: &GfxCommandBuffer) -> GfxResult<()> {
        self.shared.push(MockEvent::BeginCommandBuffer(command_buffer.handle()));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: &GfxCommandBuffer) -> GfxResult<()> {
        self.shared.push(MockEvent::EndCommandBuffer(command_buffer.handle()));
        Ok(())
    }

    fn command_recorder<'a>(&'a self, command_buffer: &GfxCommandBuffer) -> Box<dyn GfxCommandRecorder + 'a> {
        Box::new(MockCommandRecorder {
            shared: self.shared.clone(),
            command_buffer: command_buffer.handle(),
        })
    }

    fn submit(&self, submit_info: &GfxSubmitInfo, fence: Option<&GfxFence>) -> GfxResult<()> {
        if let Some(fence) = fence {
            let mut fences = self.shared.fences.borrow_mut();
            let state = fences.get_mut(&fence.handle()).ok_or(GfxError::Vk(vk::Result::ERROR_UNKNOWN))?;
            if *state != MockFenceState::Unsignaled {
                return Err(GfxError::Vk(vk::Result::ERROR_VALIDATION_FAILED_EXT));
            }
            *state = MockFenceState::Pending;
        }
        self.shared.push(MockEvent::Submit {
            command_buffers: submit_info.command_buffers().to_vec(),
            wait: submit_info.wait_semaphores().collect(),
            signal: submit_info.signal_semaphores().collect(),
            fence: fence.map(|f| f.handle()),
        });
        Ok(())
    }

    fn wait_idle(&self) -> GfxResult<()> {
        for state in self.shared.fences.borrow_mut().values_mut() {
            if *state == MockFenceState::Pending {
                *state = MockFenceState::Signaled;
            }
        }
        self.shared.push(MockEvent::WaitIdle);
        Ok(())
    }
}

pub struct MockCommandRecorder {
    shared: Rc<MockShared>,
    command_buffer: vk::CommandBuffer,
}
impl MockCommandRecorder {
    fn record(&mut self, command: MockCommand) {
        self.shared.push(MockEvent::Command {
            command_buffer: self.command_buffer,
            command,
        });
    }
}

impl GfxCommandRecorder for MockCommandRecorder {
    fn begin_label(&mut self, label: &str, _color: [f32; 4]) {
        self.record(MockCommand::BeginLabel(label.to_string()));
    }

    fn end_label(&mut self) {
        self.record(MockCommand::EndLabel);
    }

    fn image_barriers(&mut self, barriers: &[GfxImageBarrier]) {
        let barriers = barriers
            .iter()
            .map(|barrier| MockImageBarrier {
                image: barrier.image_handle(),
                old_layout: barrier.old_layout(),
                new_layout: barrier.new_layout(),
                mask: barrier.barrier_mask(),
            })
            .collect();
        self.record(MockCommand::ImageBarriers(barriers));
    }

    fn buffer_barriers(&mut self, barriers: &[GfxBufferBarrier]) {
        self.record(MockCommand::BufferBarriers(barriers.iter().map(|b| b.buffer_handle()).collect()));
    }

    fn memory_barrier(&mut self, mask: GfxBarrierMask) {
        self.record(MockCommand::MemoryBarrier(mask));
    }

    fn begin_rendering(&mut self, info: &GfxRenderingInfo) {
        self.record(MockCommand::BeginRendering {
            extent: info.extent,
            color_views: info.color_attachments.iter().map(|a| a.view).collect(),
            depth_view: info.depth_attachment.map(|a| a.view),
        });
    }

    fn end_rendering(&mut self) {
        self.record(MockCommand::EndRendering);
    }

    fn bind_pipeline(&mut self, pipeline: &GfxPipeline) {
        self.record(MockCommand::BindPipeline(pipeline.pipeline));
    }

    fn push_images(&mut self, _pipeline: &GfxPipeline, _set: u32, bindings: &[GfxImageBinding]) {
        self.record(MockCommand::PushImages(bindings.iter().map(|b| (b.binding, b.view, b.layout)).collect()));
    }

    fn bind_descriptor_set(&mut self, _pipeline: &GfxPipeline, set: u32, descriptor_set: vk::DescriptorSet) {
        self.record(MockCommand::BindDescriptorSet { set, descriptor_set });
    }

    fn push_constants(&mut self, _pipeline: &GfxPipeline, offset: u32, data: &[u8]) {
        self.record(MockCommand::PushConstants {
            offset,
            data: data.to_vec(),
        });
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer, _offset: vk::DeviceSize) {
        self.record(MockCommand::BindVertexBuffer(buffer));
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, _offset: vk::DeviceSize, _index_type: vk::IndexType) {
        self.record(MockCommand::BindIndexBuffer(buffer));
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.record(MockCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed(&mut self, draw: &GfxDrawIndexed) {
        self.record(MockCommand::DrawIndexed(*draw));
    }

    fn draw_indexed_indirect(&mut self, buffer: vk::Buffer, _offset: vk::DeviceSize, draw_count: u32, _stride: u32) {
        self.record(MockCommand::DrawIndexedIndirect { buffer, draw_count });
    }

    fn dispatch(&mut self, group_count: [u32; 3]) {
        self.record(MockCommand::Dispatch(group_count));
    }

    fn build_tlas(&mut self, update: &GfxTlasUpdate) {
        self.record(MockCommand::BuildTlas(update.tlas));
    }
}

pub struct MockPresentSurface {
    shared: Rc<MockShared>,
    images: Vec<GfxImage>,
    extent: vk::Extent2D,
    format: vk::Format,
    next_index: u32,
    out_of_date_acquires: u32,
    queued_present_results: Vec<GfxPresentResult>,
}

// tools
impl MockPresentSurface {
    fn create_images(&mut self, count: u32) {
        self.images = (0..count)
            .map(|_| {
                GfxImage::external(
                    vk::Image::from_raw(self.shared.next_raw()),
                    vk::ImageView::from_raw(self.shared.next_raw()),
                    self.extent,
                    self.format,
                    vk::ImageAspectFlags::COLOR,
                )
            })
            .collect();
        self.next_index = 0;
    }

    /// 接下来的 `count` 次 acquire 返回 OutOfDate
    pub fn fail_acquires(&mut self, count: u32) {
        self.out_of_date_acquires = count;
    }

    /// 下一次 present 返回指定结果
    pub fn queue_present_result(&mut self, result: GfxPresentResult) {
        self.queued_present_results.push(result);
    }
}

impl GfxPresentSurface for MockPresentSurface {
    fn acquire_next_image(&mut self, fence: &GfxFence) -> GfxResult<GfxAcquireResult> {
        if self.out_of_date_acquires > 0 {
            self.out_of_date_acquires -= 1;
            return Ok(GfxAcquireResult::OutOfDate);
        }

        {
            let mut fences = self.shared.fences.borrow_mut();
            let state = fences.get_mut(&fence.handle()).ok_or(GfxError::Vk(vk::Result::ERROR_UNKNOWN))?;
            if *state != MockFenceState::Unsignaled {
                return Err(GfxError::Vk(vk::Result::ERROR_VALIDATION_FAILED_EXT));
            }
            *state = MockFenceState::Pending;
        }

        let image_index = self.next_index;
        self.next_index = (self.next_index + 1) % self.images.len() as u32;
        self.shared.push(MockEvent::Acquire {
            image_index,
            fence: fence.handle(),
        });
        Ok(GfxAcquireResult::Acquired {
            index: image_index,
            suboptimal: false,
        })
    }

    fn present(&mut self, image_index: u32, wait_semaphores: &[GfxSemaphore]) -> GfxResult<GfxPresentResult> {
        self.shared.push(MockEvent::Present {
            image_index,
            wait: wait_semaphores.iter().map(|s| s.handle()).collect(),
        });
        if self.queued_present_results.is_empty() {
            Ok(GfxPresentResult::Presented)
        } else {
            Ok(self.queued_present_results.remove(0))
        }
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> GfxResult<()> {
        self.extent = extent;
        let count = self.images.len() as u32;
        self.create_images(count);
        self.shared.push(MockEvent::RecreateSurface(extent));
        Ok(())
    }

    fn image(&self, index: u32) -> GfxImage {
        self.images[index as usize]
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_lifecycle_follows_submit_and_wait() {
        let device = MockGfxDevice::new();
        let fence = device.create_fence(true, "fif").unwrap();

        // signaled fence 不能直接提交
        assert!(device.submit(&GfxSubmitInfo::default(), Some(&fence)).is_err());

        device.wait_fence(&fence, u64::MAX).unwrap();
        device.reset_fence(&fence).unwrap();
        assert!(matches!(device.wait_fence(&fence, u64::MAX), Err(GfxError::Timeout)));

        device.submit(&GfxSubmitInfo::default(), Some(&fence)).unwrap();
        assert_eq!(device.fence_state(&fence), Some(MockFenceState::Pending));
        assert!(device.reset_fence(&fence).is_err());
        device.wait_fence(&fence, u64::MAX).unwrap();
        assert!(device.fence_signaled(&fence).unwrap());
    }

    #[test]
    fn recorder_logs_commands_in_order() {
        let device = MockGfxDevice::new();
        let cmd = device.allocate_command_buffer("cmd").unwrap();
        {
            let mut recorder = device.command_recorder(&cmd);
            recorder.begin_label("pass", [1.0; 4]);
            recorder.dispatch([4, 4, 1]);
            recorder.end_label();
        }
        assert_eq!(
            device.commands(),
            vec![MockCommand::BeginLabel("pass".to_string()), MockCommand::Dispatch([4, 4, 1]), MockCommand::EndLabel]
        );
    }

    #[test]
    fn surface_rotates_images_and_can_go_stale() {
        let device = MockGfxDevice::new();
        let mut surface = device.create_present_surface(vk::Extent2D { width: 64, height: 32 }, 3);
        let fence = device.create_fence(false, "acquire").unwrap();

        let mut indices = vec![];
        for _ in 0..4 {
            match surface.acquire_next_image(&fence).unwrap() {
                GfxAcquireResult::Acquired { index, .. } => indices.push(index),
                GfxAcquireResult::OutOfDate => unreachable!(),
            }
            device.wait_fence(&fence, u64::MAX).unwrap();
            device.reset_fence(&fence).unwrap();
        }
        assert_eq!(indices, vec![0, 1, 2, 0]);

        surface.fail_acquires(1);
        assert_eq!(surface.acquire_next_image(&fence).unwrap(), GfxAcquireResult::OutOfDate);

        let old = surface.image(0).handle;
        surface.recreate(vk::Extent2D { width: 128, height: 64 }).unwrap();
        assert_ne!(surface.image(0).handle, old);
        assert_eq!(surface.extent().width, 128);
    }

    #[test]
    fn buffer_writes_are_bounds_checked() {
        let device = MockGfxDevice::new();
        let buffer = device
            .create_buffer(&GfxBufferDesc {
                name: "ubo".to_string(),
                size: 8,
                usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                host_visible: true,
            })
            .unwrap();
        device.write_buffer(&buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.buffer_contents(&buffer), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(device.write_buffer(&buffer, 6, &[0; 4]).is_err());
    }
}
