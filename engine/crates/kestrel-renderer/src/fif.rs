use ash::vk;
use itertools::Itertools;
use kestrel_gfx::{
    commands::GfxSubmitInfo,
    device::GfxDevice,
    handles::{GfxBuffer, GfxBufferDesc, GfxCommandBuffer, GfxFence, GfxSemaphore},
};
use kestrel_render_interface::{
    frame_counter::{FrameCounter, FrameLabel},
    per_frame_data::PerFrameData,
    pipeline_settings::PipelineSettings,
    scene::CameraState,
};

use crate::error::{RendererError, RendererResult};

/// frame slot 的生命周期
///
/// `Idle → Recording → Submitted → Completed → Idle`
///
/// `Completed` 表示 fence 已经 signal，GPU 不再引用该 slot 的任何资源
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameSlotState {
    Idle,
    Recording,
    Submitted,
    Completed,
}
impl FrameSlotState {
    #[inline]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Recording)
                | (Self::Recording, Self::Submitted)
                | (Self::Submitted, Self::Completed)
                | (Self::Completed, Self::Idle)
        )
    }
}

/// 一个 frame slot 独占的资源
pub struct FrameSlot {
    label: FrameLabel,
    command_buffer: GfxCommandBuffer,
    /// 持久映射的 [`PerFrameData`]
    per_frame_buffer: GfxBuffer,
    /// 创建时即为 signaled
    fence: GfxFence,
    state: FrameSlotState,
}
// getters
impl FrameSlot {
    #[inline]
    pub fn label(&self) -> FrameLabel {
        self.label
    }

    #[inline]
    pub fn command_buffer(&self) -> &GfxCommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn per_frame_buffer(&self) -> &GfxBuffer {
        &self.per_frame_buffer
    }

    #[inline]
    pub fn fence(&self) -> &GfxFence {
        &self.fence
    }

    #[inline]
    pub fn state(&self) -> FrameSlotState {
        self.state
    }
}

/// Frame in flight 管理
///
/// CPU 录制第 K+1 帧时，GPU 可能仍在执行第 K 帧；每个 slot 的 buffer 与命令缓冲
/// 只在其 fence signal 之后才会被 CPU 再次写入。
pub struct FifManager {
    slots: Vec<FrameSlot>,
    frame_counter: FrameCounter,

    /// 上一次写入的 view projection，用于 temporal reprojection
    prev_view_projection: Option<glam::Mat4>,
}

// new & init
impl FifManager {
    pub fn new(device: &dyn GfxDevice, frame_counter: FrameCounter) -> RendererResult<Self> {
        let slots = frame_counter
            .frame_labels()
            .iter()
            .map(|&label| Self::create_slot(device, label))
            .collect::<RendererResult<Vec<_>>>()?;

        log::info!("create {} frame slots: {}", slots.len(), slots.iter().map(|slot| slot.label).join(", "));

        Ok(Self {
            slots,
            frame_counter,
            prev_view_projection: None,
        })
    }

    fn create_slot(device: &dyn GfxDevice, label: FrameLabel) -> RendererResult<FrameSlot> {
        let command_buffer = device.allocate_command_buffer(&format!("frame-{label}-cmd"))?;
        let per_frame_buffer = device.create_buffer(&GfxBufferDesc {
            name: format!("frame-{label}-per-frame-data"),
            size: size_of::<PerFrameData>() as vk::DeviceSize,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            host_visible: true,
        })?;
        // signaled，第一次使用时不需要等待
        let fence = device.create_fence(true, &format!("frame-{label}-in-flight"))?;

        Ok(FrameSlot {
            label,
            command_buffer,
            per_frame_buffer,
            fence,
            state: FrameSlotState::Completed,
        })
    }

    pub fn destroy(mut self, device: &dyn GfxDevice) -> RendererResult<()> {
        self.wait_all(device)?;
        for slot in self.slots.drain(..) {
            device.destroy_fence(slot.fence);
            device.destroy_buffer(slot.per_frame_buffer);
            device.free_command_buffer(slot.command_buffer);
        }
        Ok(())
    }
}

// getters
impl FifManager {
    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_counter.frame_id()
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.frame_counter.frame_index()
    }

    #[inline]
    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current_index()]
    }

    #[inline]
    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    #[inline]
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// 每个 slot 的 PerFrameData 地址，按 slot 索引排列
    pub fn per_frame_data_addresses(&self) -> Vec<vk::DeviceAddress> {
        self.slots.iter().map(|slot| slot.per_frame_buffer.device_address).collect_vec()
    }
}

// frame
impl FifManager {
    /// 等待当前 slot 的 fence 并重置，开始录制命令
    ///
    /// 返回当前 slot 的索引
    pub fn begin_frame(&mut self, device: &dyn GfxDevice) -> RendererResult<usize> {
        let _span = kestrel_crate_tools::profile_span!("FifManager::begin_frame");
        let index = self.current_index();

        match self.slots[index].state {
            FrameSlotState::Submitted => {
                device.wait_fence(&self.slots[index].fence, u64::MAX)?;
                self.transition(index, FrameSlotState::Completed)?;
            }
            FrameSlotState::Completed => {
                device.wait_fence(&self.slots[index].fence, u64::MAX)?;
            }
            // 上一次 begin 在 reset 之后失败
            FrameSlotState::Idle => {}
            FrameSlotState::Recording => {
                return Err(RendererError::InvalidSlotTransition {
                    slot: index,
                    from: FrameSlotState::Recording,
                    to: FrameSlotState::Recording,
                });
            }
        }

        if self.slots[index].state == FrameSlotState::Completed {
            device.reset_fence(&self.slots[index].fence)?;
            self.transition(index, FrameSlotState::Idle)?;
        }

        device.begin_command_buffer(&self.slots[index].command_buffer)?;
        self.transition(index, FrameSlotState::Recording)?;
        Ok(index)
    }

    /// 写入当前 slot 的 PerFrameData，只能在 `Recording` 状态下调用
    pub fn write_per_frame_data(
        &mut self,
        device: &dyn GfxDevice,
        camera: &CameraState,
        model: glam::Mat4,
        settings: &PipelineSettings,
        extent: vk::Extent2D,
    ) -> RendererResult<PerFrameData> {
        let index = self.current_index();
        let slot = &self.slots[index];
        match slot.state {
            FrameSlotState::Recording => {}
            FrameSlotState::Submitted => return Err(RendererError::SlotFenceNotWaited(index)),
            _ => return Err(RendererError::SlotNotRecording(index)),
        }

        let view_projection = camera.view_projection();
        let prev_view_projection = self.prev_view_projection.unwrap_or(view_projection);
        let data = PerFrameData::new(camera, model, prev_view_projection, settings, self.frame_id(), extent);
        device.write_buffer(&slot.per_frame_buffer, 0, data.as_bytes())?;

        self.prev_view_projection = Some(view_projection);
        Ok(data)
    }

    /// 结束录制并提交，完成时 signal `signal_semaphores` 与 slot 的 fence
    pub fn submit(&mut self, device: &dyn GfxDevice, signal_semaphores: &[GfxSemaphore]) -> RendererResult<()> {
        let index = self.current_index();
        let slot = &self.slots[index];
        if slot.state != FrameSlotState::Recording {
            return Err(RendererError::SlotNotRecording(index));
        }

        device.end_command_buffer(&slot.command_buffer)?;
        let submit_info = signal_semaphores.iter().fold(
            GfxSubmitInfo::new(std::slice::from_ref(&slot.command_buffer)),
            |info, semaphore| info.signal(semaphore, vk::PipelineStageFlags2::ALL_COMMANDS, None),
        );
        device.submit(&submit_info, Some(&slot.fence))?;

        self.transition(index, FrameSlotState::Submitted)
    }

    /// 放弃当前 slot 的录制（例如呈现表面过期），命令缓冲被结束但不提交
    ///
    /// fence 已经被重置，slot 停留在 `Idle`，下一次 begin 时不再等待
    pub fn abandon_frame(&mut self, device: &dyn GfxDevice) -> RendererResult<()> {
        let index = self.current_index();
        if self.slots[index].state != FrameSlotState::Recording {
            return Err(RendererError::SlotNotRecording(index));
        }
        device.end_command_buffer(&self.slots[index].command_buffer)?;
        self.slots[index].state = FrameSlotState::Idle;
        log::debug!("frame slot {} abandoned", self.slots[index].label);
        Ok(())
    }

    #[inline]
    pub fn advance(&mut self) {
        self.frame_counter.next_frame();
    }

    /// 等待所有已提交的 slot
    pub fn wait_all(&mut self, device: &dyn GfxDevice) -> RendererResult<()> {
        for index in 0..self.slots.len() {
            if self.slots[index].state == FrameSlotState::Submitted {
                device.wait_fence(&self.slots[index].fence, u64::MAX)?;
                self.transition(index, FrameSlotState::Completed)?;
            }
        }
        Ok(())
    }

    fn transition(&mut self, index: usize, to: FrameSlotState) -> RendererResult<()> {
        let slot = &mut self.slots[index];
        let from = slot.state;
        if !from.can_transition_to(to) {
            if from == FrameSlotState::Submitted && to == FrameSlotState::Idle {
                return Err(RendererError::SlotFenceNotWaited(index));
            }
            return Err(RendererError::InvalidSlotTransition { slot: index, from, to });
        }
        log::trace!("frame slot {}: {:?} -> {:?}", slot.label, from, to);
        slot.state = to;
        Ok(())
    }
}
