use std::cell::RefCell;

use ash::vk;
use slotmap::SlotMap;
use vk_mem::Alloc;

use crate::{
    commands::GfxSubmitInfo,
    device::{GfxCommandRecorder, GfxDevice},
    error::{GfxError, GfxResult},
    handles::{
        GfxAllocationHandle, GfxBuffer, GfxBufferDesc, GfxCommandBuffer, GfxFence, GfxImage, GfxImageDesc,
        GfxSemaphore,
    },
    vulkan::{VulkanCommandRecorder, VulkanCore},
};

struct VulkanAllocation {
    allocation: vk_mem::Allocation,
    /// host visible 的 buffer 在创建时映射，直到销毁时才解除映射
    mapped: Option<*mut u8>,
    size: vk::DeviceSize,
}

/// [`GfxDevice`] 的 Vulkan 实现
///
/// 独占 device、allocator 与 command pool，其它组件只通过 `&VulkanDevice` 使用
pub struct VulkanDevice {
    allocations: RefCell<SlotMap<GfxAllocationHandle, VulkanAllocation>>,
    command_pool: vk::CommandPool,
    pub(crate) core: VulkanCore,
}

// new & init
impl VulkanDevice {
    pub fn new(core: VulkanCore) -> GfxResult<Self> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(core.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { core.device.create_command_pool(&pool_ci, None)? };
        core.set_debug_name(command_pool, "kestrel-command-pool");

        Ok(Self {
            allocations: RefCell::new(SlotMap::with_key()),
            command_pool,
            core,
        })
    }
}

// getters
impl VulkanDevice {
    #[inline]
    pub fn core(&self) -> &VulkanCore {
        &self.core
    }
}

impl GfxDevice for VulkanDevice {
    fn create_image(&self, desc: &GfxImageDesc) -> GfxResult<GfxImage> {
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, allocation) = unsafe { self.core.allocator.create_image(&image_ci, &alloc_ci)? };

        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.core.device.create_image_view(&view_ci, None)? };

        self.core.set_debug_name(image, &format!("Image::{}", desc.name));
        self.core.set_debug_name(view, &format!("ImageView::{}", desc.name));

        let allocation = self.allocations.borrow_mut().insert(VulkanAllocation {
            allocation,
            mapped: None,
            size: 0,
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
        let Some(handle) = image.allocation else {
            log::warn!("external image {:?} is not owned by the device", image.handle);
            return;
        };
        let Some(mut allocation) = self.allocations.borrow_mut().remove(handle) else {
            log::error!("image {:?} was already destroyed", image.handle);
            return;
        };
        unsafe {
            self.core.device.destroy_image_view(image.view, None);
            self.core.allocator.destroy_image(image.handle, &mut allocation.allocation);
        }
    }

    fn create_buffer(&self, desc: &GfxBufferDesc) -> GfxResult<GfxBuffer> {
        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size).usage(desc.usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if desc.host_visible {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };
        let (buffer, mut allocation) = unsafe { self.core.allocator.create_buffer(&buffer_ci, &alloc_ci)? };

        let mapped = if desc.host_visible {
            Some(unsafe { self.core.allocator.map_memory(&mut allocation)? })
        } else {
            None
        };

        let device_address = if desc.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            unsafe {
                self.core.device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
            }
        } else {
            0
        };

        self.core.set_debug_name(buffer, &format!("Buffer::{}", desc.name));
        let allocation = self.allocations.borrow_mut().insert(VulkanAllocation {
            allocation,
            mapped,
            size: desc.size,
        });
        Ok(GfxBuffer {
            handle: buffer,
            allocation,
            size: desc.size,
            device_address,
        })
    }

    fn destroy_buffer(&self, buffer: GfxBuffer) {
        let Some(mut allocation) = self.allocations.borrow_mut().remove(buffer.allocation) else {
            log::error!("buffer {:?} was already destroyed", buffer.handle);
            return;
        };
        unsafe {
            if allocation.mapped.is_some() {
                self.core.allocator.unmap_memory(&mut allocation.allocation);
            }
            self.core.allocator.destroy_buffer(buffer.handle, &mut allocation.allocation);
        }
    }

    fn write_buffer(&self, buffer: &GfxBuffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let allocations = self.allocations.borrow();
        let allocation = allocations.get(buffer.allocation).ok_or(GfxError::UnknownAllocation)?;
        let mapped = allocation.mapped.ok_or(GfxError::Vk(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        if offset + data.len() as vk::DeviceSize > allocation.size {
            return Err(GfxError::Vk(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
            self.core.allocator.flush_allocation(&allocation.allocation, offset, data.len() as vk::DeviceSize)?;
        }
        Ok(())
    }

    fn create_fence(&self, signaled: bool, debug_name: &str) -> GfxResult<GfxFence> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { self.core.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None)? };
        self.core.set_debug_name(fence, debug_name);
        Ok(GfxFence::new(fence))
    }

    fn destroy_fence(&self, fence: GfxFence) {
        unsafe { self.core.device.destroy_fence(fence.handle(), None) };
    }

    fn wait_fence(&self, fence: &GfxFence, timeout: u64) -> GfxResult<()> {
        unsafe { self.core.device.wait_for_fences(std::slice::from_ref(&fence.handle), true, timeout)? };
        Ok(())
    }

    fn reset_fence(&self, fence: &GfxFence) -> GfxResult<()> {
        unsafe { self.core.device.reset_fences(std::slice::from_ref(&fence.handle))? };
        Ok(())
    }

    fn fence_signaled(&self, fence: &GfxFence) -> GfxResult<bool> {
        Ok(unsafe { self.core.device.get_fence_status(fence.handle())? })
    }

    fn create_semaphore(&self, debug_name: &str) -> GfxResult<GfxSemaphore> {
        let semaphore = unsafe { self.core.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
        self.core.set_debug_name(semaphore, debug_name);
        Ok(GfxSemaphore::new(semaphore))
    }

    fn destroy_semaphore(&self, semaphore: GfxSemaphore) {
        unsafe { self.core.device.destroy_semaphore(semaphore.handle(), None) };
    }

    fn allocate_command_buffer(&self, debug_name: &str) -> GfxResult<GfxCommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.core.device.allocate_command_buffers(&info)? }
            .into_iter()
            .next()
            .ok_or(GfxError::Vk(vk::Result::ERROR_UNKNOWN))?;
        self.core.set_debug_name(command_buffer, debug_name);
        Ok(GfxCommandBuffer::new(command_buffer, debug_name))
    }

    fn free_command_buffer(&self, command_buffer: GfxCommandBuffer) {
        unsafe {
            self.core.device.free_command_buffers(self.command_pool, std::slice::from_ref(&command_buffer.handle));
        }
    }

    fn begin_command_buffer(&self, command_buffer: &GfxCommandBuffer) -> GfxResult<()> {
        unsafe {
            self.core
                .device
                .reset_command_buffer(command_buffer.handle(), vk::CommandBufferResetFlags::RELEASE_RESOURCES)?;
            self.core.device.begin_command_buffer(
                command_buffer.handle(),
                &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: &GfxCommandBuffer) -> GfxResult<()> {
        unsafe { self.core.device.end_command_buffer(command_buffer.handle())? };
        Ok(())
    }

    fn command_recorder<'a>(&'a self, command_buffer: &GfxCommandBuffer) -> Box<dyn GfxCommandRecorder + 'a> {
        Box::new(VulkanCommandRecorder::new(&self.core, command_buffer.handle()))
    }

    fn submit(&self, submit_info: &GfxSubmitInfo, fence: Option<&GfxFence>) -> GfxResult<()> {
        let _span = kestrel_crate_tools::profile_span!("VulkanDevice::submit");
        let cmd_infos = submit_info.vk_command_buffer_infos();
        let submit = submit_info.vk_infos(&cmd_infos);
        unsafe {
            self.core.device.queue_submit2(
                self.core.queue,
                std::slice::from_ref(&submit),
                fence.map_or(vk::Fence::null(), |f| f.handle()),
            )?;
        }
        Ok(())
    }

    fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.core.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let leaked = self.allocations.borrow().len();
        if leaked > 0 {
            log::warn!("{} allocations are still alive when the device is dropped", leaked);
        }
        unsafe {
            let _ = self.core.device.device_wait_idle();
            self.core.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
