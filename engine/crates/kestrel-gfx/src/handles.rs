//! 设备资源句柄
//!
//! 句柄都是轻量的值类型，可以 Clone；资源的生命周期由 [`crate::device::GfxDevice`]
//! 管理，需要显式 destroy。

use ash::vk;

slotmap::new_key_type! {
    /// 设备内部显存分配的句柄
    pub struct GfxAllocationHandle;
}

/// # Destroy
/// 可以 Clone，需要通过 device 手动 destroy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxFence {
    pub(crate) handle: vk::Fence,
}
impl GfxFence {
    #[inline]
    pub fn new(handle: vk::Fence) -> Self {
        Self { handle }
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxSemaphore {
    pub(crate) handle: vk::Semaphore,
}
impl GfxSemaphore {
    #[inline]
    pub fn new(handle: vk::Semaphore) -> Self {
        Self { handle }
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

#[derive(Clone, Debug)]
pub struct GfxCommandBuffer {
    pub(crate) handle: vk::CommandBuffer,
    pub(crate) name: String,
}
impl GfxCommandBuffer {
    #[inline]
    pub fn new(handle: vk::CommandBuffer, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 2D image 的创建参数
#[derive(Clone, Debug)]
pub struct GfxImageDesc {
    pub name: String,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub samples: vk::SampleCountFlags,
}

/// 由设备分配的 image，连同它的默认 view
///
/// `allocation` 为 `None` 时表示外部 image（例如 swapchain image），不拥有内存
#[derive(Clone, Copy, Debug)]
pub struct GfxImage {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Option<GfxAllocationHandle>,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
}
// getters
impl GfxImage {
    /// 外部 image，只持有句柄与 view
    pub fn external(
        handle: vk::Image,
        view: vk::ImageView,
        extent: vk::Extent2D,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Self {
        Self {
            handle,
            view,
            allocation: None,
            extent,
            format,
            aspect,
        }
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.allocation.is_none()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.extent.height
    }
}

#[derive(Clone, Debug)]
pub struct GfxBufferDesc {
    pub name: String,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    /// host visible 的 buffer 在创建时就会被持久映射
    pub host_visible: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct GfxBuffer {
    pub handle: vk::Buffer,
    pub allocation: GfxAllocationHandle,
    pub size: vk::DeviceSize,
    pub device_address: vk::DeviceAddress,
}
