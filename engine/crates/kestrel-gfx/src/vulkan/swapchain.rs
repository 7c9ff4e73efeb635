use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult},
    handles::{GfxFence, GfxImage, GfxSemaphore},
    swapchain::{GfxAcquireResult, GfxPresentResult, GfxPresentSurface},
    vulkan::VulkanDevice,
};

#[derive(Clone, Copy, Debug)]
pub struct VulkanSwapchainConfig {
    pub present_mode: vk::PresentModeKHR,
    pub surface_format: vk::SurfaceFormatKHR,
}

/// surface + swapchain
///
/// 持有 device 函数表的副本，需要在 [`VulkanDevice`] 之前销毁
pub struct VulkanSwapchain {
    surface_pf: ash::khr::surface::Instance,
    swapchain_pf: ash::khr::swapchain::Device,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    queue: vk::Queue,

    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<GfxImage>,

    config: VulkanSwapchainConfig,
    extent: vk::Extent2D,
}

// new & init
impl VulkanSwapchain {
    pub fn new(
        device: &VulkanDevice,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        raw_window_handle: raw_window_handle::RawWindowHandle,
        window_physical_extent: vk::Extent2D,
        config: VulkanSwapchainConfig,
    ) -> GfxResult<Self> {
        let core = device.core();
        let surface_pf = ash::khr::surface::Instance::new(&core.entry, &core.instance);
        let swapchain_pf = ash::khr::swapchain::Device::new(&core.instance, &core.device);
        let surface = unsafe {
            ash_window::create_surface(&core.entry, &core.instance, raw_display_handle, raw_window_handle, None)?
        };

        let supported = unsafe {
            surface_pf.get_physical_device_surface_support(core.physical_device, core.queue_family_index, surface)?
        };
        if !supported {
            return Err(GfxError::NoSuitableDevice);
        }

        let mut swapchain = Self {
            surface_pf,
            swapchain_pf,
            device: core.device.clone(),
            physical_device: core.physical_device,
            queue: core.queue,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: vec![],
            config,
            extent: window_physical_extent,
        };
        swapchain.create_swapchain(window_physical_extent)?;
        Ok(swapchain)
    }

    fn create_swapchain(&mut self, window_physical_extent: vk::Extent2D) -> GfxResult<()> {
        let capabilities = unsafe {
            self.surface_pf.get_physical_device_surface_capabilities(self.physical_device, self.surface)?
        };
        let extent = Self::calculate_swapchain_extent(&capabilities, window_physical_extent);

        // max_image_count == 0，表示不限制 image 数量
        let image_count = if capabilities.max_image_count == 0 {
            capabilities.min_image_count + 1
        } else {
            u32::min(capabilities.max_image_count, capabilities.min_image_count + 1)
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.config.surface_format.format)
            .image_color_space(self.config.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            // TRANSFER_DST 用于 Nsight 分析
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.config.present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true)
            .old_swapchain(old_swapchain);
        let swapchain = unsafe { self.swapchain_pf.create_swapchain(&create_info, None)? };

        self.destroy_images();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_pf.destroy_swapchain(old_swapchain, None) };
        }

        let vk_images = unsafe { self.swapchain_pf.get_swapchain_images(swapchain)? };
        let images = vk_images
            .into_iter()
            .map(|image| -> GfxResult<GfxImage> {
                let view_ci = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(self.config.surface_format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                let view = unsafe { self.device.create_image_view(&view_ci, None)? };
                Ok(GfxImage::external(
                    image,
                    view,
                    extent,
                    self.config.surface_format.format,
                    vk::ImageAspectFlags::COLOR,
                ))
            })
            .collect::<GfxResult<Vec<_>>>()?;

        log::info!(
            "create swapchain: window extent {}x{}, final extent {}x{}, {} images",
            window_physical_extent.width,
            window_physical_extent.height,
            extent.width,
            extent.height,
            images.len()
        );

        self.swapchain = swapchain;
        self.images = images;
        self.extent = extent;
        Ok(())
    }

    /// 如果 current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
    pub fn calculate_swapchain_extent(
        capabilities: &vk::SurfaceCapabilitiesKHR,
        window_physical_extent: vk::Extent2D,
    ) -> vk::Extent2D {
        let surface_extent = capabilities.current_extent;
        if surface_extent.width == u32::MAX || surface_extent.height == u32::MAX {
            vk::Extent2D {
                width: window_physical_extent
                    .width
                    .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
                height: window_physical_extent
                    .height
                    .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
            }
        } else {
            surface_extent
        }
    }

    fn destroy_images(&mut self) {
        for image in self.images.drain(..) {
            unsafe { self.device.destroy_image_view(image.view, None) };
        }
    }
}

impl GfxPresentSurface for VulkanSwapchain {
    fn acquire_next_image(&mut self, fence: &GfxFence) -> GfxResult<GfxAcquireResult> {
        let result = unsafe {
            self.swapchain_pf.acquire_next_image(self.swapchain, u64::MAX, vk::Semaphore::null(), fence.handle())
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::warn!("swapchain acquire image index {} is not optimal", index);
                }
                Ok(GfxAcquireResult::Acquired { index, suboptimal })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when acquire next image");
                Ok(GfxAcquireResult::OutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn present(&mut self, image_index: u32, wait_semaphores: &[GfxSemaphore]) -> GfxResult<GfxPresentResult> {
        let wait_semaphores = wait_semaphores.iter().map(|s| s.handle()).collect_vec();
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(std::slice::from_ref(&self.swapchain));
        match unsafe { self.swapchain_pf.queue_present(self.queue, &present_info) } {
            Ok(false) => Ok(GfxPresentResult::Presented),
            Ok(true) => {
                log::warn!("swapchain present image index {} is not optimal", image_index);
                Ok(GfxPresentResult::Suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when present image");
                Ok(GfxPresentResult::OutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> GfxResult<()> {
        self.create_swapchain(extent)
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
        self.config.surface_format.format
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        self.destroy_images();
        unsafe {
            self.swapchain_pf.destroy_swapchain(self.swapchain, None);
            self.surface_pf.destroy_surface(self.surface, None);
        }
    }
}
