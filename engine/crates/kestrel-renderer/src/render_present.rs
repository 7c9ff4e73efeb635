use ash::vk;
use itertools::Itertools;
use kestrel_gfx::{
    device::GfxDevice,
    handles::{GfxFence, GfxImage, GfxSemaphore},
    swapchain::{GfxAcquireResult, GfxPresentResult, GfxPresentSurface},
};

use crate::error::RendererResult;

/// 呈现表面的封装
///
/// - acquire 使用一个专用的 fence，获取完成后立即等待并重置，
///   因此 swapchain image 的生命周期与 frame slot 的数量无关
/// - render complete semaphore 的数量与 swapchain image 相同，
///   present 等待的 semaphore 不会在呈现引擎使用期间被下一帧再次 signal
pub struct RenderPresent {
    surface: Box<dyn GfxPresentSurface>,

    acquire_fence: GfxFence,
    render_complete_semaphores: Vec<GfxSemaphore>,

    current_image_index: Option<u32>,
    /// 表面过期或不再匹配，需要重建
    stale: bool,
}

// new & init
impl RenderPresent {
    pub fn new(device: &dyn GfxDevice, surface: Box<dyn GfxPresentSurface>) -> RendererResult<Self> {
        let acquire_fence = device.create_fence(false, "present-acquire")?;
        let render_complete_semaphores = Self::create_semaphores(device, surface.image_count())?;
        log::info!(
            "render present: {} images, {}x{}, {:?}",
            surface.image_count(),
            surface.extent().width,
            surface.extent().height,
            surface.format()
        );

        Ok(Self {
            surface,
            acquire_fence,
            render_complete_semaphores,
            current_image_index: None,
            stale: false,
        })
    }

    fn create_semaphores(device: &dyn GfxDevice, count: u32) -> RendererResult<Vec<GfxSemaphore>> {
        (0..count)
            .map(|i| device.create_semaphore(&format!("render-complete-{i}")).map_err(Into::into))
            .collect()
    }

    /// 尺寸发生变化时重建表面，调用前 GPU 必须已经空闲
    pub fn rebuild_after_resized(&mut self, device: &dyn GfxDevice, extent: vk::Extent2D) -> RendererResult<()> {
        device.wait_idle()?;
        self.surface.recreate(extent)?;

        let image_count = self.surface.image_count();
        if image_count as usize != self.render_complete_semaphores.len() {
            for semaphore in self.render_complete_semaphores.drain(..) {
                device.destroy_semaphore(semaphore);
            }
            self.render_complete_semaphores = Self::create_semaphores(device, image_count)?;
        }

        self.current_image_index = None;
        self.stale = false;
        log::info!("surface rebuilt: {}x{}", self.surface.extent().width, self.surface.extent().height);
        Ok(())
    }

    pub fn destroy(self, device: &dyn GfxDevice) {
        device.destroy_fence(self.acquire_fence);
        for semaphore in self.render_complete_semaphores {
            device.destroy_semaphore(semaphore);
        }
    }
}

// getters
impl RenderPresent {
    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    #[inline]
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.surface.extent()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.surface.format()
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.surface.image_count()
    }

    #[inline]
    pub fn current_image_index(&self) -> Option<u32> {
        self.current_image_index
    }

    /// 当前 acquire 到的 image
    #[inline]
    pub fn current_image(&self) -> Option<GfxImage> {
        self.current_image_index.map(|index| self.surface.image(index))
    }

    /// 当前 image 对应的 render complete semaphore
    #[inline]
    pub fn current_render_complete_semaphore(&self) -> Option<&GfxSemaphore> {
        self.current_image_index
            .and_then(|index| self.render_complete_semaphores.get(index as usize))
    }

    pub fn image_handles(&self) -> Vec<vk::Image> {
        (0..self.surface.image_count()).map(|index| self.surface.image(index).handle).collect_vec()
    }
}

// tools
impl RenderPresent {
    /// 获取下一张 image，阻塞直到 image 可用
    ///
    /// 表面过期时返回 `None`，并标记为 stale
    pub fn acquire_image(&mut self, device: &dyn GfxDevice) -> RendererResult<Option<u32>> {
        let _span = kestrel_crate_tools::profile_span!("RenderPresent::acquire_image");

        match self.surface.acquire_next_image(&self.acquire_fence)? {
            GfxAcquireResult::OutOfDate => {
                log::warn!("acquire: surface out of date");
                self.stale = true;
                self.current_image_index = None;
                Ok(None)
            }
            GfxAcquireResult::Acquired { index, suboptimal } => {
                device.wait_fence(&self.acquire_fence, u64::MAX)?;
                device.reset_fence(&self.acquire_fence)?;
                if suboptimal {
                    // 这一帧仍然可以呈现，结束后重建
                    log::warn!("acquire: surface suboptimal");
                    self.stale = true;
                }
                self.current_image_index = Some(index);
                Ok(Some(index))
            }
        }
    }

    /// 呈现当前 image，等待其 render complete semaphore
    pub fn present_image(&mut self) -> RendererResult<GfxPresentResult> {
        let _span = kestrel_crate_tools::profile_span!("RenderPresent::present_image");

        let Some(index) = self.current_image_index.take() else {
            log::warn!("present without an acquired image");
            return Ok(GfxPresentResult::OutOfDate);
        };
        let wait = self
            .render_complete_semaphores
            .get(index as usize)
            .copied()
            .into_iter()
            .collect_vec();

        let result = self.surface.present(index, &wait)?;
        if result.is_stale() {
            log::warn!("present: {:?}", result);
            self.stale = true;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use kestrel_gfx::mock::{MockEvent, MockGfxDevice};

    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 320, height: 240 };

    #[test]
    fn acquire_waits_and_resets_the_dedicated_fence() {
        let device = MockGfxDevice::new();
        let surface = device.create_present_surface(EXTENT, 3);
        let mut present = RenderPresent::new(&device, Box::new(surface)).unwrap();
        device.clear_events();

        assert_eq!(present.acquire_image(&device).unwrap(), Some(0));
        let events = device.events();
        let MockEvent::Acquire { fence, .. } = events[0] else {
            panic!("expected acquire, got {:?}", events[0]);
        };
        assert_eq!(events[1], MockEvent::WaitFence(fence));
        assert_eq!(events[2], MockEvent::ResetFence(fence));

        let semaphore = *present.current_render_complete_semaphore().unwrap();
        assert_eq!(present.present_image().unwrap(), GfxPresentResult::Presented);
        assert_eq!(
            device.events().last(),
            Some(&MockEvent::Present {
                image_index: 0,
                wait: vec![semaphore.handle()],
            })
        );

        // 第二次 acquire 可以复用同一个 fence
        assert_eq!(present.acquire_image(&device).unwrap(), Some(1));
        assert!(!present.is_stale());
    }

    #[test]
    fn out_of_date_marks_stale_until_rebuilt() {
        let device = MockGfxDevice::new();
        let mut surface = device.create_present_surface(EXTENT, 2);
        surface.fail_acquires(1);
        let mut present = RenderPresent::new(&device, Box::new(surface)).unwrap();

        assert_eq!(present.acquire_image(&device).unwrap(), None);
        assert!(present.is_stale());
        assert!(present.current_image().is_none());

        let new_extent = vk::Extent2D { width: 640, height: 480 };
        present.rebuild_after_resized(&device, new_extent).unwrap();
        assert!(!present.is_stale());
        assert_eq!(present.extent(), new_extent);

        let events = device.events();
        let idle = events.iter().position(|e| *e == MockEvent::WaitIdle).unwrap();
        let recreate = events.iter().position(|e| *e == MockEvent::RecreateSurface(new_extent)).unwrap();
        assert!(idle < recreate);

        assert_eq!(present.acquire_image(&device).unwrap(), Some(0));
    }

    #[test]
    fn suboptimal_present_marks_stale() {
        let device = MockGfxDevice::new();
        let mut surface = device.create_present_surface(EXTENT, 2);
        surface.queue_present_result(GfxPresentResult::Suboptimal);
        let mut present = RenderPresent::new(&device, Box::new(surface)).unwrap();

        present.acquire_image(&device).unwrap();
        assert_eq!(present.present_image().unwrap(), GfxPresentResult::Suboptimal);
        assert!(present.is_stale());
    }
}
