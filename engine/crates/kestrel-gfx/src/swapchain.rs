//! 呈现表面抽象

use ash::vk;

use crate::{
    error::GfxResult,
    handles::{GfxFence, GfxImage, GfxSemaphore},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxAcquireResult {
    Acquired { index: u32, suboptimal: bool },
    /// 表面已经过期，需要重建后才能继续
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxPresentResult {
    Presented,
    Suboptimal,
    OutOfDate,
}
impl GfxPresentResult {
    #[inline]
    pub fn is_stale(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

pub trait GfxPresentSurface {
    /// 获取下一张 image，完成时 signal `fence`
    fn acquire_next_image(&mut self, fence: &GfxFence) -> GfxResult<GfxAcquireResult>;
    fn present(&mut self, image_index: u32, wait_semaphores: &[GfxSemaphore]) -> GfxResult<GfxPresentResult>;

    /// 重建表面，旧的 image 全部失效
    fn recreate(&mut self, extent: vk::Extent2D) -> GfxResult<()>;

    fn image(&self, index: u32) -> GfxImage;
    fn image_count(&self) -> u32;
    fn extent(&self) -> vk::Extent2D;
    fn format(&self) -> vk::Format;
}
