use std::collections::HashMap;

use ash::vk;
use kestrel_gfx::handles::{GfxImage, GfxImageDesc};

use crate::state::RgImageState;

/// 图像资源描述
///
/// 实际尺寸由 `base_extent` 按 `extent_divisor` 缩小得到，用于半分辨率等降采样 buffer。
#[derive(Clone, Debug)]
pub struct RgImageDesc {
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub samples: vk::SampleCountFlags,
    pub base_extent: vk::Extent2D,
    pub extent_divisor: u32,
    /// 第一次使用之前期望的状态，只用于描述；新创建的图像总是 `Undefined`
    pub initial_state: RgImageState,
    /// Pass 没有指定需要的状态时使用的状态
    pub final_state: RgImageState,
}

// new & init & builder
impl RgImageDesc {
    /// 创建 2D 图像描述，aspect 由 format 推断
    pub fn new_2d(
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        base_extent: vk::Extent2D,
        final_state: RgImageState,
    ) -> Self {
        Self {
            format,
            usage,
            aspect: Self::infer_aspect(format),
            samples: vk::SampleCountFlags::TYPE_1,
            base_extent,
            extent_divisor: 1,
            initial_state: RgImageState::Undefined,
            final_state,
        }
    }

    #[inline]
    pub fn with_divisor(mut self, divisor: u32) -> Self {
        self.extent_divisor = divisor.max(1);
        self
    }

    #[inline]
    pub fn with_initial_state(mut self, state: RgImageState) -> Self {
        self.initial_state = state;
        self
    }

    #[inline]
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    #[inline]
    pub fn with_aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }
}

// tools
impl RgImageDesc {
    /// 根据 format 推断 aspect
    pub fn infer_aspect(format: vk::Format) -> vk::ImageAspectFlags {
        match format {
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }
            vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            _ => vk::ImageAspectFlags::COLOR,
        }
    }

    /// 每个维度 `max(1, base / divisor)`
    #[inline]
    pub fn scaled_extent(base: vk::Extent2D, divisor: u32) -> vk::Extent2D {
        let divisor = divisor.max(1);
        vk::Extent2D {
            width: (base.width / divisor).max(1),
            height: (base.height / divisor).max(1),
        }
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        Self::scaled_extent(self.base_extent, self.extent_divisor)
    }

    pub fn to_gfx_desc(&self, name: &str) -> GfxImageDesc {
        GfxImageDesc {
            name: name.to_string(),
            format: self.format,
            extent: self.extent(),
            usage: self.usage,
            aspect: self.aspect,
            samples: self.samples,
        }
    }
}

/// 图像的物理来源
#[derive(Debug)]
pub enum RgImageSource {
    /// graph 拥有内存，编译时创建
    Internal {
        image: Option<GfxImage>,
        current_state: RgImageState,
    },
    /// 每帧由调用方提供；具体 image 会在一个池子里轮换，因此按句柄分别记录状态
    External {
        states: HashMap<vk::Image, RgImageState>,
    },
}

/// 注册到 graph 中的图像资源
#[derive(Debug)]
pub struct RgImageResource {
    pub name: String,
    pub desc: RgImageDesc,
    pub source: RgImageSource,
}

// new & init
impl RgImageResource {
    pub fn internal(name: impl Into<String>, desc: RgImageDesc) -> Self {
        Self {
            name: name.into(),
            desc,
            source: RgImageSource::Internal {
                image: None,
                current_state: RgImageState::Undefined,
            },
        }
    }

    pub fn external(name: impl Into<String>, desc: RgImageDesc) -> Self {
        Self {
            name: name.into(),
            desc,
            source: RgImageSource::External { states: HashMap::new() },
        }
    }
}

// getters
impl RgImageResource {
    #[inline]
    pub fn is_external(&self) -> bool {
        matches!(self.source, RgImageSource::External { .. })
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent()
    }

    #[inline]
    pub fn final_state(&self) -> RgImageState {
        self.desc.final_state
    }

    /// 内部资源的 image，未分配或外部资源时为 `None`
    #[inline]
    pub fn image(&self) -> Option<&GfxImage> {
        match &self.source {
            RgImageSource::Internal { image, .. } => image.as_ref(),
            RgImageSource::External { .. } => None,
        }
    }

    /// 某个具体 image 当前的状态，外部 image 第一次使用前为 `Undefined`
    pub fn state_of(&self, image: vk::Image) -> RgImageState {
        match &self.source {
            RgImageSource::Internal { current_state, .. } => *current_state,
            RgImageSource::External { states } => states.get(&image).copied().unwrap_or_default(),
        }
    }

    /// 内部资源的当前状态
    pub fn current_state(&self) -> Option<RgImageState> {
        match &self.source {
            RgImageSource::Internal { current_state, .. } => Some(*current_state),
            RgImageSource::External { .. } => None,
        }
    }
}

// tools
impl RgImageResource {
    pub(crate) fn set_state(&mut self, image: vk::Image, state: RgImageState) {
        match &mut self.source {
            RgImageSource::Internal { current_state, .. } => *current_state = state,
            RgImageSource::External { states } => {
                states.insert(image, state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divided_extent_never_reaches_zero() {
        let base = vk::Extent2D { width: 1921, height: 1 };
        assert_eq!(RgImageDesc::scaled_extent(base, 2), vk::Extent2D { width: 960, height: 1 });
        assert_eq!(RgImageDesc::scaled_extent(base, 0), base);
        assert_eq!(
            RgImageDesc::scaled_extent(vk::Extent2D { width: 3, height: 3 }, 4),
            vk::Extent2D { width: 1, height: 1 }
        );
    }

    #[test]
    fn aspect_follows_format() {
        assert_eq!(RgImageDesc::infer_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(RgImageDesc::infer_aspect(vk::Format::R16G16B16A16_SFLOAT), vk::ImageAspectFlags::COLOR);
        assert!(RgImageDesc::infer_aspect(vk::Format::D24_UNORM_S8_UINT).contains(vk::ImageAspectFlags::STENCIL));
    }

    #[test]
    fn external_states_are_tracked_per_image() {
        use ash::vk::Handle;

        let desc = RgImageDesc::new_2d(
            vk::Format::B8G8R8A8_SRGB,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            vk::Extent2D { width: 8, height: 8 },
            RgImageState::Present,
        );
        let mut resource = RgImageResource::external("swapchain", desc);
        let (a, b) = (vk::Image::from_raw(1), vk::Image::from_raw(2));
        resource.set_state(a, RgImageState::Present);
        assert_eq!(resource.state_of(a), RgImageState::Present);
        assert_eq!(resource.state_of(b), RgImageState::Undefined);
        assert_eq!(resource.current_state(), None);
    }
}
