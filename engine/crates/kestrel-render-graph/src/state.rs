//! 图像资源状态
//!
//! 每个状态对应一个 `vk::ImageLayout`，以及在该状态下访问图像时使用的 stage/access。

use std::fmt;

use ash::vk;

/// 图像资源状态
///
/// `StorageRead` 与 `StorageWrite` 共用 `GENERAL` layout，但仍然是两个状态，
/// 这样 storage image 的写后读也会插入 barrier。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RgImageState {
    /// 未定义状态（初始状态或不关心内容）
    #[default]
    Undefined,
    /// 通用布局，可用于任何操作
    General,
    ColorAttachment,
    DepthAttachment,
    /// 只读深度附件，同时可以在 shader 中采样
    DepthReadOnly,
    /// 在 fragment/compute shader 中采样
    ShaderRead,
    StorageRead,
    StorageWrite,
    TransferSrc,
    TransferDst,
    Present,
}

pub(crate) const FRAGMENT_TESTS: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
);

pub(crate) const SAMPLING_SHADERS: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw() | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw(),
);

const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
        | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
);

impl RgImageState {
    pub const ALL: [Self; 11] = [
        Self::Undefined,
        Self::General,
        Self::ColorAttachment,
        Self::DepthAttachment,
        Self::DepthReadOnly,
        Self::ShaderRead,
        Self::StorageRead,
        Self::StorageWrite,
        Self::TransferSrc,
        Self::TransferDst,
        Self::Present,
    ];

    #[inline]
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::General | Self::StorageRead | Self::StorageWrite => vk::ImageLayout::GENERAL,
            Self::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::DepthReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            Self::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// 处于该状态时访问图像的 pipeline stage
    #[inline]
    pub fn stage(self) -> vk::PipelineStageFlags2 {
        match self {
            Self::Undefined => vk::PipelineStageFlags2::TOP_OF_PIPE,
            Self::General => vk::PipelineStageFlags2::ALL_COMMANDS,
            Self::ColorAttachment => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthAttachment => FRAGMENT_TESTS,
            Self::DepthReadOnly => FRAGMENT_TESTS | SAMPLING_SHADERS,
            Self::ShaderRead => SAMPLING_SHADERS,
            Self::StorageRead | Self::StorageWrite => vk::PipelineStageFlags2::COMPUTE_SHADER,
            Self::TransferSrc | Self::TransferDst => vk::PipelineStageFlags2::TRANSFER,
            Self::Present => vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        }
    }

    /// 处于该状态时的访问类型
    #[inline]
    pub fn access(self) -> vk::AccessFlags2 {
        match self {
            Self::Undefined | Self::Present => vk::AccessFlags2::NONE,
            Self::General => vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
            Self::ColorAttachment => {
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthAttachment => {
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::DepthReadOnly => {
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::SHADER_SAMPLED_READ
            }
            Self::ShaderRead => vk::AccessFlags2::SHADER_SAMPLED_READ,
            Self::StorageRead => vk::AccessFlags2::SHADER_STORAGE_READ,
            Self::StorageWrite => vk::AccessFlags2::SHADER_STORAGE_WRITE,
            Self::TransferSrc => vk::AccessFlags2::TRANSFER_READ,
            Self::TransferDst => vk::AccessFlags2::TRANSFER_WRITE,
        }
    }

    /// 该状态下是否会写入图像
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::General | Self::ColorAttachment | Self::DepthAttachment | Self::StorageWrite | Self::TransferDst
        )
    }

    /// [`Self::access`] 中的写入部分
    #[inline]
    pub fn write_access(self) -> vk::AccessFlags2 {
        self.access() & WRITE_ACCESS
    }
}

impl fmt::Display for RgImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_states_share_general_layout() {
        assert_eq!(RgImageState::StorageRead.layout(), vk::ImageLayout::GENERAL);
        assert_eq!(RgImageState::StorageWrite.layout(), vk::ImageLayout::GENERAL);
        assert_ne!(RgImageState::StorageRead, RgImageState::StorageWrite);
        assert!(RgImageState::StorageWrite.is_write());
        assert!(!RgImageState::StorageRead.is_write());
    }

    #[test]
    fn only_read_states_have_no_write_access() {
        for state in RgImageState::ALL {
            assert_eq!(state.is_write(), !state.write_access().is_empty(), "{state}");
        }
        assert_eq!(RgImageState::ColorAttachment.write_access(), vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert_eq!(RgImageState::General.write_access(), vk::AccessFlags2::MEMORY_WRITE);
    }
}
