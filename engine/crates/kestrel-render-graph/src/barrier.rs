//! Barrier 自动计算
//!
//! 把两个 [`RgImageState`] 之间的转换映射为最小的 stage/access mask。
//! 未识别的组合退回到 [`GfxBarrierMask::conservative`]。

use std::collections::HashSet;

use ash::vk;
use kestrel_gfx::{
    barrier::{GfxBarrierMask, GfxImageBarrier},
    handles::GfxImage,
};

use crate::{
    error::{RgError, RgResult},
    state::{FRAGMENT_TESTS, RgImageState, SAMPLING_SHADERS},
};

/// 遇到未识别的状态转换时的处理方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RgBarrierPolicy {
    /// 使用全局 barrier，并对每种组合 warn 一次
    #[default]
    Conservative,
    /// 直接返回 [`RgError::UnhandledTransition`]，用于开发期发现遗漏的组合
    Strict,
}

/// 一次实际录制的 image barrier，用于调试输出与测试
#[derive(Clone, Debug, PartialEq)]
pub struct RgBarrierRecord {
    pub resource: String,
    pub image: vk::Image,
    pub from: RgImageState,
    pub to: RgImageState,
    pub mask: GfxBarrierMask,
}

pub struct RgBarrierEngine {
    policy: RgBarrierPolicy,
    /// 已经 warn 过的组合
    reported: HashSet<(RgImageState, RgImageState)>,
}

impl Default for RgBarrierEngine {
    fn default() -> Self {
        Self::new(RgBarrierPolicy::default())
    }
}

// new & init
impl RgBarrierEngine {
    pub fn new(policy: RgBarrierPolicy) -> Self {
        Self {
            policy,
            reported: HashSet::new(),
        }
    }
}

// getters
impl RgBarrierEngine {
    #[inline]
    pub fn policy(&self) -> RgBarrierPolicy {
        self.policy
    }

    #[inline]
    pub fn set_policy(&mut self, policy: RgBarrierPolicy) {
        self.policy = policy;
    }
}

// tools
impl RgBarrierEngine {
    /// 状态转换需要的 mask
    ///
    /// 只读状态之间相同返回 `None`；未识别的组合返回保守的全局 mask
    pub fn masks(old: RgImageState, new: RgImageState) -> Option<GfxBarrierMask> {
        if old == new {
            return Self::known_masks(old, new);
        }
        Some(Self::known_masks(old, new).unwrap_or(GfxBarrierMask::conservative()))
    }

    /// 已识别的状态转换表
    pub fn known_masks(old: RgImageState, new: RgImageState) -> Option<GfxBarrierMask> {
        use RgImageState as S;
        type Stage = vk::PipelineStageFlags2;
        type Access = vk::AccessFlags2;

        // 同一写入状态的连续访问：layout 不变，只需要内存依赖
        if old == new {
            return old
                .is_write()
                .then(|| GfxBarrierMask::new(old.stage(), old.write_access(), new.stage(), new.access()));
        }

        let mask = match (old, new) {

            // 内容无需保留，不需要等待任何操作
            (S::Undefined, S::ColorAttachment) => GfxBarrierMask::new(
                Stage::TOP_OF_PIPE,
                Access::NONE,
                Stage::COLOR_ATTACHMENT_OUTPUT,
                Access::COLOR_ATTACHMENT_WRITE,
            ),
            (S::Undefined, S::DepthAttachment) => {
                GfxBarrierMask::new(Stage::TOP_OF_PIPE, Access::NONE, FRAGMENT_TESTS, new.access())
            }
            (
                S::Undefined,
                S::ShaderRead | S::StorageRead | S::StorageWrite | S::General | S::TransferDst | S::DepthReadOnly,
            ) => GfxBarrierMask::new(Stage::TOP_OF_PIPE, Access::NONE, new.stage(), new.access()),

            // 写后读
            (S::ColorAttachment, S::ShaderRead) => GfxBarrierMask::new(
                Stage::COLOR_ATTACHMENT_OUTPUT,
                Access::COLOR_ATTACHMENT_WRITE,
                SAMPLING_SHADERS,
                Access::SHADER_SAMPLED_READ,
            ),
            (S::ColorAttachment, S::StorageRead | S::StorageWrite | S::TransferSrc) => GfxBarrierMask::new(
                Stage::COLOR_ATTACHMENT_OUTPUT,
                Access::COLOR_ATTACHMENT_WRITE,
                new.stage(),
                new.access(),
            ),
            (S::ColorAttachment, S::Present) => GfxBarrierMask::new(
                Stage::COLOR_ATTACHMENT_OUTPUT,
                Access::COLOR_ATTACHMENT_WRITE,
                Stage::BOTTOM_OF_PIPE,
                Access::NONE,
            ),
            (S::DepthAttachment, S::ShaderRead | S::DepthReadOnly) => GfxBarrierMask::new(
                FRAGMENT_TESTS,
                Access::DEPTH_STENCIL_ATTACHMENT_WRITE,
                new.stage(),
                new.access(),
            ),
            (S::StorageWrite, S::StorageRead | S::ShaderRead | S::TransferSrc) => GfxBarrierMask::new(
                Stage::COMPUTE_SHADER,
                Access::SHADER_STORAGE_WRITE,
                new.stage(),
                new.access(),
            ),
            (S::TransferDst, S::ShaderRead | S::StorageRead | S::TransferSrc) => {
                GfxBarrierMask::new(Stage::TRANSFER, Access::TRANSFER_WRITE, new.stage(), new.access())
            }

            // 读后写，只需要执行依赖
            (
                S::ShaderRead | S::StorageRead | S::DepthReadOnly | S::TransferSrc,
                S::ColorAttachment | S::DepthAttachment | S::StorageWrite | S::TransferDst,
            ) => GfxBarrierMask::new(old.stage(), Access::NONE, new.stage(), new.access()),

            // 只读之间的 layout 切换
            (
                S::ShaderRead | S::StorageRead | S::DepthReadOnly | S::TransferSrc,
                S::ShaderRead | S::StorageRead | S::DepthReadOnly | S::TransferSrc,
            ) => GfxBarrierMask::new(old.stage(), Access::NONE, new.stage(), new.access()),

            // 等待 acquire semaphore 的 stage 与颜色输出一致
            (S::Present, S::ColorAttachment) => GfxBarrierMask::new(
                Stage::COLOR_ATTACHMENT_OUTPUT,
                Access::NONE,
                Stage::COLOR_ATTACHMENT_OUTPUT,
                Access::COLOR_ATTACHMENT_WRITE,
            ),

            (S::General, _) => GfxBarrierMask::new(Stage::ALL_COMMANDS, Access::MEMORY_WRITE, new.stage(), new.access()),
            (_, S::General) => {
                GfxBarrierMask::new(old.stage(), old.access(), Stage::ALL_COMMANDS, new.access())
            }

            _ => return None,
        };
        Some(mask)
    }

    /// 按照当前策略解析一次状态转换
    pub fn resolve(
        &mut self,
        resource: &str,
        old: RgImageState,
        new: RgImageState,
    ) -> RgResult<Option<GfxBarrierMask>> {
        if old == new {
            return Ok(Self::known_masks(old, new));
        }
        if let Some(mask) = Self::known_masks(old, new) {
            return Ok(Some(mask));
        }

        match self.policy {
            RgBarrierPolicy::Strict => Err(RgError::UnhandledTransition {
                resource: resource.to_string(),
                from: old,
                to: new,
            }),
            RgBarrierPolicy::Conservative => {
                if self.reported.insert((old, new)) {
                    log::warn!("unhandled image transition {old} -> {new} (first seen on \"{resource}\"), using a full barrier");
                }
                Ok(Some(GfxBarrierMask::conservative()))
            }
        }
    }

    /// 生成 `image` 从 `old` 到 `new` 的 barrier，不需要同步时返回 `None`
    pub fn image_barrier(
        &mut self,
        resource: &str,
        image: &GfxImage,
        old: RgImageState,
        new: RgImageState,
    ) -> RgResult<Option<(GfxImageBarrier, RgBarrierRecord)>> {
        let Some(mask) = self.resolve(resource, old, new)? else {
            return Ok(None);
        };

        let barrier = GfxImageBarrier::new()
            .image(image.handle)
            .layout_transfer(old.layout(), new.layout())
            .mask(mask)
            .image_aspect_flag(image.aspect);
        let record = RgBarrierRecord {
            resource: resource.to_string(),
            image: image.handle,
            from: old,
            to: new,
            mask,
        };
        Ok(Some((barrier, record)))
    }
}
