//! Kestrel 的 GFX 层
//!
//! 上层（render graph、帧同步）只依赖这里的三个 trait：
//! - [`device::GfxDevice`]：资源、同步原语、命令缓冲与提交
//! - [`device::GfxCommandRecorder`]：在一个命令缓冲内录制命令
//! - [`swapchain::GfxPresentSurface`]：呈现表面的获取与呈现
//!
//! [`vulkan`] 模块是基于 ash + vk-mem 的实现；开启 `mock` feature 后，
//! [`mock`] 模块提供一个记录所有调用的实现，用于测试。

pub mod barrier;
pub mod commands;
pub mod device;
pub mod error;
pub mod handles;
pub mod swapchain;
pub mod vulkan;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use ash::vk;
