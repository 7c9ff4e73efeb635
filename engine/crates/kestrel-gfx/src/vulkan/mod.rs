//! 基于 ash + vk-mem 的 Vulkan 后端
//!
//! 需要 Vulkan 1.3：dynamic rendering、synchronization2 与 buffer device address
//! 都按 core 特性启用；ray query 是可选的。

mod core;
mod device;
mod recorder;
mod swapchain;

pub use core::{VulkanCore, VulkanCoreCreateInfo};
pub use device::VulkanDevice;
pub use recorder::VulkanCommandRecorder;
pub use swapchain::{VulkanSwapchain, VulkanSwapchainConfig};
