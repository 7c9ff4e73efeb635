//! Kestrel 渲染器
//!
//! - [`fif::FifManager`]：frame in flight 的 slot 池，fence 守护每个 slot 的复用
//! - [`render_present::RenderPresent`]：呈现表面的获取与呈现
//! - [`render_pipeline`]：所有 pass 以及它们在 render graph 中的连接方式
//! - [`renderer::Renderer`]：把以上部分串成 acquire → record → submit → present 的帧循环

pub mod error;
pub mod fif;
pub mod render_pipeline;
pub mod render_present;
pub mod renderer;

pub use error::{RendererError, RendererResult};
pub use renderer::{FrameOutcome, Renderer};
