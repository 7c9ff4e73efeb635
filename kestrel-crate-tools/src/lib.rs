//! Kestrel 工具集
//!
//! 提供日志初始化与 tracy 性能分析区间等通用工具。
//!
//! # 性能分析
//! `profile_span!` 只有在 tracy client 已经启动时才会记录区间，
//! 测试与 headless 工具中可以放心调用。

pub mod init_log;

pub use tracy_client;

/// 在当前作用域内打开一个 tracy 区间
///
/// 返回 `Option<tracy_client::Span>`，需要绑定到变量上以保持区间存活：
/// ```ignore
/// let _span = kestrel_crate_tools::profile_span!("RenderGraph::execute");
/// ```
#[macro_export]
macro_rules! profile_span {
    ($name:expr) => {
        $crate::tracy_client::Client::running()
            .map(|client| client.span($crate::tracy_client::span_location!($name), 0))
    };
}

/// 标记一帧的结束，未启动 tracy client 时什么都不做
pub fn profile_frame_mark() {
    if let Some(client) = tracy_client::Client::running() {
        client.frame_mark();
    }
}
