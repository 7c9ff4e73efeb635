use kestrel_gfx::error::GfxError;

use crate::state::RgImageState;

/// render graph 的错误
///
/// 除了 `Gfx` 之外都是接线错误，调用方应当把它们当作致命的编程缺陷处理。
#[derive(Debug, thiserror::Error)]
pub enum RgError {
    #[error("cannot add {what} \"{name}\" after the graph has been compiled")]
    AlreadyCompiled { what: &'static str, name: String },

    #[error("resource \"{0}\" is already registered")]
    DuplicateResource(String),

    #[error("pass \"{0}\" is already registered")]
    DuplicatePass(String),

    #[error("cycle detected between passes: {}", passes.join(" -> "))]
    CycleDetected { passes: Vec<String> },

    #[error("render graph has not been compiled")]
    NotCompiled,

    #[error("unhandled transition {from:?} -> {to:?} on \"{resource}\"")]
    UnhandledTransition {
        resource: String,
        from: RgImageState,
        to: RgImageState,
    },

    #[error(transparent)]
    Gfx(#[from] GfxError),
}

pub type RgResult<T> = Result<T, RgError>;
