use kestrel_gfx::error::GfxError;
use kestrel_render_graph::RgError;
use thiserror::Error;

use crate::fif::FrameSlotState;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("frame slot {slot}: invalid transition {from:?} -> {to:?}")]
    InvalidSlotTransition {
        slot: usize,
        from: FrameSlotState,
        to: FrameSlotState,
    },

    #[error("frame slot {0} is not recording")]
    SlotNotRecording(usize),

    #[error("frame slot {0} is still in flight, its fence has not been waited")]
    SlotFenceNotWaited(usize),

    #[error(transparent)]
    Graph(#[from] RgError),

    #[error(transparent)]
    Gfx(#[from] GfxError),

    #[error("invalid pipeline settings: {0}")]
    Settings(String),
}

pub type RendererResult<T> = Result<T, RendererError>;
