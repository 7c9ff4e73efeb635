use std::{fmt::Display, ops::Deref};

/// 帧标签（A/B/C）
///
/// 表示当前处于 Frames in Flight 的哪一帧。
/// 通过 `Deref` 转换为索引 0/1/2。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameLabel {
    A,
    B,
    C,
}
impl Deref for FrameLabel {
    type Target = usize;
    #[inline]
    fn deref(&self) -> &Self::Target {
        match self {
            Self::A => &Self::INDEX[0],
            Self::B => &Self::INDEX[1],
            Self::C => &Self::INDEX[2],
        }
    }
}
impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
        }
    }
}
impl FrameLabel {
    const INDEX: [usize; 3] = [0, 1, 2];
    pub const ALL: [FrameLabel; 3] = [FrameLabel::A, FrameLabel::B, FrameLabel::C];

    #[inline]
    pub fn from_index(idx: usize) -> Self {
        Self::ALL[idx % Self::ALL.len()]
    }
}

/// 帧计数器
///
/// `frame_id` 单调递增；frame slot 的索引为 `frame_id % fif_count`
#[derive(Debug, Clone, Copy)]
pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    fif_count: usize,
}
// new & init
impl FrameCounter {
    pub const MAX_FIF_COUNT: usize = FrameLabel::ALL.len();

    /// `fif_count` 会被限制在 `[1, MAX_FIF_COUNT]`
    pub fn new(init_frame_id: u64, fif_count: usize) -> Self {
        let clamped = fif_count.clamp(1, Self::MAX_FIF_COUNT);
        if clamped != fif_count {
            log::warn!("fif count {} is out of range, use {}", fif_count, clamped);
        }
        Self {
            frame_id: init_frame_id,
            fif_count: clamped,
        }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn fif_count(&self) -> usize {
        self.fif_count
    }

    #[inline]
    pub fn frame_index(&self) -> usize {
        (self.frame_id % self.fif_count as u64) as usize
    }

    #[inline]
    pub fn frame_labels(&self) -> &'static [FrameLabel] {
        &FrameLabel::ALL[..self.fif_count]
    }

    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_index(self.frame_index())
    }

    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}
