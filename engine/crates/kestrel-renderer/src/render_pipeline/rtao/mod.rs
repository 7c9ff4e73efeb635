//! 光追 AO：trace → à-trous denoise → upsample
//!
//! - trace 每帧在 `rtao_history_0/1` 之间交换 history 的读写角色，
//!   见 [`RtaoHistory::roles`]
//! - denoise 在 `rtao_denoise_ping/pong` 之间迭代，见 [`AtrousSchedule`]
//! - upsample 读取 denoise 的最终结果，输出全分辨率的 `rtao_full`

use kestrel_render_interface::pipeline_settings::RtaoSettings;

use crate::render_pipeline::resource_names as names;

pub mod denoise;
pub mod trace;
pub mod upsample;

/// temporal history 的双缓冲
pub struct RtaoHistory;
impl RtaoHistory {
    pub const NAMES: [&'static str; 2] = [names::RTAO_HISTORY_0, names::RTAO_HISTORY_1];

    /// 返回 `(history_in, history_out)` 的索引
    ///
    /// 本帧写入的 buffer 在下一帧作为输入
    #[inline]
    pub fn roles(frame_id: u64) -> (usize, usize) {
        let history_out = (frame_id % 2) as usize;
        let history_in = (frame_id.wrapping_add(1) % 2) as usize;
        (history_in, history_out)
    }

    /// 返回 `(history_in, history_out)` 的资源名
    #[inline]
    pub fn names(frame_id: u64) -> (&'static str, &'static str) {
        let (history_in, history_out) = Self::roles(frame_id);
        (Self::NAMES[history_in], Self::NAMES[history_out])
    }
}

/// trace shader 中 temporal 混合的 CPU 版本
///
/// 当前值与 history 相差超过 `disocclusion_threshold`，或 history 无效时，
/// 完全丢弃 history。
pub fn rtao_temporal_blend(current: f32, history: f32, history_valid: bool, settings: &RtaoSettings) -> f32 {
    if !history_valid || (current - history).abs() > settings.disocclusion_threshold {
        return current;
    }
    settings.history_weight * history + (1.0 - settings.history_weight) * current
}

/// à-trous 迭代的输入
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AtrousSource {
    /// trace 的输出 `rtao_raw`
    Trace,
    /// ping-pong buffer 的索引
    PingPong(usize),
}
impl AtrousSource {
    #[inline]
    pub fn resource_name(self) -> &'static str {
        match self {
            Self::Trace => names::RTAO_RAW,
            Self::PingPong(index) => AtrousSchedule::PING_PONG[index],
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AtrousIteration {
    pub index: u32,
    pub source: AtrousSource,
    /// 写入的 ping-pong buffer 索引
    pub target: usize,
    /// 采样间隔，`1 << index`
    pub step: u32,
}
impl AtrousIteration {
    #[inline]
    pub fn target_name(&self) -> &'static str {
        AtrousSchedule::PING_PONG[self.target]
    }
}

/// à-trous 滤波的迭代计划
///
/// 第 `i` 次迭代：`i == 0` 时读取 `rtao_raw`，否则读取 ping-pong `(i - 1) % 2`；
/// 写入 ping-pong `i % 2`。最终结果位于 `(iterations - 1) % 2`。
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AtrousSchedule {
    iterations: u32,
}
impl AtrousSchedule {
    pub const PING_PONG: [&'static str; 2] = [names::RTAO_DENOISE_PING, names::RTAO_DENOISE_PONG];
    /// step 超过这个值时采样已经远离像素邻域
    pub const MAX_ITERATIONS: u32 = 16;

    /// `iterations` 被限制在 `[1, MAX_ITERATIONS]`
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.clamp(1, Self::MAX_ITERATIONS),
        }
    }

    #[inline]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn iteration(&self, index: u32) -> AtrousIteration {
        let source = if index == 0 {
            AtrousSource::Trace
        } else {
            AtrousSource::PingPong(((index - 1) % 2) as usize)
        };
        AtrousIteration {
            index,
            source,
            target: (index % 2) as usize,
            step: 1 << index,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = AtrousIteration> + '_ {
        (0..self.iterations).map(|index| self.iteration(index))
    }

    #[inline]
    pub fn final_target(&self) -> usize {
        ((self.iterations - 1) % 2) as usize
    }

    #[inline]
    pub fn final_name(&self) -> &'static str {
        Self::PING_PONG[self.final_target()]
    }
}
