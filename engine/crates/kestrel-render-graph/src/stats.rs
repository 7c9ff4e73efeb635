use std::time::Duration;

/// 单个 Pass 一次执行的统计
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgPassStats {
    pub name: String,
    /// 录制该 Pass（含 barrier）花费的 CPU 时间
    pub cpu_time: Duration,
    pub barrier_count: usize,
}

/// 一次 `RenderGraph::execute` 的统计，按执行顺序
#[derive(Clone, Debug, Default)]
pub struct RgExecutionStats {
    pub passes: Vec<RgPassStats>,
}

impl RgExecutionStats {
    #[inline]
    pub fn total_cpu_time(&self) -> Duration {
        self.passes.iter().map(|pass| pass.cpu_time).sum()
    }

    #[inline]
    pub fn total_barrier_count(&self) -> usize {
        self.passes.iter().map(|pass| pass.barrier_count).sum()
    }

    pub fn pass(&self, name: &str) -> Option<&RgPassStats> {
        self.passes.iter().find(|pass| pass.name == name)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.passes.clear();
    }

    pub fn log_summary(&self) {
        for pass in &self.passes {
            log::debug!(
                "{:<24} {:>8.3} ms  {} barriers",
                pass.name,
                pass.cpu_time.as_secs_f64() * 1000.0,
                pass.barrier_count
            );
        }
        log::debug!("render graph cpu time: {:.3} ms", self.total_cpu_time().as_secs_f64() * 1000.0);
    }
}
