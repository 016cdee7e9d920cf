//! 模拟机器的时间参数
//!
//! 所有时间均以 tick 为单位。

/// 相邻两次时钟中断之间的 tick 数
pub const TIMER_INTERVAL: u64 = 500;

/// 每次由关中断恢复为开中断时，内核代码消耗的 tick 数
pub const KERNEL_TICK: u64 = 10;

/// 就绪队列为空时，空转等待的时钟中断周期上限，超过即视为死锁
pub const IDLE_LIMIT: u64 = 1_000_000;

/// 模拟机器配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    pub timer_interval: u64,
    pub kernel_tick: u64,
    pub idle_limit: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            timer_interval: TIMER_INTERVAL,
            kernel_tick: KERNEL_TICK,
            idle_limit: IDLE_LIMIT,
        }
    }
}

impl MachineConfig {
    pub fn with_timer_interval(mut self, ticks: u64) -> Self {
        assert!(ticks > 0, "timer interval must be positive");
        self.timer_interval = ticks;
        self
    }

    pub fn with_kernel_tick(mut self, ticks: u64) -> Self {
        self.kernel_tick = ticks;
        self
    }

    pub fn with_idle_limit(mut self, periods: u64) -> Self {
        self.idle_limit = periods;
        self
    }
}
