//! 启动模拟机器并运行全部自检
//!
//! 使用 `LOG=info cargo run --bin upsync-selftest` 查看输出。

use std::sync::Arc;

use upsync::config::MachineConfig;
use upsync::sim::{logging, selftest, Machine};
use upsync::Alarm;

fn main() {
    logging::init();
    let machine = Machine::boot(MachineConfig::default());
    let alarm = Alarm::new(Arc::clone(&machine));

    for (requested, waited) in selftest::alarm_self_test(&machine, &alarm) {
        assert!(
            waited >= requested as u64,
            "woke after {} ticks, asked for {}",
            waited,
            requested
        );
    }

    let order = selftest::interlock_self_test(&machine, 10);
    println!("interlock: {}", order.join(" "));

    let stats = machine.stats();
    println!(
        "self test passed: {} timer interrupts, {} context switches, {} idle periods",
        stats.timer_interrupts, stats.context_switches, stats.idle_periods
    );
}
