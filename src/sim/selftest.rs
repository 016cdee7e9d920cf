//! 自检程序
//!
//! 在模拟机器上端到端地运行 [`Alarm`] 与 [`Condvar`]，结果同时写入日志。

use std::string::{String, ToString};
use std::sync::Arc;
use std::vec::Vec;

use super::Machine;
use crate::hal::{ThreadOps, TimerDevice};
use crate::sync::{Condvar, Mutex, MutexBlocking};
use crate::timer::Alarm;

/// `alarm_self_test` 使用的等待时长
pub const ALARM_DURATIONS: [i64; 3] = [1000, 10 * 1000, 100 * 1000];

/// 依次睡眠 [`ALARM_DURATIONS`] 中的各个时长
///
/// 返回 `(请求的 tick 数, 实际经过的 tick 数)`。
pub fn alarm_self_test(machine: &Machine, alarm: &Alarm<Machine>) -> Vec<(i64, u64)> {
    ALARM_DURATIONS
        .iter()
        .map(|&duration| {
            let t0 = machine.now();
            alarm.wait_until(duration);
            let waited = machine.now() - t0;
            log::info!("alarm self test: waited for {} ticks", waited);
            (duration, waited)
        })
        .collect()
}

/// ping / pong 两个线程轮流 `wake` 与 `sleep`
///
/// 每个线程在持锁状态下记录自己的名字，然后唤醒对方、自己睡眠，共 `rounds` 轮。
/// 等待 ping 结束后返回记录到的顺序；pong 最后仍睡在条件变量上。
pub fn interlock_self_test(machine: &Arc<Machine>, rounds: usize) -> Vec<String> {
    let lock: Arc<dyn Mutex> = Arc::new(MutexBlocking::new(Arc::clone(machine)));
    let cv = Arc::new(Condvar::new(Arc::clone(machine), lock));
    let order = Arc::new(spin::Mutex::new(Vec::new()));

    let interlocker = || {
        let machine = Arc::clone(machine);
        let cv = Arc::clone(&cv);
        let order = Arc::clone(&order);
        move || {
            cv.lock().acquire();
            for _ in 0..rounds {
                let name = machine.current_thread().name().to_string();
                order.lock().push(name);
                cv.wake();
                cv.sleep();
            }
            cv.lock().release();
        }
    };

    let ping = machine.fork("ping", interlocker());
    let _pong = machine.fork("pong", interlocker());
    machine.join(&ping);

    let order = order.lock().clone();
    log::info!("interlock self test: {}", order.join(" "));
    order
}
