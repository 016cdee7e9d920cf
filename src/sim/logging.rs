//! 带颜色的控制台日志
//!
//! 日志级别在编译期由环境变量 `LOG` 决定（`error` / `warn` / `info` /
//! `debug` / `trace`），未设置时关闭。`init` 可以重复调用。

use lazy_static::lazy_static;
use log::{Level, LevelFilter, Log, Metadata, Record};

struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        std::eprintln!(
            "\x1b[{}m[{:>5}][{}] {}\x1b[0m",
            level_to_color_code(record.level()),
            record.level(),
            std::thread::current().name().unwrap_or("-"),
            record.args()
        );
    }

    fn flush(&self) {}
}

lazy_static! {
    static ref INSTALLED: bool = {
        static LOGGER: Logger = Logger;
        let installed = log::set_logger(&LOGGER).is_ok();
        if installed {
            log::set_max_level(level_from_env());
        }
        installed
    };
}

/// 安装控制台日志，返回本进程的日志是否由它输出
pub fn init() -> bool {
    *INSTALLED
}

fn level_from_env() -> LevelFilter {
    match option_env!("LOG") {
        Some("error") => LevelFilter::Error,
        Some("warn") => LevelFilter::Warn,
        Some("info") => LevelFilter::Info,
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

fn level_to_color_code(level: Level) -> u8 {
    match level {
        Level::Error => 31, // Red
        Level::Warn => 93,  // BrightYellow
        Level::Info => 34,  // Blue
        Level::Debug => 32, // Green
        Level::Trace => 90, // BrightBlack
    }
}
