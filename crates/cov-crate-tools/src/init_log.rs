use std::io::Write;

/// 初始化全局 logger，默认级别为 Info，可以通过 `RUST_LOG` 覆盖
///
/// 重复调用会 panic，嵌入到其他程序中时使用 [`try_init_log`]
pub fn init_log() {
    builder(log::LevelFilter::Info).init();
}

/// 尝试初始化全局 logger
///
/// 如果 logger 已经被设置过，返回 false。测试中可以在每个用例里调用
pub fn try_init_log(level: log::LevelFilter) -> bool {
    builder(level).is_test(true).try_init().is_ok()
}

fn builder(level: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.format(format_record).filter(None, level).parse_default_env();
    builder
}

/// 单条日志的格式：
///
/// ```text
/// [2024/01/01 12:00:00] INFO: msg
///      In module At file:line
/// ```
fn format_record(buf: &mut env_logger::fmt::Formatter, record: &log::Record) -> std::io::Result<()> {
    let info_style = buf
        .default_level_style(log::Level::Info)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
    let warn_style = buf
        .default_level_style(log::Level::Warn)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
    let error_style = buf
        .default_level_style(log::Level::Error)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

    let level_style = match record.level() {
        log::Level::Info => info_style,
        log::Level::Warn => warn_style,
        log::Level::Error => error_style,
        _ => buf.default_level_style(record.level()),
    };
    let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

    let line = record.line().unwrap_or(!0);
    let file = short_file_name(record.file().unwrap_or(""));
    let time = chrono::Local::now().format("%Y/%m/%d %H:%M:%S");
    let level = record.level();
    let module = record.module_path().unwrap_or("");

    writeln!(
        buf,
        "{level_style}[{time}] {level}: {}{level_style:#}\n\t {grey_style}In {module} At {file}:{line}{grey_style:#}",
        record.args()
    )
}

/// 同时兼容 windows 和 unix 的路径分隔符
fn short_file_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}
