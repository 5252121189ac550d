use std::io::Write;

use log::LevelFilter;
use time::{macros::format_description, OffsetDateTime};

/// Map the number of `-v` flags to a level. `RUST_LOG` still wins when set.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Initialize stderr logging with `[HH:MM:SS] LEVEL target - message` lines.
pub fn init(verbosity: u8) {
    let fmt = format_description!("[hour]:[minute]:[second]");
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level_for(verbosity))
        .parse_default_env()
        .format(move |buf, record| {
            let stamp = OffsetDateTime::now_utc()
                .format(fmt)
                .unwrap_or_else(|_| String::from("--:--:--"));
            writeln!(
                buf,
                "[{}] {:<5} {} - {}",
                stamp,
                record.level(),
                record.target(),
                record.args()
            )
        });
    // A second init (tests, embedding) keeps the first logger.
    if builder.try_init().is_err() {
        log::debug!("logger already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for(0), LevelFilter::Warn);
        assert_eq!(level_for(2), LevelFilter::Debug);
        assert_eq!(level_for(9), LevelFilter::Trace);
    }

    #[test]
    fn init_twice_is_harmless() {
        init(0);
        init(3);
    }
}
