//! Logger 单元测试

use crate::util::logger::{init_with_level, LogLevel};

#[cfg(test)]
mod level_tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(1), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(2), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(9), LogLevel::Trace);
    }

    #[test]
    fn test_level_maps_to_tracing() {
        assert_eq!(tracing::Level::from(LogLevel::Error), tracing::Level::ERROR);
        assert_eq!(tracing::Level::from(LogLevel::Trace), tracing::Level::TRACE);
    }

    #[test]
    fn test_second_init_is_ignored() {
        init_with_level(LogLevel::Warn);
        init_with_level(LogLevel::Trace);
        tracing::warn!("logger installed");
    }
}
