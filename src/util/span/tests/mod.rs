//! Span 单元测试

use crate::util::span::Position;

#[cfg(test)]
mod position_tests {
    use super::*;

    #[test]
    fn test_position_creation() {
        let pos = Position::new(3, 7, 42);
        assert_eq!(pos.line, 3);
        assert_eq!(pos.column, 7);
        assert_eq!(pos.offset, 42);
    }

    #[test]
    fn test_position_start() {
        assert_eq!(Position::start(), Position::new(1, 1, 0));
    }

    #[test]
    fn test_position_display() {
        assert_eq!(Position::new(10, 20, 0).to_string(), "10:20");
    }

    #[test]
    fn test_default_is_unset() {
        let pos = Position::default();
        assert_eq!((pos.line, pos.column), (0, 0));
    }
}
