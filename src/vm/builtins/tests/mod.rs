//! 核心库测试

use crate::peripheral::gpio::{LoopbackGpio, PinMode, STATUS_HIGH, STATUS_INITIALIZED, STATUS_OUTPUT};
use crate::vm::tests::{boot, eval, eval_error, output, spawn};

#[cfg(test)]
mod string_tests {
    use super::*;

    #[test]
    fn test_concat_and_repeat() {
        assert_eq!(eval("s = 'ab'\ns << 'c'\ns + '!' * 3"), "\"abc!!!\"");
        assert_eq!(eval("'a' * 0"), "\"\"");
        assert_eq!(eval_error("'a' * -1"), "ArgumentError: negative argument");
        assert!(eval_error("'a' + 1").starts_with("TypeError"));
    }

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(eval("'  Hi There '.strip.upcase"), "\"HI THERE\"");
        assert_eq!(eval("'ABC'.downcase.reverse"), "\"cba\"");
        assert_eq!(eval("''.empty?"), "true");
    }

    #[test]
    fn test_search() {
        assert_eq!(eval("'hello'.index('l')"), "2");
        assert_eq!(eval("'hello'.index('z')"), "nil");
        assert_eq!(
            eval("s = 'hello'\n[s.include?('ell'), s.start_with?('he'), s.end_with?('lo')]"),
            "[true, true, true]"
        );
    }

    #[test]
    fn test_slicing() {
        assert_eq!(eval("'hello'[1]"), "\"e\"");
        assert_eq!(eval("'hello'[-1]"), "\"o\"");
        assert_eq!(eval("'hello'[1, 3]"), "\"ell\"");
        assert_eq!(eval("'hello'[1..2]"), "\"el\"");
        assert_eq!(eval("'hello'[10]"), "nil");
        assert_eq!(eval("'hello'[1..9223372036854775807]"), "\"ello\"");
        assert_eq!(eval("'hello'[1..-9223372036854775807]"), "\"\"");
    }

    #[test]
    fn test_oversized_repeat_raises_no_memory() {
        assert_eq!(
            eval_error("'ab' * 4611686018427387904"),
            "NoMemoryError: failed to allocate memory"
        );
        assert_eq!(
            eval_error("'ab' * 9223372036854775807"),
            "NoMemoryError: failed to allocate memory"
        );
        assert_eq!(eval("'ab' * 2"), "\"abab\"");
    }

    #[test]
    fn test_split_and_chars() {
        assert_eq!(eval("'a b  c'.split"), "[\"a\", \"b\", \"c\"]");
        assert_eq!(eval("'a,b,,'.split(',')"), "[\"a\", \"b\"]");
        assert_eq!(eval("'abc'.chars"), "[\"a\", \"b\", \"c\"]");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(eval("'42abc'.to_i"), "42");
        assert_eq!(eval("'2.5'.to_f"), "2.5");
        assert_eq!(eval("'name'.to_sym"), ":name");
        assert_eq!(eval(":name.to_s.length"), "4");
        assert_eq!(eval("'A'.ord"), "65");
        assert_eq!(eval("97.chr"), "\"a\"");
    }

    #[test]
    fn test_comparison() {
        assert_eq!(eval("['a' == 'a', 'a' < 'b', 'b' > 'c']"), "[true, true, false]");
    }

    #[test]
    fn test_inspect_escapes() {
        assert_eq!(eval("\"a\\tb\\n\\\"\""), "\"a\\tb\\n\\\"\"");
    }
}

#[cfg(test)]
mod array_tests {
    use super::*;

    #[test]
    fn test_push_pop_shift() {
        assert_eq!(
            eval("a = [1, 2]\na << 3\na.push(4)\nx = a.pop\ny = a.shift\na.unshift(0)\n[a, x, y]"),
            "[[0, 2, 3], 4, 1]"
        );
        assert_eq!(eval("[].pop"), "nil");
    }

    #[test]
    fn test_indexing() {
        assert_eq!(eval("a = [1, 2, 3]\n[a[0], a[-1], a[5]]"), "[1, 3, nil]");
        assert_eq!(eval("a = []\na[2] = :x\na"), "[nil, nil, :x]");
        assert_eq!(eval_error("a = [1]\na[-3] = 0"), "IndexError: index -3 too small for array");
    }

    #[test]
    fn test_insert_and_delete_at() {
        assert_eq!(eval("a = [1, 3]\na.insert(1, 2)\na"), "[1, 2, 3]");
        assert_eq!(eval("a = [1, 2, 3]\n[a.delete_at(1), a]"), "[2, [1, 3]]");
    }

    #[test]
    fn test_queries() {
        assert_eq!(
            eval("a = [3, 1, 2]\n[a.length, a.first, a.last, a.include?(2), a.index(1), [].empty?]"),
            "[3, 3, 2, true, 1, true]"
        );
    }

    #[test]
    fn test_transforms() {
        assert_eq!(eval("[3, 1, 2].sort"), "[1, 2, 3]");
        assert_eq!(eval("['b', 'a'].sort"), "[\"a\", \"b\"]");
        assert_eq!(eval("[1, nil, 1, 2, nil].compact.uniq"), "[1, 2]");
        assert_eq!(eval("[1, 2] + [3]"), "[1, 2, 3]");
        assert_eq!(eval("[1, 2].reverse"), "[2, 1]");
        assert_eq!(eval("[1, :a, 'b'].join('-')"), "\"1-a-b\"");
    }

    #[test]
    fn test_dup_is_shallow_copy() {
        assert_eq!(eval("a = [1]\nb = a.dup\nb << 2\n[a, b]"), "[[1], [1, 2]]");
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(eval("[4, 9, 2].min"), "2");
        assert_eq!(eval("[4, 9, 2].max"), "9");
        assert_eq!(eval("[].max"), "nil");
        assert_eq!(eval("[1, 2, 3.5].sum"), "6.5");
        assert!(eval_error("[1, 'a'].sort").starts_with("ArgumentError: comparison of"));
        assert_eq!(
            eval_error("[1, 'a'].sum"),
            "TypeError: String can't be coerced into Integer"
        );
    }

    #[test]
    fn test_enumeration_helpers() {
        assert_eq!(eval("[1, 2, 3].map { |x| x * 2 }"), "[2, 4, 6]");
        assert_eq!(eval("[1, 2, 3, 4].select { |x| x.even? }"), "[2, 4]");
        assert_eq!(eval("[1, 2, 3, 4].reject { |x| x.even? }"), "[1, 3]");
        assert_eq!(eval("[1, 2, 3].inject(0) { |s, x| s + x }"), "6");
        assert_eq!(eval("[1, 2, 3].find { |x| x > 1 }"), "2");
        assert_eq!(eval("[[1, [2, 3].any? { |x| x > 2 }], [4].all? { |x| x > 5 }]"), "[[1, true], false]");
    }

    #[test]
    fn test_new_with_size() {
        assert_eq!(eval("Array.new(3, 0)"), "[0, 0, 0]");
        assert_eq!(eval_error("Array.new(-1)"), "ArgumentError: negative array size");
    }

    #[test]
    fn test_oversized_arrays_raise_no_memory() {
        assert_eq!(
            eval_error("Array.new(1000000000000)"),
            "NoMemoryError: failed to allocate memory"
        );
        assert_eq!(
            eval_error("a = []\na[4611686018427387904] = 1"),
            "NoMemoryError: failed to allocate memory"
        );
        assert_eq!(
            eval_error("a = [1]\na[100000000] = 1"),
            "NoMemoryError: failed to allocate memory"
        );
    }

    #[test]
    fn test_slice_with_huge_bounds() {
        assert_eq!(eval("[1, 2, 3][0..9223372036854775807]"), "[1, 2, 3]");
        assert_eq!(eval("[1, 2, 3][1, 9223372036854775807]"), "[2, 3]");
    }
}

#[cfg(test)]
mod hash_tests {
    use super::*;

    #[test]
    fn test_store_and_fetch() {
        assert_eq!(eval("h = {}\nh[:a] = 1\nh.store('b', 2)\nh"), "{:a=>1, \"b\"=>2}");
        assert_eq!(eval("h = {a: 1}\n[h[:a], h[:z], h.fetch(:z, 0)]"), "[1, nil, 0]");
        assert_eq!(eval_error("{}.fetch(:k)"), "KeyError: key not found: :k");
    }

    #[test]
    fn test_insertion_order_survives_overwrite() {
        assert_eq!(eval("h = {b: 1, a: 2}\nh[:b] = 3\nh.keys"), "[:b, :a]");
    }

    #[test]
    fn test_string_keys_compare_by_value() {
        assert_eq!(eval("h = {'k' => 1}\nh['k']"), "1");
    }

    #[test]
    fn test_queries_and_delete() {
        assert_eq!(
            eval("h = {a: 1, b: 2}\nd = h.delete(:a)\n[d, h.key?(:a), h.include?(:b), h.size, h.values]"),
            "[1, false, true, 1, [2]]"
        );
        assert_eq!(eval("{}.empty?"), "true");
    }

    #[test]
    fn test_merge_and_to_a() {
        assert_eq!(eval("{a: 1}.merge({a: 2, b: 3})"), "{:a=>2, :b=>3}");
        assert_eq!(eval("{a: 1}.to_a"), "[[:a, 1]]");
    }

    #[test]
    fn test_each_pair() {
        assert_eq!(
            output("{a: 1, b: 2}.each_pair { |k, v| puts \"#{k}=#{v}\" }"),
            "a=1\nb=2\n"
        );
    }
}

#[cfg(test)]
mod range_tests {
    use super::*;

    #[test]
    fn test_bounds() {
        assert_eq!(eval("r = (1..5)\n[r.first, r.last, r.exclude_end?]"), "[1, 5, false]");
        assert_eq!(eval("(1...5).exclude_end?"), "true");
        assert_eq!(eval("(1..3)"), "1..3");
    }

    #[test]
    fn test_membership() {
        assert_eq!(eval("[(1..5).include?(5), (1...5).include?(5), (1..5) === 0]"), "[true, false, false]");
        assert_eq!(eval("(1.5..2.5).include?(2)"), "true");
    }

    #[test]
    fn test_size() {
        assert_eq!(eval("[(1..10).size, (1...10).size, (5..1).size]"), "[10, 9, 0]");
    }

    #[test]
    fn test_iteration() {
        assert_eq!(eval("(1..4).to_a"), "[1, 2, 3, 4]");
        assert_eq!(eval("s = 0\n(1...4).each { |i| s += i }\ns"), "6");
    }

    #[test]
    fn test_case_when_range() {
        assert_eq!(
            eval("x = 15\ncase x\nwhen 0..9 then :small\nwhen 10..99 then :medium\nelse :large\nend"),
            ":medium"
        );
    }

    #[test]
    fn test_bad_range() {
        assert_eq!(eval_error("Range.new(1, 'a')"), "ArgumentError: bad value for range");
    }
}

#[cfg(test)]
mod numeric_tests {
    use super::*;

    #[test]
    fn test_integer_predicates() {
        assert_eq!(
            eval("[4.even?, 4.odd?, 0.zero?, -3.abs, 3.succ, 3.pred]"),
            "[true, false, true, 3, 4, 2]"
        );
    }

    #[test]
    fn test_bit_operations() {
        assert_eq!(eval("[6 & 3, 6 | 3, 6 ^ 3, 1 << 4, 256 >> 4, -8 >> 1]"), "[2, 7, 5, 16, 16, -4]");
    }

    #[test]
    fn test_power_and_modulo() {
        assert_eq!(eval("[2 ** 10, -7 % 3, 7 % -3, 2 ** -1]"), "[1024, 2, -2, 0.5]");
    }

    #[test]
    fn test_float_rounding() {
        assert_eq!(eval("[2.7.floor, 2.1.ceil, 2.5.round, -2.5.round, 3.14159.round(2)]"), "[2, 3, 3, -3, 3.14]");
        assert_eq!(eval("7.9.to_i"), "7");
    }

    #[test]
    fn test_float_special_values() {
        assert_eq!(eval("x = 1.0 / 0\n[x.infinite?, (0.0 / 0.0).nan?, 1.5.infinite?]"), "[1, true, nil]");
        assert_eq!(eval_error("(0.0 / 0.0).to_i"), "FloatDomainError: NaN");
        assert_eq!(eval_error("(-1.0 / 0).round"), "FloatDomainError: -Infinity");
    }

    #[test]
    fn test_spaceship_and_mixed_comparison() {
        assert_eq!(eval("[1 <=> 2, 2 <=> 2, 3 <=> 2.5, 1 <=> 'a']"), "[-1, 0, 1, nil]");
        assert_eq!(eval("[1 == 1.0, 2 >= 1.5]"), "[true, true]");
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(eval("[1.0, 0.1 + 0.2, 1e20, -0.0]"), "[1.0, 0.30000000000000004, 1.0e+20, -0.0]");
        assert_eq!(eval("3.to_f.to_s"), "\"3.0\"");
    }

    #[test]
    fn test_chr_out_of_range() {
        assert_eq!(eval_error("-1.chr"), "RangeError: -1 out of char range");
    }
}

#[cfg(test)]
mod exception_tests {
    use super::*;

    #[test]
    fn test_message_defaults_to_class_name() {
        assert_eq!(eval("RuntimeError.new.message"), "\"RuntimeError\"");
        assert_eq!(eval("ArgumentError.new('bad').message"), "\"bad\"");
    }

    #[test]
    fn test_inspect() {
        assert_eq!(eval("TypeError.new('oops')"), "#<TypeError: oops>");
    }

    #[test]
    fn test_user_subclass() {
        let source = "class AppError < StandardError\nend\nbegin\n  raise AppError, 'boom'\nrescue StandardError => e\n  [e.class, e.message, e.is_a?(AppError)]\nend";
        assert_eq!(eval(source), "[AppError, \"boom\", true]");
    }

    #[test]
    fn test_raise_with_message_only() {
        assert_eq!(eval_error("raise 'plain'"), "RuntimeError: plain");
    }
}

#[cfg(test)]
mod gpio_tests {
    use super::*;

    #[test]
    fn test_output_pin() {
        let (mut vm, _) = boot();
        let gpio = LoopbackGpio::new();
        let pins = gpio.pins();
        vm.register_peripheral("gpio", Box::new(gpio));
        let task = spawn(
            &mut vm,
            "led = GPIO.new(13, GPIO::OUT)\nled.write(GPIO::HIGH)\n[led.pin, led.high?, led.status]",
            10,
        );
        vm.run_until_idle().expect("runs");
        let expected = format!(
            "[13, true, {}]",
            STATUS_INITIALIZED | STATUS_OUTPUT | STATUS_HIGH
        );
        assert_eq!(vm.inspect(vm.task_result(task)), expected);
        assert_eq!(pins.level(13), Some(true));
        assert_eq!(pins.mode(13), Some(PinMode::Output));
    }

    #[test]
    fn test_input_pin_follows_host() {
        let (mut vm, _) = boot();
        let gpio = LoopbackGpio::new();
        let pins = gpio.pins();
        vm.register_peripheral("gpio", Box::new(gpio));
        let task = spawn(
            &mut vm,
            "$button = GPIO.new(4)\nTask.suspend\n$button.read",
            10,
        );
        vm.run_until_idle().expect("runs");
        pins.set_level(4, true);
        vm.resume_task(task).expect("resumes");
        vm.run_until_idle().expect("runs");
        assert_eq!(vm.inspect(vm.task_result(task)), "1");
    }

    #[test]
    fn test_pull_up_reads_high() {
        assert_eq!(eval("GPIO.new(2, GPIO::PULL_UP).low?"), "false");
    }

    #[test]
    fn test_writing_input_pin_raises() {
        assert_eq!(
            eval_error("GPIO.new(2, GPIO::IN).write(1)"),
            "RuntimeError: device error: pin 2 is not an output"
        );
    }

    #[test]
    fn test_invalid_pin_and_mode() {
        assert_eq!(eval_error("GPIO.new(-1)"), "ArgumentError: invalid pin -1");
        assert_eq!(eval_error("GPIO.new(1, 7)"), "ArgumentError: invalid pin mode 7");
        assert_eq!(eval_error("GPIO.new(900)"), "RuntimeError: invalid channel 900");
    }

    #[test]
    fn test_missing_driver() {
        let (mut vm, _) = boot();
        let _ = vm.peripherals_mut().unregister("gpio");
        let task = spawn(&mut vm, "GPIO.new(1)", 10);
        vm.run_until_idle().expect("runs");
        let err = vm.task_error(task).expect("raised");
        assert_eq!(
            vm.describe_exception(err),
            "RuntimeError: no driver registered as 'gpio'"
        );
    }
}
