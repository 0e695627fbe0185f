use super::*;
use crate::util::config::RuntimeConfig;
use crate::vm::console::{CaptureBuffer, Console};

fn setup() -> (Vm, Sandbox, CaptureBuffer) {
    let mut vm = Vm::new(RuntimeConfig::simulated(50)).expect("boots");
    let (console, out) = Console::capture();
    vm.set_console(console);
    let sandbox = Sandbox::new(&mut vm).expect("sandbox task");
    (vm, sandbox, out)
}

#[cfg(test)]
mod protocol_tests {
    use super::*;

    #[test]
    fn test_starts_suspended() {
        let (vm, sandbox, _) = setup();
        assert_eq!(sandbox.state(&vm), TaskState::Suspended);
        assert_eq!(vm.task_name(sandbox.task()), Some(SANDBOX_TASK));
        assert!(sandbox.error(&vm).is_none());
    }

    #[test]
    fn test_compile_execute_cycle() {
        let (mut vm, mut sandbox, out) = setup();
        assert!(sandbox.compile(&mut vm, "puts 'hi'\n1 + 2"));
        assert_eq!(sandbox.state(&vm), TaskState::Suspended);
        assert!(sandbox.execute(&mut vm));
        assert_eq!(sandbox.state(&vm), TaskState::Ready);

        vm.run_until_idle().expect("runs");
        assert_eq!(sandbox.state(&vm), TaskState::Suspended);
        assert_eq!(sandbox.result(&vm), Value::Integer(3));
        assert_eq!(out.contents(), "hi\n");
    }

    #[test]
    fn test_execute_without_compile_reruns_nothing() {
        let (mut vm, mut sandbox, _) = setup();
        // the initial unit is empty
        assert!(sandbox.execute(&mut vm));
        vm.run_until_idle().expect("runs");
        assert_eq!(sandbox.result(&vm), Value::Nil);
    }

    #[test]
    fn test_execute_refused_while_busy() {
        let (mut vm, mut sandbox, _) = setup();
        assert!(sandbox.compile(&mut vm, "1"));
        assert!(sandbox.execute(&mut vm));
        assert!(!sandbox.execute(&mut vm));
        vm.run_until_idle().expect("runs");
        assert!(sandbox.execute(&mut vm));
    }

    #[test]
    fn test_locals_do_not_survive_between_units() {
        let (mut vm, mut sandbox, _) = setup();
        assert!(sandbox.eval(&mut vm, "x = 5").expect("runs"));
        assert!(!sandbox.eval(&mut vm, "x").expect("runs"));
        let message = sandbox.error_message(&vm).expect("error");
        assert!(message.starts_with("NameError") || message.starts_with("NoMethodError"), "{}", message);
    }

    #[test]
    fn test_globals_survive_between_units() {
        let (mut vm, mut sandbox, _) = setup();
        assert!(sandbox.eval(&mut vm, "$total = 40").expect("runs"));
        assert!(sandbox.eval(&mut vm, "$total + 2").expect("runs"));
        assert_eq!(sandbox.result(&vm), Value::Integer(42));
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[test]
    fn test_syntax_error_keeps_diagnostic() {
        let (mut vm, mut sandbox, _) = setup();
        assert!(!sandbox.compile(&mut vm, "1 +"));
        let err = sandbox.compile_error().expect("compile error");
        assert_eq!(err.line(), 1);
        assert!(!sandbox.execute(&mut vm));
        assert_eq!(sandbox.state(&vm), TaskState::Suspended);

        // a later successful compile clears it
        assert!(sandbox.compile(&mut vm, "2"));
        assert!(sandbox.diagnostic().is_none());
    }

    #[test]
    fn test_failed_compile_does_not_disturb_other_tasks() {
        let (mut vm, mut sandbox, out) = setup();
        let worker = vm
            .compile("i = 0\nwhile i < 3\n  puts i\n  i += 1\nend\ni")
            .expect("compiles");
        let task = vm.create_task(&worker.irep, 1).expect("task");

        assert!(!sandbox.compile(&mut vm, "1 +"));
        vm.run_until_idle().expect("runs");

        assert_eq!(vm.task_result(task), Value::Integer(3));
        assert!(vm.task_error(task).is_none());
        assert_eq!(out.contents(), "0\n1\n2\n");
    }

    #[test]
    fn test_runtime_error_is_reported() {
        let (mut vm, mut sandbox, _) = setup();
        assert!(!sandbox.eval(&mut vm, "1 / 0").expect("runs"));
        assert_eq!(
            sandbox.error_message(&vm).as_deref(),
            Some("ZeroDivisionError: divided by 0")
        );
        assert_eq!(sandbox.state(&vm), TaskState::Suspended);

        // the next run starts clean
        assert!(sandbox.eval(&mut vm, ":ok").expect("runs"));
        assert!(sandbox.error(&vm).is_none());
    }
}

#[cfg(test)]
mod retention_tests {
    use super::*;

    #[test]
    fn test_methods_outlive_their_unit() {
        let (mut vm, mut sandbox, _) = setup();
        assert!(sandbox.eval(&mut vm, "def answer\n  6 * 7\nend").expect("runs"));
        let before = vm.memory_stats().used;
        // the unit defining `answer` is released here but still referenced
        assert!(sandbox.eval(&mut vm, "answer").expect("runs"));
        assert_eq!(sandbox.result(&vm), Value::Integer(42));
        assert!(vm.memory_stats().used >= before);
    }

    #[test]
    fn test_unreferenced_units_are_freed() {
        let (mut vm, mut sandbox, _) = setup();
        assert!(sandbox.eval(&mut vm, "1").expect("runs"));
        let baseline = vm.memory_stats().used;
        for _ in 0..20 {
            assert!(sandbox.eval(&mut vm, "1").expect("runs"));
        }
        assert_eq!(vm.memory_stats().used, baseline);
    }

    #[test]
    fn test_close_releases_the_task() {
        let (mut vm, mut sandbox, _) = setup();
        assert!(sandbox.eval(&mut vm, "[1, 2]").expect("runs"));
        let task = sandbox.task();
        sandbox.close(&mut vm).expect("closes");
        assert!(vm.task_error(task).is_none());
    }
}
