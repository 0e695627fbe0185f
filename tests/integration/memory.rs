//! Reference counting and arena behavior under whole programs

use proptest::prelude::*;
use tinyrb::vm::Console;
use tinyrb::{RuntimeConfig, Value, Vm};

/// A single task slot, already used once, so every later task reuses the
/// same control block size
fn quiet_vm(mut config: RuntimeConfig) -> Vm {
    config.max_tasks = 1;
    let mut vm = Vm::new(config).expect("boots");
    let (console, _) = Console::capture();
    vm.set_console(console);
    assert_eq!(run_and_release(&mut vm, "nil"), None);
    vm
}

/// Run `source` as one task, release its unit, return the exception text if any
fn run_and_release(
    vm: &mut Vm,
    source: &str,
) -> Option<String> {
    let unit = vm.compile(source).expect("compiles");
    let task = vm.create_task(&unit.irep, 10).expect("task");
    vm.run_until_idle().expect("runs");
    let error = vm.task_error(task).map(|e| vm.describe_exception(e));
    vm.release_irep(unit);
    error
}

#[test]
fn test_garbage_is_reclaimed_after_task_ends() {
    let mut vm = quiet_vm(RuntimeConfig::simulated(100));
    let live = vm.heap().stats().live;
    let used = vm.memory_stats().used;

    let source = r#"
i = 0
while i < 200
  a = [i.to_s, "x" * i, {k: [i]}]
  a << a.dup
  i += 1
end
nil
"#;
    assert_eq!(run_and_release(&mut vm, source), None);
    assert_eq!(vm.heap().stats().live, live);
    assert_eq!(vm.memory_stats().used, used);
    assert!(vm.heap().stats().destroyed >= 800);
}

#[test]
fn test_globals_keep_values_alive() {
    let mut vm = quiet_vm(RuntimeConfig::simulated(100));
    let live = vm.heap().stats().live;
    assert_eq!(run_and_release(&mut vm, "$keep = ['a', 'b']\nnil"), None);
    // the array and its two strings
    assert_eq!(vm.heap().stats().live, live + 3);

    assert_eq!(run_and_release(&mut vm, "$keep = nil"), None);
    assert_eq!(vm.heap().stats().live, live);
}

#[test]
fn test_arena_exhaustion_raises_no_memory_error() {
    let mut vm = quiet_vm(RuntimeConfig::simulated(100));
    let used = vm.memory_stats().used;
    let source = "s = 'x'\nwhile true\n  s = s + s\nend";
    assert_eq!(
        run_and_release(&mut vm, source).as_deref(),
        Some("NoMemoryError: failed to allocate memory")
    );
    assert_eq!(vm.memory_stats().used, used);

    // the VM keeps working once the task is gone
    let unit = vm.compile("[1, 2, 3].sum").expect("compiles");
    let task = vm.create_task(&unit.irep, 10).expect("task");
    vm.run_until_idle().expect("runs");
    assert_eq!(vm.task_result(task), Value::Integer(6));
}

#[test]
fn test_fragmentation_is_reported() {
    let mut vm = quiet_vm(RuntimeConfig::simulated(100));
    assert_eq!(
        run_and_release(
            &mut vm,
            "$a = []\n50.times { |i| $a << ('y' * (i * 10)) }\n25.times { |i| $a[i * 2] = nil }\nnil",
        ),
        None
    );
    let stats = vm.memory_stats();
    assert!(stats.free_blocks > 1, "{:?}", stats);
    assert!(stats.largest_free <= stats.free);
    assert!(stats.fragmentation > 0.0);
}

#[derive(Debug, Clone)]
enum Step {
    PushString(u8),
    PushArray,
    Pop,
    Store(u8),
    Drop(u8),
    Clear,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..40).prop_map(Step::PushString),
        Just(Step::PushArray),
        Just(Step::Pop),
        (0u8..4).prop_map(Step::Store),
        (0u8..4).prop_map(Step::Drop),
        Just(Step::Clear),
    ]
}

fn render(steps: &[Step]) -> String {
    let mut source = String::from("a = []\nh = {}\n");
    for s in steps {
        let line = match s {
            Step::PushString(n) => format!("a << ('s' * {})", n),
            Step::PushArray => "a << [a.length, a.last]".to_string(),
            Step::Pop => "a.pop".to_string(),
            Step::Store(k) => format!("h[{}] = a.dup", k),
            Step::Drop(k) => format!("h.delete({})", k),
            Step::Clear => "a = []".to_string(),
        };
        source.push_str(&line);
        source.push('\n');
    }
    source.push_str("nil\n");
    source
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_programs_leave_no_garbage(steps in proptest::collection::vec(step(), 1..40)) {
        let mut vm = quiet_vm(RuntimeConfig::simulated(100));
        let live = vm.heap().stats().live;
        let used = vm.memory_stats().used;
        prop_assert_eq!(run_and_release(&mut vm, &render(&steps)), None);
        prop_assert_eq!(vm.heap().stats().live, live);
        prop_assert_eq!(vm.memory_stats().used, used);
    }
}
