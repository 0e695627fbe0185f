//! Whole programs through the public API

use std::sync::Arc;

use tinyrb::peripheral::gpio::PinMode;
use tinyrb::runtime::scheduler::TickSource;
use tinyrb::vm::{CaptureBuffer, Console};
use tinyrb::{
    LoopbackGpio, Peripheral, PeripheralError, RuntimeConfig, TaskHandle, TaskState, Value, Vm,
};

fn vm() -> (Vm, CaptureBuffer) {
    let mut vm = Vm::new(RuntimeConfig::simulated(100)).expect("boots");
    let (console, out) = Console::capture();
    vm.set_console(console);
    (vm, out)
}

fn spawn(
    vm: &mut Vm,
    source: &str,
    priority: u8,
) -> TaskHandle {
    let unit = vm.compile(source).expect("compiles");
    vm.create_task(&unit.irep, priority).expect("task")
}

const FIBONACCI: &str = r#"
def fib(n)
  if n < 2
    n
  else
    fib(n - 1) + fib(n - 2)
  end
end

def fib_iter(n)
  a, b = 0, 1
  n.times { a, b = b, a + b }
  a
end

(0..10).each { |i| print fib(i), " " }
puts
puts fib_iter(90)
fib(20)
"#;

#[test]
fn test_fibonacci() {
    let (mut vm, out) = vm();
    let task = spawn(&mut vm, FIBONACCI, 10);
    vm.run_until_idle().expect("runs");
    assert!(vm.task_error(task).is_none());
    assert_eq!(
        out.contents(),
        "0 1 1 2 3 5 8 13 21 34 55 \n2880067194370816120\n"
    );
    assert_eq!(vm.task_result(task), Value::Integer(6765));
}

const CLASSES: &str = r##"
class Shape
  attr_reader :name

  def initialize(name)
    @name = name
  end

  def to_s
    "#{name} with area #{area}"
  end
end

class Rect < Shape
  def initialize(w, h)
    super("rect")
    @w = w
    @h = h
  end

  def area
    @w * @h
  end
end

class Circle < Shape
  def initialize(r)
    super("circle")
    @r = r
  end

  def area
    (3.0 * @r * @r).round(1)
  end
end

shapes = [Rect.new(2, 3), Circle.new(1)]
shapes.each { |s| puts s.to_s }
totals = {}
shapes.each { |s| totals[s.name.to_sym] = s.area }
totals
"##;

#[test]
fn test_classes_and_collections() {
    let (mut vm, out) = vm();
    let task = spawn(&mut vm, CLASSES, 10);
    vm.run_until_idle().expect("runs");
    assert!(vm.task_error(task).is_none());
    assert_eq!(out.contents(), "rect with area 6\ncircle with area 3.0\n");
    assert_eq!(vm.inspect(vm.task_result(task)), "{:rect=>6, :circle=>3.0}");
}

const BLINK: &str = r#"
led = GPIO.new(13, GPIO::OUT)
4.times do |i|
  led.write(i.even? ? GPIO::HIGH : GPIO::LOW)
  state = led.high? ? "on" : "off"
  puts "led #{state}"
  sleep_ms 10
end
led.status
"#;

const WATCH: &str = r#"
button = GPIO.new(4, GPIO::IN)
presses = 0
while presses < 2
  if button.high?
    presses += 1
    puts "press #{presses}"
    Task.suspend if presses < 2
  else
    Task.pass
  end
end
presses
"#;

#[test]
fn test_gpio_tasks_with_mock_driver() {
    let (mut vm, out) = vm();
    let gpio = LoopbackGpio::new();
    let pins = gpio.pins();
    vm.register_peripheral("gpio", Box::new(gpio));

    let blink = spawn(&mut vm, BLINK, 20);
    let watch = spawn(&mut vm, WATCH, 30);

    // the watcher polls while the blinker sleeps
    vm.run_until_tick(5).expect("runs");
    assert_eq!(pins.mode(13), Some(PinMode::Output));
    assert!(vm.task_error(watch).is_none());

    pins.set_level(4, true);
    vm.run_until_tick(10).expect("runs");
    assert_eq!(vm.task_state(watch), Some(TaskState::Suspended));

    vm.resume_task(watch).expect("resumes");
    vm.run_until_idle().expect("runs");

    assert_eq!(vm.task_result(watch), Value::Integer(2));
    assert_eq!(vm.task_state(blink), Some(TaskState::Dormant));
    assert_eq!(pins.level(13), Some(false));
    // initialized output, level low
    assert_eq!(vm.task_result(blink), Value::Integer(0b011));

    let text = out.contents();
    let leds: Vec<&str> = text.lines().filter(|l| l.starts_with("led")).collect();
    assert_eq!(leds, ["led on", "led off", "led on", "led off"]);
    assert!(text.contains("press 1\n"));
    assert!(text.contains("press 2\n"));
}

/// Input pins whose level flips at fixed VM ticks
struct ScheduledInput {
    tick: Arc<TickSource>,
    flips: Vec<u64>,
}

impl Peripheral for ScheduledInput {
    fn init(
        &mut self,
        _channel: u32,
        _config: &[i64],
    ) -> Result<(), PeripheralError> {
        Ok(())
    }

    fn read(
        &mut self,
        _channel: u32,
    ) -> Result<i64, PeripheralError> {
        let now = self.tick.now();
        Ok((self.flips.iter().filter(|t| **t <= now).count() % 2) as i64)
    }

    fn write(
        &mut self,
        _channel: u32,
        _value: i64,
    ) -> Result<(), PeripheralError> {
        Err(PeripheralError::Device("input only".to_string()))
    }

    fn status(
        &self,
        _channel: u32,
    ) -> Result<i64, PeripheralError> {
        Ok(0)
    }
}

const FIB_APPENDER: &str = r#"
$fib = [0, 1]
18.times do
  $fib << $fib[-1] + $fib[-2]
  sleep_ms 12
end
$fib.length
"#;

const EDGE_WATCHER: &str = r#"
$seen = []
button = GPIO.new(4)
last = button.read
loop do
  level = button.read
  if level != last
    $seen << level
    last = level
  end
  sleep_ms 4
end
"#;

#[test]
fn test_fibonacci_and_gpio_watcher_share_time() {
    let (mut vm, _) = vm();
    let driver = ScheduledInput {
        tick: vm.tick_source(),
        flips: vec![10, 30, 50, 70, 90],
    };
    vm.register_peripheral("gpio", Box::new(driver));

    let fib = spawn(&mut vm, FIB_APPENDER, 10);
    let watcher = spawn(&mut vm, EDGE_WATCHER, 20);
    vm.run_until_tick(100).expect("runs");

    assert!(vm.task_error(fib).is_none());
    assert_eq!(vm.task_state(fib), Some(TaskState::Dormant));
    assert_eq!(vm.task_result(fib), Value::Integer(20));
    let numbers = vm.int_array(vm.global("fib")).expect("array of integers");
    assert_eq!(numbers.len(), 20);
    assert_eq!(numbers[19], 4181);
    assert!(numbers.windows(3).all(|w| w[2] == w[0] + w[1]));

    // every flip was observed exactly once, in order
    assert!(vm.task_error(watcher).is_none());
    assert_ne!(vm.task_state(watcher), Some(TaskState::Dormant));
    let seen = vm.int_array(vm.global("seen")).expect("array of integers");
    assert_eq!(seen, vec![1, 0, 1, 0, 1]);

    vm.terminate_task(watcher).expect("terminates");
}

#[test]
fn test_task_failure_is_reported_per_task() {
    let source = "def check(x)\n  raise ArgumentError, \"bad #{x}\" if x > 2\n  x\nend\ncheck(1)\ncheck(5)";
    let report = tinyrb::run(source, RuntimeConfig::simulated(100)).expect("runs");
    assert!(!report.is_success());
    assert_eq!(
        report.errors,
        vec![("main".to_string(), "ArgumentError: bad 5".to_string())]
    );

    let ok = tinyrb::run("x = [1, 2, 3].sum\nx", RuntimeConfig::simulated(100)).expect("runs");
    assert!(ok.is_success());
}

#[test]
fn test_compile_error_surfaces_position() {
    let err = tinyrb::run("x = 1\nputs(x", RuntimeConfig::default()).expect_err("should fail");
    let message = format!("{:#}", err);
    assert!(message.contains("2:"), "{}", message);
    assert!(message.contains("syntax error"), "{}", message);
}

#[test]
fn test_run_files_one_task_per_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let good = dir.path().join("good.rb");
    let bad = dir.path().join("bad.rb");
    std::fs::write(&good, "x = 1 + 1\n").expect("write");
    std::fs::write(&bad, "nil.upcase\n").expect("write");

    let report = tinyrb::run_files(&[&good, &bad], RuntimeConfig::simulated(100)).expect("runs");
    assert_eq!(report.errors.len(), 1);
    let (task, message) = &report.errors[0];
    assert!(task.ends_with("bad.rb"), "{}", task);
    assert_eq!(message, "NoMethodError: undefined method 'upcase' for nil");
}

#[test]
fn test_dump_lists_bytecode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("hello.rb");
    std::fs::write(&path, "def greet\n  puts 'hi'\nend\ngreet").expect("write");
    let listing = tinyrb::dump_file(&path).expect("dumps");
    assert!(listing.starts_with("irep #0"), "{}", listing);
    assert!(listing.contains("greet"));
    assert!(listing.contains("puts"));
}
