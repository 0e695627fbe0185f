//! Precompiled irep blobs

use tinyrb::vm::{CaptureBuffer, Console, IREP_MAGIC};
use tinyrb::{Compiler, RawIrep, RubyCompiler, RuntimeConfig, Vm, VmError};

const PROGRAM: &str = r#"
class Counter
  def initialize
    @n = 0
  end

  def bump(by = 1)
    @n += by
  end
end

c = Counter.new
[1, 2, 3].each { |i| c.bump(i) }
puts c.bump
puts 2.5 * 2
puts :done
"#;

fn vm() -> (Vm, CaptureBuffer) {
    let mut vm = Vm::new(RuntimeConfig::simulated(100)).expect("boots");
    let (console, out) = Console::capture();
    vm.set_console(console);
    (vm, out)
}

fn blob() -> Vec<u8> {
    RubyCompiler::new()
        .compile(PROGRAM)
        .expect("compiles")
        .to_bytes()
}

#[test]
fn test_blob_runs_like_source() {
    let (mut from_source, source_out) = vm();
    let unit = from_source.compile(PROGRAM).expect("compiles");
    from_source.create_task(&unit.irep, 10).expect("task");
    from_source.run_until_idle().expect("runs");

    let (mut from_blob, blob_out) = vm();
    let unit = from_blob.load_irep(&blob()).expect("loads");
    from_blob.create_task(&unit.irep, 10).expect("task");
    from_blob.run_until_idle().expect("runs");

    assert_eq!(source_out.contents(), "7\n5.0\ndone\n");
    assert_eq!(blob_out.contents(), source_out.contents());
}

#[test]
fn test_blob_header() {
    let bytes = blob();
    assert_eq!(&bytes[..4], IREP_MAGIC);
    let raw = RawIrep::from_bytes(&bytes).expect("decodes");
    assert_eq!(raw.to_bytes(), bytes);
}

#[test]
fn test_corrupt_blob_is_rejected_before_running() {
    let (mut vm, out) = vm();
    let mut bytes = blob();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x5a;
    assert!(matches!(vm.load_irep(&bytes), Err(VmError::IrepFormat(_))));

    let mut bytes = blob();
    bytes[4] = 9;
    assert!(matches!(
        vm.load_irep(&bytes),
        Err(VmError::VersionMismatch { found: 9, .. })
    ));
    assert!(vm.load_irep(b"TRBC").is_err());
    assert_eq!(out.contents(), "");
}

#[test]
fn test_compile_and_exec_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("prog.rb");
    let blob = dir.path().join("prog.mrb");
    std::fs::write(&source, "x = [3, 1, 2].sort\nx.first").expect("write");

    let size = tinyrb::compile_file(&source, &blob).expect("compiles");
    assert_eq!(std::fs::metadata(&blob).expect("blob").len() as usize, size);

    let report = tinyrb::exec_files(&[&blob], RuntimeConfig::simulated(100)).expect("runs");
    assert!(report.is_success());
}

#[test]
fn test_exec_rejects_garbage_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blob = dir.path().join("junk.mrb");
    std::fs::write(&blob, b"not an irep at all").expect("write");
    let err = tinyrb::exec_files(&[&blob], RuntimeConfig::default()).expect_err("rejected");
    assert!(format!("{:#}", err).contains("junk.mrb"));
}
