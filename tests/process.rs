use kvload::bench::Orchestrator;
use kvload::executor::ProcessExecutor;
use kvload::stores::null::NullStore;
use kvload::stores::StoreOpt;
use kvload::workload::WorkloadOpt;
use std::io::Write;
use std::process::Command;
use std::sync::Arc;

const KVLOAD: &str = env!("CARGO_BIN_EXE_kvload");

fn store_opt(name: &str) -> StoreOpt {
    StoreOpt {
        name: name.to_string(),
        opt: kvload::toml::Table::new(),
    }
}

fn workload() -> WorkloadOpt {
    WorkloadOpt {
        value_len: 8,
        pool_size: 16,
        ..Default::default()
    }
}

fn process_orchestrator(store: &str) -> Orchestrator {
    let executor = ProcessExecutor::with_program(KVLOAD, &store_opt(store)).unwrap();
    Orchestrator::new(Arc::new(NullStore::new()), workload()).with_executor(Box::new(executor))
}

#[test]
fn load_in_worker_processes() {
    let report = process_orchestrator("null").load_test(100, 10, 2).unwrap();
    assert_eq!(report.success, 100);
    assert_eq!(report.failure, 0);
    assert_eq!(report.workers_lost, 0);
    assert!(report.min_latency_ms >= 1);

    let report = process_orchestrator("memory").load_test(1003, 10, 4).unwrap();
    assert_eq!(report.success, 1003);
    assert_eq!(report.workers_lost, 0);
}

#[test]
fn failed_worker_processes_are_lost() {
    let report = process_orchestrator("nosuchstore")
        .load_test(100, 10, 2)
        .unwrap();
    assert_eq!(report.workers_lost, 2);
    assert!(report.is_partial());
    assert_eq!(report.success + report.failure, 0);
}

#[test]
fn list_builtin_stores() {
    let output = Command::new(KVLOAD).arg("list").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Registered store: memory"));
    assert!(stdout.contains("Registered store: null"));
}

#[test]
fn bench_from_config_files() {
    let mut store = tempfile::NamedTempFile::new().unwrap();
    writeln!(store, "[store]\nname = \"memory\"\nshards = 4").unwrap();
    let mut bench = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        bench,
        r#"
[workload]
value_len = 8
pool_size = 16
total_rows = 100

[load]
total_rows = 100
batch_size = 10
workers = 2
executor = "process"

[mixed]
duration = 0.1
"#
    )
    .unwrap();

    let output = Command::new(KVLOAD)
        .arg("bench")
        .arg("-s")
        .arg(store.path())
        .arg("-b")
        .arg(bench.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("Data Load "));
    assert!(lines[0].contains(" total 100 success 100 failure 0 lost 0 "));
    assert!(lines[1].starts_with("Random Read "));
    assert!(lines[2].starts_with("Random Write "));
}

#[test]
fn bench_rejects_bad_config() {
    let mut store = tempfile::NamedTempFile::new().unwrap();
    writeln!(store, "[store]\nname = \"null\"").unwrap();
    let mut bench = tempfile::NamedTempFile::new().unwrap();
    writeln!(bench, "[load]\ntotal_rows = 5\nbatch_size = 10").unwrap();

    let output = Command::new(KVLOAD)
        .arg("bench")
        .arg("-s")
        .arg(store.path())
        .arg("-b")
        .arg(bench.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
