//! Spawn-join of worker tasks.
//!
//! An [`Executor`] turns each [`TaskOpt`] into a [`PreparedWorker`] ahead of time, doing whatever
//! must stay out of the measured run time. Launching a prepared worker starts one execution
//! context and returns a [`WorkerHandle`] that is joined later. [`run`] launches every worker
//! before joining any of them, so workers always run concurrently.
//!
//! Two executors are built in:
//!
//! - [`ThreadExecutor`] runs each task on its own OS thread. The result travels back on a one-shot
//!   channel created right before the thread is spawned and dropped right after the join. A panic
//!   in a worker unwinds its own thread only and is reported as a lost worker.
//! - [`ProcessExecutor`] runs each task in a child process (the current executable invoked with
//!   the hidden `worker` subcommand). The task goes down the child's stdin and the result comes
//!   back on its stdout. Nothing is shared between the parent and the child.
//!
//! In both cases a context that ends without handing back a [`WorkerResult`] is surfaced as a
//! [`WorkerLost`], never as a worker that did nothing.

use crate::error::{Error, LostReason, WorkerLost};
use crate::serialization::{read_result, read_spec, write_result, write_spec, WorkerSpec};
use crate::stores::StoreOpt;
use crate::worker::{TaskOpt, WorkerResult, WorkerTask};
use crate::Store;
use log::{debug, error};
use std::any::Any;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;

/// A started execution context.
pub trait WorkerHandle {
    /// Block until the context terminates, then take its result.
    fn join(self: Box<Self>) -> Result<WorkerResult, WorkerLost>;
}

/// A worker that is ready to start.
pub trait PreparedWorker {
    fn id(&self) -> usize;

    /// Start the execution context without waiting for it.
    fn launch(self: Box<Self>) -> Result<Box<dyn WorkerHandle>, WorkerLost>;
}

/// A way of running worker tasks in isolated execution contexts.
pub trait Executor {
    /// Get a task ready to launch. Value pools that live in this process are built here.
    fn prepare(&self, opt: TaskOpt) -> Result<Box<dyn PreparedWorker>, Error>;
}

/// Prepare every task, failing on the first invalid one.
pub fn prepare(
    executor: &dyn Executor,
    opts: Vec<TaskOpt>,
) -> Result<Vec<Box<dyn PreparedWorker>>, Error> {
    opts.into_iter().map(|opt| executor.prepare(opt)).collect()
}

/// Run all workers in parallel and collect one outcome per worker, in the given order.
pub fn run(workers: Vec<Box<dyn PreparedWorker>>) -> Vec<Result<WorkerResult, WorkerLost>> {
    let mut launched = Vec::with_capacity(workers.len());
    for worker in workers {
        debug!("Launching worker {}", worker.id());
        launched.push(worker.launch());
    }
    launched
        .into_iter()
        .map(|handle| {
            let outcome = handle.and_then(|h| h.join());
            if let Err(ref lost) = outcome {
                error!("{}", lost);
            }
            outcome
        })
        .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// {{{ thread

/// Runs every task on a dedicated OS thread.
#[derive(Clone)]
pub struct ThreadExecutor {
    store: Arc<dyn Store>,
    pin: bool,
}

impl ThreadExecutor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, pin: false }
    }

    /// Pin worker `i` to CPU core `i` (modulo the number of cores).
    pub fn pinned(mut self, pin: bool) -> Self {
        self.pin = pin;
        self
    }
}

fn pin(core: usize) {
    match core_affinity::get_core_ids() {
        Some(cores) if !cores.is_empty() => {
            if !core_affinity::set_for_current(cores[core % cores.len()]) {
                debug!("Failed to pin thread to core {}", core);
            }
        }
        _ => debug!("No core ids available, thread {} left unpinned", core),
    }
}

pub struct ThreadHandle {
    id: usize,
    handle: std::thread::JoinHandle<Result<(), String>>,
    rx: Receiver<WorkerResult>,
}

impl WorkerHandle for ThreadHandle {
    fn join(self: Box<Self>) -> Result<WorkerResult, WorkerLost> {
        let ThreadHandle { id, handle, rx } = *self;
        let lost = |reason| WorkerLost::new(id, reason);
        match handle.join() {
            Err(payload) => Err(lost(LostReason::Panicked(panic_message(payload)))),
            Ok(Err(e)) => Err(lost(LostReason::Setup(e))),
            // the sender is gone with the thread, the channel holds at most the one result
            Ok(Ok(())) => rx.try_recv().map_err(|_| lost(LostReason::NoResult)),
        }
    }
}

struct ThreadWorker {
    task: WorkerTask,
    store: Arc<dyn Store>,
    pin: bool,
}

impl Executor for ThreadExecutor {
    fn prepare(&self, opt: TaskOpt) -> Result<Box<dyn PreparedWorker>, Error> {
        Ok(Box::new(ThreadWorker {
            task: WorkerTask::new(opt)?,
            store: self.store.clone(),
            pin: self.pin,
        }))
    }
}

impl PreparedWorker for ThreadWorker {
    fn id(&self) -> usize {
        self.task.id()
    }

    fn launch(self: Box<Self>) -> Result<Box<dyn WorkerHandle>, WorkerLost> {
        let ThreadWorker {
            mut task,
            store,
            pin: pinned,
        } = *self;
        let id = task.id();
        let (tx, rx) = sync_channel::<WorkerResult>(1);
        let pin_to = pinned.then_some(id);
        let handle = std::thread::Builder::new()
            .name(format!("kvload-worker-{}", id))
            .spawn(move || -> Result<(), String> {
                if let Some(core) = pin_to {
                    pin(core);
                }
                let result = task.run(&*store).map_err(|e| e.to_string())?;
                if tx.send(result).is_err() {
                    error!("Worker {} has no one to report to", id);
                }
                Ok(())
            })
            .map_err(|e| WorkerLost::new(id, LostReason::Spawn(e.to_string())))?;
        Ok(Box::new(ThreadHandle { id, handle, rx }))
    }
}

// }}} thread

// {{{ process

/// Runs every task in a child process.
pub struct ProcessExecutor {
    program: PathBuf,
    store: String,
}

impl ProcessExecutor {
    /// Re-run the current executable for each task.
    pub fn new(store: &StoreOpt) -> Result<Self, Error> {
        Self::with_program(std::env::current_exe()?, store)
    }

    /// Run `program worker` for each task. `program` must dispatch the `worker` subcommand to
    /// [`serve_worker`], as [`crate::cmdline()`] does.
    pub fn with_program(program: impl Into<PathBuf>, store: &StoreOpt) -> Result<Self, Error> {
        Ok(Self {
            program: program.into(),
            store: store.to_toml()?,
        })
    }
}

pub struct ProcessHandle {
    id: usize,
    child: Child,
}

impl WorkerHandle for ProcessHandle {
    fn join(self: Box<Self>) -> Result<WorkerResult, WorkerLost> {
        let ProcessHandle { id, mut child } = *self;
        let lost = |reason| WorkerLost::new(id, reason);
        // drain stdout to EOF before waiting, so a large result can never block the child
        let mut bytes = Vec::new();
        let read = match child.stdout.take() {
            Some(mut stdout) => stdout.read_to_end(&mut bytes).map(|_| ()),
            None => Ok(()),
        };
        let status = child
            .wait()
            .map_err(|e| lost(LostReason::Corrupt(e.to_string())))?;
        debug!("Worker process {} exited with {}", id, status);
        if !status.success() {
            return Err(lost(LostReason::Exited(status.code())));
        }
        if let Err(e) = read {
            return Err(lost(LostReason::Corrupt(e.to_string())));
        }
        if bytes.is_empty() {
            return Err(lost(LostReason::NoResult));
        }
        let result =
            read_result(&bytes).map_err(|e| lost(LostReason::Corrupt(e.to_string())))?;
        if result.id != id {
            return Err(lost(LostReason::Corrupt(format!(
                "result belongs to worker {}",
                result.id
            ))));
        }
        Ok(result)
    }
}

struct ProcessWorker {
    program: PathBuf,
    spec: WorkerSpec,
}

impl Executor for ProcessExecutor {
    fn prepare(&self, opt: TaskOpt) -> Result<Box<dyn PreparedWorker>, Error> {
        // the value pool is built by the child, never here
        opt.sanity()?;
        Ok(Box::new(ProcessWorker {
            program: self.program.clone(),
            spec: WorkerSpec {
                store: self.store.clone(),
                task: opt,
            },
        }))
    }
}

impl PreparedWorker for ProcessWorker {
    fn id(&self) -> usize {
        self.spec.task.id
    }

    fn launch(self: Box<Self>) -> Result<Box<dyn WorkerHandle>, WorkerLost> {
        let ProcessWorker { program, spec } = *self;
        let id = spec.task.id;
        let spawn_err = |e: String| WorkerLost::new(id, LostReason::Spawn(e));
        let mut child = Command::new(&program)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| spawn_err(e.to_string()))?;
        let sent = match child.stdin.take() {
            // stdin is closed when it goes out of scope
            Some(mut stdin) => write_spec(&mut stdin, &spec).map_err(|e| e.to_string()),
            None => Err("stdin unavailable".to_string()),
        };
        if let Err(e) = sent {
            let _ = child.kill();
            let _ = child.wait();
            return Err(spawn_err(e));
        }
        Ok(Box::new(ProcessHandle { id, child }))
    }
}

/// The worker side of [`ProcessExecutor`]: read one task from `input`, run it, and write the
/// result to `output`.
///
/// An error means no result was written, which the parent reports as a lost worker.
pub fn serve_worker(input: &mut impl Read, output: &mut impl Write) -> Result<(), Error> {
    let spec = read_spec(input)?;
    let store = StoreOpt::from_toml(&spec.store)?.build()?;
    let mut task = WorkerTask::new(spec.task)?;
    let result = task.run(&*store)?;
    write_result(output, &result)?;
    Ok(())
}

// }}} process

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::null::NullStore;
    use crate::worker::tests::{task_opt, ScriptedStore};
    use crate::{RowStatus, StoreError, StoreHandle, SyntheticRow};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn run_ranges(
        executor: &dyn Executor,
        ranges: &[(u64, u64)],
        batch_size: usize,
    ) -> Vec<Result<WorkerResult, WorkerLost>> {
        let opts = ranges
            .iter()
            .enumerate()
            .map(|(i, (s, e))| task_opt(i, *s, *e, batch_size))
            .collect();
        run(prepare(executor, opts).unwrap())
    }

    #[test]
    fn thread_results_in_task_order() {
        let executor = ThreadExecutor::new(Arc::new(NullStore::new()));
        let results = run_ranges(&executor, &[(0, 30), (30, 35), (35, 100)], 10);
        let results: Vec<WorkerResult> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(results.iter().map(|r| r.id).collect::<Vec<_>>(), [0, 1, 2]);
        assert_eq!(results.iter().map(|r| r.success).collect::<Vec<_>>(), [30, 5, 65]);
        assert!(results.iter().all(|r| r.failure == 0));
    }

    #[test]
    fn pinned_threads_run() {
        let executor = ThreadExecutor::new(Arc::new(NullStore::new())).pinned(true);
        let results = run_ranges(&executor, &[(0, 10), (10, 20)], 3);
        assert!(results.iter().all(|r| r.as_ref().unwrap().success == 10));
    }

    /// Every handle waits, up to a deadline, until all of them exist.
    struct RendezvousStore {
        arrived: Arc<AtomicUsize>,
        expected: usize,
        met: Arc<AtomicUsize>,
    }

    impl Store for RendezvousStore {
        fn handle(&self) -> Result<Box<dyn StoreHandle>, StoreError> {
            self.arrived.fetch_add(1, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(10);
            while Instant::now() < deadline {
                if self.arrived.load(Ordering::SeqCst) == self.expected {
                    self.met.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(Box::new(NullStore::new()))
        }
    }

    #[test]
    fn workers_run_concurrently() {
        let store = RendezvousStore {
            arrived: Arc::new(AtomicUsize::new(0)),
            expected: 4,
            met: Arc::new(AtomicUsize::new(0)),
        };
        let met = store.met.clone();
        let executor = ThreadExecutor::new(Arc::new(store));
        let results = run_ranges(&executor, &[(0, 1), (1, 2), (2, 3), (3, 4)], 1);
        assert!(results.iter().all(|r| r.is_ok()));
        // had the workers run one after another, nobody would have met the others
        assert_eq!(met.load(Ordering::SeqCst), 4);
    }

    /// Panics on the first batch that contains `boom`.
    struct PanickingStore {
        boom: String,
    }

    impl Store for PanickingStore {
        fn handle(&self) -> Result<Box<dyn StoreHandle>, StoreError> {
            Ok(Box::new(PanickingHandle {
                boom: self.boom.clone(),
            }))
        }
    }

    struct PanickingHandle {
        boom: String,
    }

    impl StoreHandle for PanickingHandle {
        fn mutate_batch(&mut self, rows: &[SyntheticRow]) -> Result<Vec<RowStatus>, StoreError> {
            if rows.iter().any(|r| r.key == self.boom) {
                panic!("store exploded");
            }
            Ok((0..rows.len()).map(RowStatus::ok).collect())
        }

        fn read_row(&mut self, _key: &str) -> Result<Option<SyntheticRow>, StoreError> {
            Ok(None)
        }
    }

    #[test]
    fn panicking_worker_is_lost() {
        let store = PanickingStore {
            boom: "perf0000015".to_string(),
        };
        let executor = ThreadExecutor::new(Arc::new(store));
        let results = run_ranges(&executor, &[(0, 10), (10, 20), (20, 30)], 5);
        assert_eq!(results[0].as_ref().unwrap().success, 10);
        assert_eq!(
            results[1].as_ref().unwrap_err(),
            &WorkerLost::new(1, LostReason::Panicked("store exploded".to_string()))
        );
        // the others are unaffected
        assert_eq!(results[2].as_ref().unwrap().success, 10);
    }

    #[test]
    fn setup_failure_is_lost() {
        let store = ScriptedStore {
            refuse_handle: true,
            ..Default::default()
        };
        let executor = ThreadExecutor::new(Arc::new(store));
        let results = run_ranges(&executor, &[(0, 10)], 5);
        match &results[0] {
            Err(WorkerLost {
                id: 0,
                reason: LostReason::Setup(msg),
            }) => assert!(msg.contains("refused")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn missing_program_is_lost() {
        let store = StoreOpt::from_toml("name = \"null\"\n").unwrap();
        let executor =
            ProcessExecutor::with_program("/nonexistent/kvload-binary", &store).unwrap();
        let results = run_ranges(&executor, &[(0, 10), (10, 20)], 5);
        for (i, r) in results.iter().enumerate() {
            match r {
                Err(WorkerLost {
                    id,
                    reason: LostReason::Spawn(_),
                }) => assert_eq!(*id, i),
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
    }

    #[test]
    fn process_prepare_leaves_pool_to_child() {
        let store = StoreOpt::from_toml("name = \"null\"\n").unwrap();
        let executor = ProcessExecutor::with_program("/nonexistent/kvload-binary", &store).unwrap();
        // a pool this size takes gigabytes and many seconds to build
        let mut opt = task_opt(4, 0, 10, 5);
        opt.workload.pool_size = 2_000_000;
        opt.workload.value_len = 1000;
        let start = Instant::now();
        let worker = executor.prepare(opt).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(worker.id(), 4);

        assert!(matches!(
            executor.prepare(task_opt(0, 0, 10, 0)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn thread_prepare_rejects_zero_batch() {
        let executor = ThreadExecutor::new(Arc::new(NullStore::new()));
        let opts = vec![task_opt(0, 0, 10, 5), task_opt(1, 10, 20, 0)];
        assert!(matches!(prepare(&executor, opts), Err(Error::Config(_))));
    }

    #[test]
    fn serve_worker_in_memory() {
        let spec = WorkerSpec {
            store: "name = \"memory\"\nshards = 2\n".to_string(),
            task: task_opt(7, 100, 123, 10),
        };
        let mut input = Vec::new();
        write_spec(&mut input, &spec).unwrap();
        let mut output = Vec::new();
        serve_worker(&mut Cursor::new(input), &mut output).unwrap();
        let result = read_result(&output).unwrap();
        assert_eq!(result.id, 7);
        assert_eq!(result.success, 23);
        assert_eq!(result.failure, 0);
        assert_eq!(result.latency().unwrap().len(), 3);
    }

    #[test]
    fn serve_worker_unknown_store_writes_nothing() {
        let spec = WorkerSpec {
            store: "name = \"nosuchstore\"\n".to_string(),
            task: task_opt(0, 0, 10, 5),
        };
        let mut input = Vec::new();
        write_spec(&mut input, &spec).unwrap();
        let mut output = Vec::new();
        assert!(serve_worker(&mut Cursor::new(input), &mut output).is_err());
        assert!(output.is_empty());
    }
}
