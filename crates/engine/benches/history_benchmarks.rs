use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::cell::Cell;
use std::rc::Rc;

use retrace_core::HistoryStack;
use retrace_engine::serde_json::Value;
use retrace_engine::{Command, CommandHandle, CommandManager, Execution, LogLevel, args};

struct Add {
    total: Rc<Cell<i64>>,
    last: Cell<i64>,
}

impl Command for Add {
    fn on_execute(&self, _cmd: &CommandHandle, args: &[Value]) -> Execution {
        let n = args.first().and_then(Value::as_i64).unwrap_or(0);
        self.last.set(n);
        self.total.set(self.total.get() + n);
        Execution::Done
    }

    fn on_undo(&self, _cmd: &CommandHandle) -> Execution {
        self.total.set(self.total.get() - self.last.get());
        Execution::Done
    }
}

fn setup_manager() -> (CommandManager, Rc<Cell<i64>>) {
    let mgr = CommandManager::new();
    let total = Rc::new(Cell::new(0));
    let t = total.clone();
    mgr.register("add", move |_, _| {
        Box::new(Add {
            total: t.clone(),
            last: Cell::new(0),
        })
    })
    .unwrap();
    (mgr, total)
}

fn bench_execute_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute_latency");

    // Full lifecycle: instantiate, start signal, commit, record.
    group.bench_function("execute_sync", |b| {
        let (mgr, _) = setup_manager();
        b.iter(|| {
            mgr.execute("add", args![black_box(1)]).unwrap();
        });
    });

    group.bench_function("execute_with_listeners", |b| {
        let (mgr, _) = setup_manager();
        for _ in 0..8 {
            mgr.cmd_started().on(|cmd: &CommandHandle| {
                black_box(cmd.name());
            });
            mgr.cmd_terminated().on(|cmd: &CommandHandle| {
                black_box(cmd.state());
            });
        }
        b.iter(|| {
            mgr.execute("add", args![black_box(1)]).unwrap();
        });
    });

    group.finish();
}

fn bench_undo_redo(c: &mut Criterion) {
    let mut group = c.benchmark_group("undo_redo");

    for depth in [10usize, 100] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("unwind_and_replay", depth), &depth, |b, &depth| {
            let (mgr, total) = setup_manager();
            for n in 0..depth {
                mgr.execute("add", args![n]).unwrap();
            }
            b.iter(|| {
                while mgr.undo() {}
                while mgr.redo() {}
                black_box(total.get());
            });
        });
    }

    group.finish();
}

fn bench_log_filtering(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_filtering");

    let (mgr, _) = setup_manager();
    for n in 0..1_000 {
        mgr.execute("add", args![n]).unwrap();
    }

    for level in [LogLevel::Simple, LogLevel::Detailed] {
        mgr.set_log_level(level);
        group.bench_function(format!("read_log_{level:?}"), |b| {
            b.iter(|| black_box(mgr.read_log().len()));
        });
    }

    group.finish();
}

fn bench_history_stack(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_stack");

    // Steady state at capacity: every push evicts the oldest entry.
    group.bench_function("push_at_capacity", |b| {
        let mut stack = HistoryStack::with_capacity(100);
        for n in 0..100u64 {
            stack.push(n);
        }
        let mut next = 100u64;
        b.iter(|| {
            next += 1;
            black_box(stack.push(black_box(next)));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_execute_latency,
    bench_undo_redo,
    bench_log_filtering,
    bench_history_stack
);
criterion_main!(benches);
