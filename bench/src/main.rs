use clap::Parser;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::Serialize;
use std::{
    io::Write,
    ops::AddAssign,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Barrier,
    },
    time::{Duration, Instant},
};
use tictoc_kv::{Database, Error, MemoryBackend, Worker};

#[derive(Debug, Clone, Parser, Serialize)]
struct Cli {
    #[arg(long, default_value_t = 8)]
    threads: usize,

    #[arg(long, default_value_t = 100000)]
    records: u64,

    #[arg(long, default_value_t = 8)]
    payload: usize,

    /// Benchmark duration in milliseconds.
    #[arg(long, default_value_t = 2000)]
    duration: u64,

    #[arg(long, default_value_t = 4)]
    working_set: usize,

    #[arg(long, default_value_t = 0.5)]
    read_proportion: f64,

    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let shared = Arc::new(SharedState {
        db: Database::create(())?,
        barrier: Barrier::new(cli.threads + 1),
        is_running: true.into(),
    });

    let workers: Vec<_> = (0..cli.threads)
        .map(|worker_index| {
            let shared = shared.clone();
            let cli = cli.clone();
            std::thread::spawn(move || run_worker(cli, &shared, worker_index))
        })
        .collect();

    eprintln!("Preparing");
    shared.barrier.wait();

    eprintln!("Start");
    shared.barrier.wait();

    let start = Instant::now();
    std::thread::sleep(Duration::from_millis(cli.duration));
    shared.is_running.store(false, Ordering::SeqCst);
    let elapsed = start.elapsed();

    eprintln!("Finished");

    let mut stats = Statistics::default();
    for worker in workers {
        stats += worker.join().unwrap()?;
    }

    let tps = (stats.num_commits as f64 / elapsed.as_secs_f64()) as u64;
    let abort_rate = stats.num_aborts as f64 / (stats.num_commits + stats.num_aborts) as f64;

    #[derive(Debug, Serialize)]
    struct Summary {
        #[serde(flatten)]
        stats: Statistics,
        elapsed: u128,
        tps: u64,
        abort_rate: f64,
        #[serde(flatten)]
        args: Cli,
    }
    let summary = Summary {
        stats,
        elapsed: elapsed.as_millis(),
        tps,
        abort_rate,
        args: cli,
    };

    eprintln!("{summary:#?}");

    let mut stdout = std::io::stdout().lock();
    serde_json::ser::to_writer_pretty(&mut stdout, &summary)?;
    stdout.write_all(b"\n")?;
    Ok(())
}

struct SharedState {
    db: Database<MemoryBackend>,
    barrier: Barrier,
    is_running: AtomicBool,
}

fn run_worker(cli: Cli, shared: &SharedState, worker_index: usize) -> anyhow::Result<Statistics> {
    let mut worker = shared.db.worker();

    let payload = vec![0; cli.payload];

    // Each worker loads its own partition of the key space.
    let from = cli.records * worker_index as u64 / cli.threads as u64;
    let to = cli.records * (worker_index as u64 + 1) / cli.threads as u64;
    for i in from..to {
        let mut txn = worker.transaction();
        txn.insert(i.to_ne_bytes(), &payload)?;
        txn.commit()?;
    }

    let mut rng = match cli.seed {
        Some(seed) => SmallRng::seed_from_u64(seed ^ worker_index as u64),
        None => SmallRng::from_entropy(),
    };
    let mut keys = Vec::with_capacity(cli.working_set);
    let mut stats = Statistics::default();

    shared.barrier.wait(); // Signal that the worker is ready

    shared.barrier.wait(); // Signal that the benchmark will start
    while shared.is_running.load(Ordering::SeqCst) {
        let is_read = rng.gen_bool(cli.read_proportion);
        for _ in 0..cli.working_set {
            keys.push(rng.gen_range(0..cli.records));
        }
        match run_transaction(&mut worker, is_read, &keys, &payload) {
            Ok(()) => stats.num_commits += 1,
            Err(Error::TransactionAborted) => stats.num_aborts += 1,
            Err(e) => return Err(e.into()),
        }
        keys.clear();
    }
    Ok(stats)
}

fn run_transaction(
    worker: &mut Worker<MemoryBackend>,
    is_read: bool,
    keys: &[u64],
    payload: &[u8],
) -> tictoc_kv::Result<()> {
    use std::hint::black_box;

    let mut txn = worker.transaction();
    for key in keys {
        let key = key.to_ne_bytes();
        if is_read {
            black_box(txn.get(black_box(key))?);
        } else {
            // Read-modify-write.
            black_box(txn.get(black_box(key))?);
            txn.insert(key, black_box(payload))?;
        }
    }
    txn.commit()?;
    Ok(())
}

#[derive(Debug, Default, Serialize)]
struct Statistics {
    #[serde(rename = "commits")]
    num_commits: u64,
    #[serde(rename = "aborts")]
    num_aborts: u64,
}

impl AddAssign<Self> for Statistics {
    fn add_assign(&mut self, rhs: Self) {
        self.num_commits += rhs.num_commits;
        self.num_aborts += rhs.num_aborts;
    }
}
