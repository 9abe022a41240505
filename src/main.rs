//! Finagle - cooperative reactor and blocking queues
//!
//! Small CLI exercising the reactor and the queue family.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use finagle::config::FinagleConfig;
use finagle::queue::SizedQueue;
use finagle::runtime::{AppLoop, FileDescWatcher, Timer};
use std::cell::Cell;
use std::io::{self, Write};
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "finagle")]
#[command(version)]
#[command(about = "Cooperative reactor and blocking queue demos", long_about = None)]
struct Cli {
    /// Configuration file (default: search for finagle.toml upward)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Echo stdin to stdout through a descriptor watcher
    Echo,

    /// Move items between two threads through a bounded queue
    Pump {
        /// Number of items to transfer
        #[arg(short, long, default_value = "100000")]
        items: u64,

        /// Queue capacity (default: queue.default_capacity)
        #[arg(short, long)]
        capacity: Option<usize>,
    },

    /// Run a recurring timer and report its phase
    Tick {
        /// Timer period in milliseconds
        #[arg(short, long, default_value = "100")]
        period_ms: u64,

        /// Number of fires before exiting
        #[arg(short, long, default_value = "10")]
        count: u32,
    },
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => FinagleConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => FinagleConfig::load_from_cwd().context("Failed to load finagle.toml")?,
    };

    match cli.command {
        Commands::Echo => cmd_echo(&config),
        Commands::Pump { items, capacity } => cmd_pump(&config, items, capacity),
        Commands::Tick { period_ms, count } => {
            cmd_tick(&config, Duration::from_millis(period_ms), count)
        }
    }
}

fn cmd_echo(config: &FinagleConfig) -> Result<()> {
    let app = AppLoop::with_config(config.reactor);
    let watcher = FileDescWatcher::new(&app, Some(libc::STDIN_FILENO));
    let failed = Rc::new(Cell::new(false));

    {
        let app = app.clone();
        let failed = Rc::clone(&failed);
        watcher.readable().connect(move || {
            let mut buf = [0u8; 4096];
            match read_fd(libc::STDIN_FILENO, &mut buf) {
                Ok(0) => app.exit(0),
                Ok(n) => {
                    let mut out = io::stdout().lock();
                    if out.write_all(&buf[..n]).and_then(|_| out.flush()).is_err() {
                        failed.set(true);
                        app.exit(1);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    log::error!("stdin: {err}");
                    failed.set(true);
                    app.exit(1);
                }
            }
        });
    }

    let code = app.exec();
    if failed.get() {
        anyhow::bail!("echo failed with exit code {code}");
    }
    Ok(())
}

/// Read straight from the descriptor; a buffered reader would hide pending
/// bytes from poll(2).
fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn cmd_pump(config: &FinagleConfig, items: u64, capacity: Option<usize>) -> Result<()> {
    let queue = Arc::new(match capacity {
        Some(capacity) => SizedQueue::new(capacity),
        None => SizedQueue::with_config(&config.queue),
    });
    println!(
        "Pumping {} items through a queue of capacity {}",
        items,
        queue.capacity()
    );

    let start = Instant::now();

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0..items {
                queue.push(i);
            }
        })
    };

    let mut sum = 0u64;
    let mut max_len = 0;
    for _ in 0..items {
        max_len = max_len.max(queue.len());
        sum = sum.wrapping_add(queue.pop());
    }
    producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;

    let elapsed = start.elapsed();
    let expected = (0..items).fold(0u64, |acc, i| acc.wrapping_add(i));
    anyhow::ensure!(sum == expected, "checksum mismatch: {} != {}", sum, expected);

    println!("  elapsed:    {:?}", elapsed);
    println!(
        "  throughput: {:.0} items/s",
        items as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("  peak depth: {}", max_len);
    Ok(())
}

fn cmd_tick(config: &FinagleConfig, period: Duration, count: u32) -> Result<()> {
    anyhow::ensure!(count > 0, "--count must be at least 1");
    let app = AppLoop::with_config(config.reactor);
    let timer = Timer::recurring(&app, period);
    let first = timer
        .next_alarm()
        .context("timer did not start")?;
    let fires = Rc::new(Cell::new(0u32));

    {
        let app = app.clone();
        let fires = Rc::clone(&fires);
        let handle = timer.clone();
        timer.connect(move || {
            let n = fires.get();
            fires.set(n + 1);

            let now = Instant::now();
            let alarm = handle.next_alarm().unwrap_or(now);
            let phase = alarm.saturating_duration_since(first);
            let late = now.saturating_duration_since(alarm);
            println!(
                "tick {:>3}: alarm +{:>8.3} ms, late {:>6} us",
                n + 1,
                phase.as_secs_f64() * 1e3,
                late.as_micros()
            );

            if n + 1 >= count {
                handle.stop();
                app.exit(0);
            }
        });
    }

    let code = app.exec();
    log::info!("{} ticks, exit code {}", fires.get(), code);
    Ok(())
}
