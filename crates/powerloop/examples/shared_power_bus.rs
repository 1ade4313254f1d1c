use powerloop::{
    AccelerationLimiter, FrameData, LimiterConfig, MemoryTransport, PowerDistribution,
    PowerDistributionConfig,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const RUN_TIME: Duration = Duration::from_secs(3);
const TELEMETRY_PERIOD: Duration = Duration::from_millis(20);
const CONTROL_PERIOD: Duration = Duration::from_millis(10);

/// This example shares one power-distribution unit between several
/// control threads.
///
/// A real robot would have:
/// - A frame receiver delivering status frames as they arrive
/// - One control task per mechanism, each with its own acceleration limiter
/// - All limiters reading the same telemetry cache
///
/// Halfway through, the frame receiver goes silent. Telemetry turns stale
/// after 100 ms and every limiter holds its output instead of ramping blind.
fn main() {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();

    println!("Starting shared power bus simulation");
    println!("====================================");

    let bus = MemoryTransport::new();
    let power = PowerDistribution::new(PowerDistributionConfig::default(), bus.clone(), || 12.0);

    let running = Arc::new(AtomicBool::new(true));
    let mechanisms = [("left drive", 0.8), ("right drive", 0.8), ("elevator", -0.5)];

    // Latest |output| of every mechanism, as f64 bits, fed back into the simulated current
    let demand: Arc<Vec<AtomicU64>> = Arc::new(mechanisms.iter().map(|_| AtomicU64::new(0)).collect());

    // Frame receiver: publishes telemetry for the first half of the run
    let receiver = {
        let running = Arc::clone(&running);
        let demand = Arc::clone(&demand);
        thread::spawn(move || {
            let start = Instant::now();
            while running.load(Ordering::Relaxed) {
                if start.elapsed() < RUN_TIME / 2 {
                    let load: f64 = demand
                        .iter()
                        .map(|slot| f64::from_bits(slot.load(Ordering::Relaxed)))
                        .sum();
                    let current = 3.0 + load * 40.0;
                    let voltage = 12.6 - current * 0.015;
                    bus.push_data(
                        0,
                        FrameData::Status3 {
                            currents: [0.0; 4],
                            resistance: 0.015,
                            voltage,
                        },
                    );
                    bus.push_data(0, FrameData::Energy { total_current: current });
                }
                thread::sleep(TELEMETRY_PERIOD);
            }
        })
    };

    let workers: Vec<_> = mechanisms
        .into_iter()
        .enumerate()
        .map(|(slot, (name, target))| {
            let power = power.clone();
            let running = Arc::clone(&running);
            let demand = Arc::clone(&demand);
            thread::spawn(move || {
                let mut limiter = AccelerationLimiter::new(LimiterConfig::default(), power);
                let mut last_reported = Instant::now();
                let mut last_output: f64 = 0.0;
                while running.load(Ordering::Relaxed) {
                    let output = limiter.modify(target);
                    demand[slot].store(output.abs().to_bits(), Ordering::Relaxed);
                    last_output = output;

                    if last_reported.elapsed() >= Duration::from_millis(250) {
                        println!("{:>12}: target {:+.2}, output {:+.3}", name, target, output);
                        last_reported = Instant::now();
                    }
                    thread::sleep(CONTROL_PERIOD);
                }
                (name, last_output)
            })
        })
        .collect();

    thread::sleep(RUN_TIME);
    running.store(false, Ordering::Relaxed);

    if receiver.join().is_err() {
        eprintln!("frame receiver panicked");
    }
    println!();
    for worker in workers {
        match worker.join() {
            Ok((name, output)) => println!("{:>12} finished at {:+.3}", name, output),
            Err(_) => eprintln!("control thread panicked"),
        }
    }

    match power.snapshot() {
        Ok(cache) => println!(
            "Last telemetry: {:.2} V, {:.1} A, fresh: {}",
            cache.bus_voltage,
            cache.total_current,
            power.is_fresh()
        ),
        Err(e) => eprintln!("telemetry unavailable: {}", e),
    }
}
