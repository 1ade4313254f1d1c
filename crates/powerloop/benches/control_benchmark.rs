use criterion::{black_box, criterion_group, criterion_main, Criterion};
use powerloop::{
    AccelerationLimiter, Frame, FrameData, FrameKind, LimiterConfig, ManualClock, MemoryTransport,
    NominalVoltage, PidConfig, PidControlLoop, PowerDistribution, PowerDistributionConfig,
    FnSensor,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn benchmark_control_loop(c: &mut Criterion) {
    let config = PidConfig::new()
        .with_kp(1.0)
        .with_ki(0.1)
        .with_kd(0.05)
        .with_continuous_input(-180.0, 180.0)
        .with_output_limits(-1.0, 1.0)
        .with_setpoint(170.0);

    let clock = ManualClock::new();
    let mut reading = -180.0;
    let sensor = FnSensor::new(move || {
        reading = if reading >= 179.0 { -180.0 } else { reading + 1.0 };
        Ok(black_box(reading))
    });
    let mut pid = PidControlLoop::with_clock(config, sensor, Arc::new(clock.clone()));
    pid.enable();

    c.bench_function("pid_compute", |b| {
        b.iter(|| {
            for _ in 0..100 {
                clock.advance(Duration::from_millis(10));
                black_box(pid.get());
            }
        })
    });
}

fn benchmark_telemetry(c: &mut Criterion) {
    let frames: Vec<(FrameKind, Frame)> = [
        FrameData::Status1 {
            currents: [1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        },
        FrameData::Status2 {
            currents: [7.0, 8.0, 9.0, 10.0, 11.0, 12.0],
        },
        FrameData::Status3 {
            currents: [13.0, 14.0, 15.0, 16.0],
            resistance: 0.02,
            voltage: 12.1,
        },
        FrameData::Energy { total_current: 96.0 },
    ]
    .iter()
    .map(|data| (data.kind(), data.encode()))
    .collect();

    let power = PowerDistribution::new(
        PowerDistributionConfig::default(),
        MemoryTransport::new(),
        NominalVoltage(12.0),
    );

    c.bench_function("decode_frames", |b| {
        b.iter(|| {
            for (kind, frame) in &frames {
                power.decode_frame(*kind, Some(black_box(*frame))).unwrap();
            }
        })
    });

    // Readers racing a decoder on a shared cache
    c.bench_function("shared_cache_reads", |b| {
        b.iter(|| {
            let writer = {
                let power = power.clone();
                let frames = frames.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        for (kind, frame) in &frames {
                            power.decode_frame(*kind, Some(*frame)).unwrap();
                        }
                    }
                })
            };
            let reader = {
                let power = power.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        black_box(power.snapshot().unwrap());
                    }
                })
            };

            writer.join().unwrap();
            reader.join().unwrap();
        })
    });
}

fn benchmark_limiter(c: &mut Criterion) {
    let bus = MemoryTransport::new();
    let clock = ManualClock::new();
    let power = PowerDistribution::with_clock(
        PowerDistributionConfig::default(),
        bus.clone(),
        NominalVoltage(12.0),
        Arc::new(clock.clone()),
    );
    let mut limiter = AccelerationLimiter::with_clock(LimiterConfig::default(), power, Arc::new(clock.clone()));

    c.bench_function("limiter_modify", |b| {
        b.iter(|| {
            for i in 0..100 {
                bus.push_data(
                    0,
                    FrameData::Status3 {
                        currents: [0.0; 4],
                        resistance: 0.015,
                        voltage: 12.2,
                    },
                );
                bus.push_data(0, FrameData::Energy { total_current: 20.0 });
                clock.advance(Duration::from_millis(20));
                let desired = if i % 20 < 10 { 1.0 } else { -1.0 };
                black_box(limiter.modify(black_box(desired)));
            }
        })
    });
}

criterion_group!(
    benches,
    benchmark_control_loop,
    benchmark_telemetry,
    benchmark_limiter
);
criterion_main!(benches);
