use powerloop::{
    AccelerationLimiter, FrameData, LimiterConfig, ManualClock, MemoryTransport, MotorClass,
    NominalVoltage, PowerDistribution, PowerDistributionConfig,
};
use rand::{thread_rng, Rng};
use std::sync::Arc;
use std::time::Duration;

// Simulation constants - easy to adjust
const SIMULATION_DURATION_SECONDS: f64 = 20.0;
const CONTROL_RATE_HZ: f64 = 50.0;
const DT: f64 = 1.0 / CONTROL_RATE_HZ;
const DEVICE_ID: u8 = 0;

// Battery model
const OPEN_CIRCUIT_VOLTAGE: f64 = 12.8;
const INTERNAL_RESISTANCE: f64 = 0.018; // Ohms
const IDLE_CURRENT: f64 = 2.0; // Amps drawn by everything but the drive
const DRIVE_MOTORS: f64 = 4.0;
const STALL_CURRENT_PER_MOTOR: f64 = 130.0; // Amps at full output from standstill

// Driver behaviour
const STICK_CHANGES: usize = 12;

/// # Drive Ramp Simulation
///
/// A driver slams the joystick between random positions while a tired battery
/// feeds four drive motors. The acceleration limiter smooths every stick
/// change and, when the bus voltage sags, backs the motors off before the
/// controller browns out.
///
/// Telemetry is produced by a simulated power-distribution unit that encodes
/// real status frames, so the decode path is exercised end to end.
fn main() {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();

    let bus = MemoryTransport::new();
    let clock = ManualClock::new();
    let power = PowerDistribution::with_clock(
        PowerDistributionConfig::new().with_device_id(DEVICE_ID),
        bus.clone(),
        NominalVoltage(12.0),
        Arc::new(clock.clone()),
    );

    let config = LimiterConfig::new()
        .with_motor_class(MotorClass::Cim)
        .with_hard_stop_voltage(9.0);
    let mut limiter = AccelerationLimiter::with_clock(config, power, Arc::new(clock.clone()));

    // Random stick positions held for random stretches of time
    let mut rng = thread_rng();
    let mut script: Vec<(f64, f64)> = (0..STICK_CHANGES)
        .map(|_| {
            let at = rng.gen_range(0.0..SIMULATION_DURATION_SECONDS);
            let stick = if rng.gen_bool(0.3) {
                0.0
            } else {
                rng.gen_range(-1.0..=1.0)
            };
            (at, stick)
        })
        .collect();
    script.sort_by(|a, b| a.0.total_cmp(&b.0));

    println!("Drive Ramp Simulation");
    println!("=====================");
    println!("Battery: {:.1} V, {:.3} Ω", OPEN_CIRCUIT_VOLTAGE, INTERNAL_RESISTANCE);
    println!("Stick script:");
    for (at, stick) in &script {
        println!("  t = {:5.2}s  stick {:+.2}", at, stick);
    }
    println!();
    println!("Time(s) | Stick | Output | Current(A) | Bus(V)");
    println!("--------|-------|--------|------------|-------");

    let iterations = (SIMULATION_DURATION_SECONDS * CONTROL_RATE_HZ) as usize;
    let mut stick = 0.0;
    let mut output: f64 = 0.0;
    let mut speed: f64 = 0.0; // Normalised wheel speed, lags the output
    let mut lowest_voltage = OPEN_CIRCUIT_VOLTAGE;
    let mut limited_cycles = 0;

    for i in 0..iterations {
        let time = i as f64 * DT;
        while let Some((at, next)) = script.first().copied() {
            if at > time {
                break;
            }
            stick = next;
            script.remove(0);
        }

        // Motor current grows with the gap between command and wheel speed
        let slip = (output - speed).abs();
        let current =
            IDLE_CURRENT + DRIVE_MOTORS * STALL_CURRENT_PER_MOTOR * (0.15 * output.abs() + 0.85 * slip);
        let voltage = OPEN_CIRCUIT_VOLTAGE - current * INTERNAL_RESISTANCE;
        lowest_voltage = lowest_voltage.min(voltage);

        bus.push_data(
            DEVICE_ID,
            FrameData::Status3 {
                currents: [0.0; 4],
                resistance: INTERNAL_RESISTANCE,
                voltage,
            },
        );
        bus.push_data(DEVICE_ID, FrameData::Energy { total_current: current });

        clock.advance(Duration::from_secs_f64(DT));
        output = limiter.modify(stick);
        if output != stick {
            limited_cycles += 1;
        }
        speed += (output - speed) * 0.1;

        if i % 50 == 0 {
            println!(
                "{:7.2} | {:+.2} | {:+.3} | {:10.1} | {:5.2}",
                time, stick, output, current, voltage
            );
        }
    }

    println!();
    println!("Lowest bus voltage: {:.2} V", lowest_voltage);
    println!(
        "Limited on {} of {} cycles ({:.1}%)",
        limited_cycles,
        iterations,
        100.0 * limited_cycles as f64 / iterations as f64
    );
}
