use powerloop::{DebugConfig, FnSensor, PidConfig, PidControlLoop};
use std::cell::Cell;
use std::rc::Rc;
use std::thread::sleep;
use std::time::{Duration, Instant};

const CONTROL_PERIOD: Duration = Duration::from_millis(20);
const RUN_TIME: Duration = Duration::from_secs(5);
const MAX_TURN_RATE: f64 = 360.0; // Degrees per second at full output
const START_HEADING: f64 = 100.0;
const TARGET_HEADING: f64 = -120.0;

/// Heading hold in real time with debugging enabled.
///
/// Every control cycle's P, I, D and F terms are streamed to an iggy server
/// (and to `heading_hold_debug.log`) so the tuning can be inspected while the
/// loop runs. Start an iggy server on 127.0.0.1:8090 first, or just read the
/// log file afterwards.
fn main() {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();

    println!("Heading Hold with Debugging");
    println!("===========================");
    println!("Start heading:  {:.1}°", START_HEADING);
    println!("Target heading: {:.1}°", TARGET_HEADING);
    println!();

    let heading = Rc::new(Cell::new(START_HEADING));
    let gyro_heading = Rc::clone(&heading);
    let gyro = FnSensor::new(move || Ok(gyro_heading.get()));

    let config = PidConfig::new()
        .with_kp(0.015)
        .with_kd(0.4)
        .with_continuous_input(-180.0, 180.0)
        .with_output_limits(-1.0, 1.0)
        .with_setpoint(TARGET_HEADING);

    let debug_config = DebugConfig {
        loop_id: "heading_hold".to_string(),
        sample_rate_hz: Some(25.0),
        ..DebugConfig::default()
    };

    println!("Creating control loop with debugging");
    let mut pid = PidControlLoop::new(config, gyro).with_debugging(debug_config);
    pid.enable();

    let start = Instant::now();
    let mut last_tick = Instant::now();
    let mut cycle = 0usize;

    while start.elapsed() < RUN_TIME {
        sleep(CONTROL_PERIOD);
        let dt = last_tick.elapsed().as_secs_f64();
        last_tick = Instant::now();

        let output = pid.get();

        let mut next = heading.get() + output * MAX_TURN_RATE * dt;
        if next >= 180.0 {
            next -= 360.0;
        } else if next < -180.0 {
            next += 360.0;
        }
        heading.set(next);

        if cycle % 25 == 0 {
            println!(
                "t={:5.2}s heading {:8.2}° error {:8.2}° output {:+.3}",
                start.elapsed().as_secs_f64(),
                heading.get(),
                pid.last_error(),
                output
            );
        }
        cycle += 1;
    }

    println!();
    println!("Final heading: {:.2}°", heading.get());
    // Give the publisher a moment to flush its last batch
    sleep(Duration::from_millis(200));
}
