use powerloop::{FnSensor, HeadingHold, ManualClock, PidConfig};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

// Simulation constants - easy to adjust
const SIMULATION_DURATION_SECONDS: f64 = 8.0;
const CONTROL_RATE_HZ: f64 = 50.0;
const DT: f64 = 1.0 / CONTROL_RATE_HZ;
const MAX_TURN_RATE: f64 = 360.0; // Degrees per second at full output
const MAX_TARGET_RATE: f64 = 90.0; // Degrees per second at full stick
const START_HEADING: f64 = -170.0;
const TARGET_HEADING: f64 = 170.0;

// Driver's turn stick: (from second, stick)
const STICK_SCRIPT: [(f64, f64); 3] = [(0.0, 0.0), (3.0, 0.5), (6.0, 0.0)];

/// # Heading Hold Simulation
///
/// A robot turns in place to hold a compass heading. The gyro reports
/// headings in `[-180, 180)`, so the shortest way from -170° to 170° is a 20°
/// turn through the ±180° boundary, not a 340° turn the long way round.
///
/// Halfway through, the driver pushes the turn stick. The target heading
/// sweeps round at up to 90°/s, wraps through the boundary again, and the
/// robot follows it.
///
/// The simulation runs on a manual clock, so it finishes instantly while
/// behaving exactly as it would at the configured control rate.
fn main() {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();

    let heading = Rc::new(Cell::new(START_HEADING));
    let gyro_heading = Rc::clone(&heading);
    let gyro = FnSensor::new(move || Ok(gyro_heading.get()));

    let gains = PidConfig::new()
        .with_kp(0.02) // Full output at 50° of error
        .with_ki(0.000002) // Integral is per millisecond of error
        .with_kd(0.5); // Derivative is per millisecond as well

    let clock = ManualClock::new();
    let mut hold = match HeadingHold::with_clock(gains, MAX_TARGET_RATE, gyro, Arc::new(clock.clone())) {
        Ok(hold) => hold,
        Err(e) => {
            eprintln!("heading hold unavailable: {}", e);
            return;
        }
    };
    if let Err(e) = hold.set_target(TARGET_HEADING) {
        eprintln!("bad target: {}", e);
        return;
    }

    let iterations = (SIMULATION_DURATION_SECONDS * CONTROL_RATE_HZ) as usize;

    println!("Heading Hold Simulation");
    println!("=======================");
    println!("Start heading:  {:.1}°", START_HEADING);
    println!("Target heading: {:.1}°", TARGET_HEADING);
    println!();
    println!("Time(s) | Stick | Target(°) | Heading(°) | Output");
    println!("--------|-------|-----------|------------|-------");

    let mut max_travel: f64 = 0.0;
    let mut travelled = 0.0;

    for i in 0..iterations {
        let time = i as f64 * DT;
        let stick = STICK_SCRIPT
            .iter()
            .rev()
            .find(|(from, _)| time >= *from)
            .map_or(0.0, |(_, stick)| *stick);

        clock.advance(Duration::from_secs_f64(DT));
        let output = hold.turn_speed(stick);

        // Turn the robot, wrapping the heading back into range
        let step = output * MAX_TURN_RATE * DT;
        if time < STICK_SCRIPT[1].0 {
            travelled += step;
            max_travel = max_travel.max(travelled.abs());
        }
        let mut next = heading.get() + step;
        if next >= 180.0 {
            next -= 360.0;
        } else if next < -180.0 {
            next += 360.0;
        }
        heading.set(next);

        if i % 25 == 0 {
            println!(
                "{:7.2} | {:+.2} | {:9.2} | {:10.2} | {:6.3}",
                time + DT,
                stick,
                hold.target(),
                heading.get(),
                output
            );
        }
    }

    println!();
    println!("Final heading: {:.2}° (target {:.2}°)", heading.get(), hold.target());
    println!("Largest rotation before the driver turned: {:.1}°", max_travel);
    if max_travel < 90.0 {
        println!("The robot took the short way round.");
    } else {
        println!("The robot took the long way round.");
    }
}
