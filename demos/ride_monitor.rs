use isuper_bike::{
    BikeDevice, BikeError, Breakpoint, ConnectionParams, LevelGovernor, Result, SportProgram,
    TimeoutConfig,
};
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{error, info, warn};

/// Built-in interval program: warm up, three climbs, cool down
fn hill_program() -> SportProgram {
    SportProgram::new(
        "Hill Climb",
        vec![
            Breakpoint::new(1, 3),
            Breakpoint::new(2, 8),
            Breakpoint::new(4, 12),
            Breakpoint::new(6, 16),
            Breakpoint::new(8, 10),
            Breakpoint::new(10, 4),
        ],
        10,
    )
    .with_duration(20)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // usage: ride_monitor [address] [--program]
    let mut params = ConnectionParams::default();
    let mut run_program = false;
    for arg in std::env::args().skip(1) {
        if arg == "--program" {
            run_program = true;
        } else {
            params.address = arg;
        }
    }

    info!("🚲 isuper-bike Ride Monitor");
    let timeouts = TimeoutConfig::default();
    let poll_every = Duration::from_millis(timeouts.telemetry_poll_interval_ms);
    let governor_every = Duration::from_millis(timeouts.level_check_interval_ms);

    let mut bike = BikeDevice::new(params, timeouts);
    match bike.connect_and_initialize().await {
        Ok(outcome) => info!("✅ Connected ({outcome:?})"),
        Err(e) => {
            error!("❌ Failed to connect: {e}");
            return Err(e);
        }
    }

    let info = bike.get_status().await.device_info;
    if let Some((min, max)) = info.resistance_range() {
        info!("Resistance {min}-{max}, wheel {:.1}\"", info.wheel_diameter_inches);
    }

    bike.clear_data().await?;
    bike.start_sport().await?;

    let mut program = run_program.then(hill_program);
    let mut governor = LevelGovernor::new(governor_every);
    if let Some(program) = program.as_mut() {
        program.start();
    }

    info!("Press Ctrl+C to stop");
    let mut ticker = interval(poll_every);
    let started = Instant::now();
    let mut last_print = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        match bike.update_data().await {
            Ok(_) => {}
            Err(BikeError::Disconnected) => {
                warn!("❌ Bike disconnected");
                break;
            }
            Err(e) => warn!("Poll failed: {e}"),
        }

        if let Some(running) = program.as_mut() {
            if let Err(e) = bike
                .apply_program(running, &mut governor, std::time::Instant::now())
                .await
            {
                warn!("Could not apply program level: {e}");
            }
            if running.is_completed() {
                info!("🏁 Program {} finished", running.name());
                program = None;
            }
        }

        if last_print.elapsed() >= Duration::from_secs(2) {
            last_print = Instant::now();
            let t = bike.get_status().await.telemetry;
            let secs = started.elapsed().as_secs();
            println!(
                "{:02}:{:02}  {:5.1} km/h  {:3} rpm  {:3} W  lvl {:2}  {:3} bpm  {:6.3} km  \
                 {:6.1} kcal",
                secs / 60,
                secs % 60,
                t.speed_kmh,
                t.rpm,
                t.watts,
                t.level,
                t.heart_rate_bpm,
                t.distance_km,
                t.calories_kcal
            );
            if let Some(seg) = program
                .as_ref()
                .and_then(|p| p.segment_info_at(std::time::Instant::now()))
            {
                println!(
                    "      segment {}  level {:?} -> {:?} in {:.0}s",
                    seg.segment, seg.level, seg.next_level, seg.remaining_in_segment_secs
                );
            }
        }
    }

    if bike.is_connected() {
        if let Err(e) = bike.pause_sport().await {
            error!("❌ Failed to pause: {e}");
        }
    }
    bike.disconnect().await;

    let status = bike.get_status().await;
    println!("\n📊 Ride Summary:");
    println!(
        "  Duration: {:02}:{:02}",
        started.elapsed().as_secs() / 60,
        started.elapsed().as_secs() % 60
    );
    println!("  Distance: {:.2} km", status.telemetry.distance_km);
    println!("  Calories: {:.1} kcal", status.telemetry.calories_kcal);
    println!(
        "  Frames: {} sent / {} received",
        status.stats.messages_sent, status.stats.messages_received
    );

    Ok(())
}
