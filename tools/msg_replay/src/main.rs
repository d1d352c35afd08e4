mod device;
mod trace;

use std::{fs, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::warn;
use mxt_touch::{
    tracker::{ContactBatch, ContactPhase},
    CalibrationPhase, Controller, DriverConfig, EventSink, ObjectDirectory,
};

use device::{NoDelay, ReplayDevice, ReplayPending};

#[derive(Debug, Parser)]
#[command(name = "msg_replay")]
#[command(about = "Replays a captured touch controller message trace")]
struct Cli {
    /// Trace with `info`/`object` lines followed by `<t_ms> <rid> <8 hex bytes>`.
    trace: PathBuf,
    /// Driver tuning profile (TOML); built-in defaults otherwise.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Services calibration deadlines this long after the last pass.
    #[arg(long = "tail-ms", default_value_t = 0)]
    tail_ms: u64,
    #[arg(short, long)]
    verbose: bool,
}

/// Prints what the controller hands to the input layer.
struct CsvSink {
    now_ms: u64,
}

impl EventSink for CsvSink {
    fn report(&mut self, batch: &ContactBatch) {
        for contact in &batch.contacts {
            println!(
                "contact,{},{},{},{},{},{},{}",
                self.now_ms,
                contact.slot,
                phase_label(contact.phase),
                contact.x,
                contact.y,
                contact.width,
                contact.pressure
            );
        }
        if !batch.any_active {
            println!("idle,{}", self.now_ms);
        }
    }

    fn report_key(&mut self, key: u8, pressed: bool) {
        println!(
            "key,{},{},{}",
            self.now_ms,
            key,
            if pressed { "down" } else { "up" }
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "warn" }),
    )
    .init();

    let config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<DriverConfig>(&text)
                .with_context(|| format!("invalid profile {}", path.display()))?
        }
        None => DriverConfig::DEFAULT,
    };

    let trace = trace::load(&cli.trace)?;
    let device = ReplayDevice::new(&trace)?;
    let mut controller = Controller::new(device.clone(), device.pending(), NoDelay, config);
    let attach = controller
        .attach()
        .map_err(|err| anyhow!("attach failed: {err}"))?;
    println!(
        "attach,family={:#04x},version={:#04x},objects={},max_rid={}",
        attach.info.family_id, attach.info.version, attach.objects, attach.max_report_id
    );
    device.take_writes();

    let mut sink = CsvSink { now_ms: 0 };
    let mut phase = controller.engine().phase();
    for pass in &trace.passes {
        sink.now_ms = pass.t_ms;
        device.queue(&pass.messages);
        match controller.drain(pass.t_ms, &mut sink) {
            Ok(report) if report.errors > 0 => {
                println!("error,{},{} messages with failed writes", pass.t_ms, report.errors)
            }
            Ok(_) => {}
            Err(err) => println!("error,{},{}", pass.t_ms, err),
        }
        let left = device.queued();
        if left > 0 {
            warn!("{} messages of pass {} ms not read", left, pass.t_ms);
        }
        report_progress(&controller, &device, pass.t_ms, &mut phase);
    }

    if cli.tail_ms > 0 {
        let end_ms = trace
            .passes
            .last()
            .map_or(0, |pass| pass.t_ms)
            .saturating_add(cli.tail_ms);
        if let Err(err) = controller.service_timers(end_ms) {
            println!("error,{},{}", end_ms, err);
        }
        report_progress(&controller, &device, end_ms, &mut phase);
    }

    println!("end,{:?}", controller.engine().phase());
    Ok(())
}

fn report_progress(
    controller: &Controller<'_, ReplayDevice, ReplayPending, NoDelay>,
    device: &ReplayDevice,
    now_ms: u64,
    phase: &mut CalibrationPhase,
) {
    if let Some(directory) = controller.directory() {
        for (address, bytes) in device.take_writes() {
            println!(
                "write,{},{},{}",
                now_ms,
                field_label(directory, address),
                hex(&bytes)
            );
        }
    }
    let current = controller.engine().phase();
    if current != *phase {
        println!("phase,{},{:?}", now_ms, current);
        *phase = current;
    }
}

/// `T6+2` style name for a register address.
fn field_label(directory: &ObjectDirectory, address: u16) -> String {
    directory
        .objects()
        .iter()
        .find(|object| {
            let start = u32::from(object.start_address);
            let end = start + u32::from(object.size) * u32::from(object.instances);
            (start..end).contains(&u32::from(address))
        })
        .map(|object| format!("{}+{}", object.kind, address - object.start_address))
        .unwrap_or_else(|| format!("{address:#06x}"))
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn phase_label(phase: ContactPhase) -> &'static str {
    match phase {
        ContactPhase::Inactive => "inactive",
        ContactPhase::Pressed => "down",
        ContactPhase::Moving => "move",
        ContactPhase::Released => "up",
    }
}
