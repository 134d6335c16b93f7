mod cli;

use std::io;
use std::process;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, shells::Bash};
use log::{error, info, warn};

use esp3k5_lib::inverter::Esp3k5;
use esp3k5_lib::port;
use esp3k5_lib::protocol::frame::RawFrame;
use esp3k5_lib::protocol::telemetry::{self, Fault, Telemetry};

use cli::{Cli, Commands};

enum OutputFormat {
    Plain,
    Json,
}

fn record_to_plain(record: &Telemetry) -> String {
    [
        format!("solar_voltage_1  {:7.1} V", record.solar_voltage_1),
        format!("solar_current    {:7.1} A", record.solar_current),
        format!("solar_voltage_2  {:7.1} V", record.solar_voltage_2),
        format!("line_voltage     {:7.1} V", record.line_voltage),
        format!("line_current     {:7.1} A", record.line_current),
        format!("temperature      {:7.1} C", record.temperature),
        format!("energy_today     {:7.2} kWh", record.energy_today),
        format!("energy_total     {:7} kWh", record.energy_total),
        format!("fault_code       {}", record.fault_code),
        format!("run_status       {}", record.run_status),
        format!("frequency        {:7.1} Hz", record.frequency),
        format!("operation_time   {:7} min", record.operation_time),
        format!("power_factor     {:7.2}", record.power_factor),
        format!("dsp_version      {:7.2}", record.dsp_version),
    ]
    .join("\n")
}

fn record_to_json(record: &Telemetry) -> json::JsonValue {
    json::object! {
        solar_voltage_1: record.solar_voltage_1,
        solar_current: record.solar_current,
        solar_voltage_2: record.solar_voltage_2,
        line_voltage: record.line_voltage,
        line_current: record.line_current,
        temperature: record.temperature,
        energy_today: record.energy_today,
        energy_total: record.energy_total,
        fault_code: record.fault_code.raw(),
        faults: record.fault_code.faults().map(Fault::label).collect::<Vec<_>>(),
        run_status: record.run_status.to_string(),
        frequency: record.frequency,
        operation_time: record.operation_time,
        power_factor: record.power_factor,
        dsp_version: record.dsp_version,
    }
}

fn format_record(record: &Telemetry, fmt: &OutputFormat) -> String {
    match fmt {
        OutputFormat::Plain => record_to_plain(record),
        OutputFormat::Json => json::stringify(record_to_json(record)),
    }
}

fn cmd_read(inverter: &mut Esp3k5, timeout: Duration, fmt: &OutputFormat) -> Result<String> {
    match inverter.poll_once(timeout)? {
        Some(record) => Ok(format_record(&record, fmt)),
        None => Err(anyhow!(
            "no valid response within {} ms",
            timeout.as_millis()
        )),
    }
}

fn cmd_watch(
    inverter: &mut Esp3k5,
    timeout: Duration,
    interval: Duration,
    count: u64,
    fmt: &OutputFormat,
) -> Result<String> {
    let mut cycles = 0u64;

    loop {
        match inverter.poll_once(timeout)? {
            Some(record) => match fmt {
                OutputFormat::Plain => println!("{}\n", record_to_plain(&record)),
                OutputFormat::Json => println!("{}", json::stringify(record_to_json(&record))),
            },
            None => warn!("no valid response within {} ms", timeout.as_millis()),
        }

        cycles += 1;
        if count != 0 && cycles >= count {
            break;
        }
        thread::sleep(interval);
    }

    let stats = inverter.stats();
    info!(
        "{} cycles: {} frames, {} sync / {} header / {} checksum errors",
        cycles, stats.frames, stats.sync_errors, stats.header_errors, stats.checksum_errors
    );
    Ok(String::new())
}

fn cmd_decode(frame: &[u8], fmt: &OutputFormat) -> Result<String> {
    let raw = RawFrame::try_from(frame)?;
    let record = telemetry::decode(&raw);
    Ok(format_record(&record, fmt))
}

fn cmd_list_faults(fmt: &OutputFormat) -> Result<String> {
    Ok(match fmt {
        OutputFormat::Plain => Fault::ALL
            .iter()
            .map(|fault| format!("bit {:2}  0x{:08X}  {}", fault.bit(), fault.mask(), fault.label()))
            .collect::<Vec<String>>()
            .join("\n"),
        OutputFormat::Json => json::stringify(
            Fault::ALL
                .iter()
                .map(|fault| {
                    json::object! {
                        bit: fault.bit(),
                        mask: fault.mask(),
                        label: fault.label(),
                    }
                })
                .collect::<Vec<json::JsonValue>>(),
        ),
    })
}

fn do_main() -> Result<String> {
    if std::env::var("GENERATE_COMPLETION").is_ok() {
        generate(Bash, &mut Cli::command(), "esp3k5-tool", &mut io::stdout());

        return Ok(String::default());
    }

    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.debug {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp(None)
    .format_target(false)
    .init();

    let fmt = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Plain
    };
    let timeout = Duration::from_millis(cli.timeout_ms);

    match cli.command {
        Commands::Decode { frame } => cmd_decode(&frame, &fmt),
        Commands::ListFaults => cmd_list_faults(&fmt),
        command => {
            let mut port = port::open_port(&cli.port, cli.baudrate, cli.force)?;
            let mut inverter = Esp3k5::new(port.as_mut(), cli.station_id);

            match command {
                Commands::Read => cmd_read(&mut inverter, timeout, &fmt),
                Commands::Watch { interval_ms, count } => cmd_watch(
                    &mut inverter,
                    timeout,
                    Duration::from_millis(interval_ms),
                    count,
                    &fmt,
                ),
                _ => Err(anyhow!("unexpected command (this is a bug!)")),
            }
        }
    }
}

fn main() {
    match do_main() {
        Ok(s) => println!("{}", s),
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}
