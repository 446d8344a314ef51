use clap::{App, Arg, ArgMatches};
use iedsim::config::ConfigOverrides;
use iedsim::{Console, FieldDevice, SimulatorConfig, UnitIdMode};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("iedsim-server")
        .version("0.1.0")
        .about("🏭 Modbus TCP field device simulator")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("bind")
                .short("b")
                .long("bind")
                .value_name("ADDRESS")
                .help("Address to listen on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Modbus TCP port")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("unit-id")
                .short("u")
                .long("unit-id")
                .value_name("ID")
                .help("Modbus unit identifier")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("unit-id-mode")
                .long("unit-id-mode")
                .value_name("MODE")
                .help("Answer every unit id or only the configured one")
                .takes_value(true)
                .possible_values(&["permissive", "strict"]),
        )
        .arg(
            Arg::with_name("registers")
                .short("r")
                .long("registers")
                .value_name("COUNT")
                .help("Registers per bank")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("tick-ms")
                .long("tick-ms")
                .value_name("MILLIS")
                .help("Simulation tick interval")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("no-profile")
                .long("no-profile")
                .help("Start with empty registers and no variables"),
        )
        .arg(
            Arg::with_name("no-simulation")
                .long("no-simulation")
                .help("Do not run signal generators"),
        )
        .arg(
            Arg::with_name("log-level")
                .short("l")
                .long("log-level")
                .value_name("LEVEL")
                .help("trace, debug, info, warn or error")
                .takes_value(true),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => SimulatorConfig::from_file(path)?,
        None => SimulatorConfig::default(),
    };
    config.apply_args(&overrides(&matches)?);
    config.validate()?;

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level()?)
        .init();

    println!("🏭 IED Field Device Simulator");
    println!("=============================");
    println!("   Modbus TCP:   {}", config.socket_addr()?);
    println!("   Unit id:      {} ({:?})", config.unit_id, config.unit_id_mode);
    println!("   Registers:    {} per bank", config.register_count);
    println!(
        "   Simulation:   {}",
        if config.simulation_enabled {
            format!("every {} ms", config.tick_interval_ms)
        } else {
            "off".to_string()
        }
    );
    println!("📝 Operator commands: one JSON object per line on stdin");

    let device = Arc::new(FieldDevice::new(config)?);
    let listener = device.bind().await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let console_task = tokio::spawn(run_console(Console::new(Arc::clone(&device))));

    let run_device = Arc::clone(&device);
    let device_task = tokio::spawn(async move { run_device.run(listener, shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    match device_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Device stopped with error: {}", e),
        Err(e) => error!("Device task failed: {}", e),
    }
    console_task.abort();

    let status = device.status();
    println!(
        "🛑 Simulator stopped: {} connections, {} requests, {} ticks",
        status.server.total_connections, status.server.requests_served, status.simulation.ticks
    );
    Ok(())
}

async fn run_console(console: Console) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading operator input: {}", e);
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = console.execute_line(trimmed);
        match serde_json::to_string(&response) {
            Ok(json) => {
                if stdout.write_all(json.as_bytes()).await.is_err()
                    || stdout.write_all(b"\n").await.is_err()
                {
                    break;
                }
                let _ = stdout.flush().await;
            }
            Err(e) => error!("Failed to serialize operator response: {}", e),
        }
    }
    info!("Operator console closed");
}

fn overrides(matches: &ArgMatches<'_>) -> Result<ConfigOverrides, String> {
    Ok(ConfigOverrides {
        bind_address: matches.value_of("bind").map(str::to_string),
        port: parse_opt(matches, "port")?,
        unit_id: parse_opt(matches, "unit-id")?,
        unit_id_mode: parse_opt::<UnitIdMode>(matches, "unit-id-mode")?,
        register_count: parse_opt(matches, "registers")?,
        tick_interval_ms: parse_opt(matches, "tick-ms")?,
        no_profile: matches.is_present("no-profile"),
        no_simulation: matches.is_present("no-simulation"),
        log_level: matches.value_of("log-level").map(str::to_string),
    })
}

fn parse_opt<T: FromStr>(matches: &ArgMatches<'_>, name: &str) -> Result<Option<T>, String> {
    matches
        .value_of(name)
        .map(|raw| raw.parse::<T>().map_err(|_| format!("invalid value '{raw}' for --{name}")))
        .transpose()
}
