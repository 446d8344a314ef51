use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use iedsim::client::ClientError;
use iedsim::{ModbusClient, RegisterBank};
use serde_json::json;
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "5002";
const DEFAULT_UNIT: &str = "254";

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

struct Target<'a> {
    host: &'a str,
    port: u16,
    unit: u8,
    format: &'a str,
    verbose: bool,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = App::new("iedsim")
        .version("0.1.0")
        .about("⚡ IED Simulator - Modbus TCP field device client")
        .setting(AppSettings::VersionlessSubcommands)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Device host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Modbus TCP port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("unit")
                .short("u")
                .long("unit")
                .value_name("ID")
                .help("Unit identifier sent with every request")
                .takes_value(true)
                .default_value(DEFAULT_UNIT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("read")
                .about("📖 Read coils, discrete inputs, holding or input registers")
                .arg(Arg::with_name("bank").help("coil, di, hr or ir").required(true))
                .arg(Arg::with_name("address").help("Starting address").required(true))
                .arg(Arg::with_name("count").help("Number of points").default_value("1")),
        )
        .subcommand(
            SubCommand::with_name("write-coil")
                .about("🔘 Write a single coil")
                .arg(Arg::with_name("address").required(true))
                .arg(
                    Arg::with_name("state")
                        .required(true)
                        .possible_values(&["on", "off", "1", "0", "true", "false"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("write-coils")
                .about("🔘 Write consecutive coils")
                .arg(Arg::with_name("address").required(true))
                .arg(Arg::with_name("states").required(true).multiple(true)),
        )
        .subcommand(
            SubCommand::with_name("write-register")
                .about("✏️  Write a single holding register")
                .arg(Arg::with_name("address").required(true))
                .arg(Arg::with_name("value").required(true)),
        )
        .subcommand(
            SubCommand::with_name("write-registers")
                .about("✏️  Write consecutive holding registers")
                .arg(Arg::with_name("address").required(true))
                .arg(Arg::with_name("values").required(true).multiple(true)),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📈 Poll a register range and print changes")
                .arg(Arg::with_name("bank").default_value("ir"))
                .arg(Arg::with_name("address").default_value("0"))
                .arg(Arg::with_name("count").default_value("10"))
                .arg(
                    Arg::with_name("interval")
                        .short("i")
                        .long("interval")
                        .value_name("MILLIS")
                        .takes_value(true)
                        .default_value("1000"),
                ),
        )
        .subcommand(
            SubCommand::with_name("server")
                .about("🚀 Start the field device simulator")
                .arg(
                    Arg::with_name("background")
                        .short("b")
                        .long("background")
                        .help("Run server in background"),
                ),
        )
        .get_matches();

    let target = Target {
        host: matches.value_of("host").unwrap_or(DEFAULT_HOST),
        port: parse_arg(&matches, "port")?,
        unit: parse_arg(&matches, "unit")?,
        format: matches.value_of("format").unwrap_or("table"),
        verbose: matches.is_present("verbose"),
    };

    match matches.subcommand() {
        ("read", Some(sub_matches)) => handle_read(sub_matches, &target).await?,
        ("write-coil", Some(sub_matches)) => handle_write_coil(sub_matches, &target).await?,
        ("write-coils", Some(sub_matches)) => handle_write_coils(sub_matches, &target).await?,
        ("write-register", Some(sub_matches)) => handle_write_register(sub_matches, &target).await?,
        ("write-registers", Some(sub_matches)) => handle_write_registers(sub_matches, &target).await?,
        ("monitor", Some(sub_matches)) => handle_monitor(sub_matches, &target).await?,
        ("server", Some(sub_matches)) => handle_server(sub_matches, target.port)?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Start the simulator", "iedsim server".bright_cyan());
            println!("  {} Read bus frequency", "iedsim read ir 70".bright_cyan());
            println!("  {} Watch phase voltages", "iedsim monitor ir 0 3".bright_cyan());
        }
    }

    Ok(())
}

async fn handle_read(matches: &ArgMatches<'_>, target: &Target<'_>) -> CliResult<()> {
    let bank: RegisterBank = parse_arg(matches, "bank")?;
    let address: u16 = parse_arg(matches, "address")?;
    let count: u16 = parse_arg(matches, "count")?;

    let mut client = connect(target).await?;
    let values = report(read_bank(&mut client, bank, address, count).await)?;
    print_values(bank, address, &values, target.format);
    Ok(())
}

async fn handle_write_coil(matches: &ArgMatches<'_>, target: &Target<'_>) -> CliResult<()> {
    let address: u16 = parse_arg(matches, "address")?;
    let state = normalize_state(matches.value_of("state").unwrap_or("off"))?;

    let mut client = connect(target).await?;
    report(client.write_single_coil(address, state).await)?;
    print_write_result("coil", address, &[u16::from(state)], target.format);
    Ok(())
}

async fn handle_write_coils(matches: &ArgMatches<'_>, target: &Target<'_>) -> CliResult<()> {
    let address: u16 = parse_arg(matches, "address")?;
    let states = matches
        .values_of("states")
        .into_iter()
        .flatten()
        .map(normalize_state)
        .collect::<CliResult<Vec<bool>>>()?;

    let mut client = connect(target).await?;
    report(client.write_multiple_coils(address, &states).await)?;
    let shown: Vec<u16> = states.iter().map(|&s| u16::from(s)).collect();
    print_write_result("coils", address, &shown, target.format);
    Ok(())
}

async fn handle_write_register(matches: &ArgMatches<'_>, target: &Target<'_>) -> CliResult<()> {
    let address: u16 = parse_arg(matches, "address")?;
    let value: u16 = parse_arg(matches, "value")?;

    let mut client = connect(target).await?;
    report(client.write_single_register(address, value).await)?;
    print_write_result("holding register", address, &[value], target.format);
    Ok(())
}

async fn handle_write_registers(matches: &ArgMatches<'_>, target: &Target<'_>) -> CliResult<()> {
    let address: u16 = parse_arg(matches, "address")?;
    let values = matches
        .values_of("values")
        .into_iter()
        .flatten()
        .map(|raw| parse_value::<u16>(raw, "register value"))
        .collect::<CliResult<Vec<u16>>>()?;

    let mut client = connect(target).await?;
    report(client.write_multiple_registers(address, &values).await)?;
    print_write_result("holding registers", address, &values, target.format);
    Ok(())
}

async fn handle_monitor(matches: &ArgMatches<'_>, target: &Target<'_>) -> CliResult<()> {
    let bank: RegisterBank = parse_arg(matches, "bank")?;
    let address: u16 = parse_arg(matches, "address")?;
    let count: u16 = parse_arg(matches, "count")?;
    let interval: u64 = parse_arg(matches, "interval")?;

    let mut client = connect(target).await?;
    println!(
        "{} Monitoring {} {}..{} every {} ms (Press Ctrl+C to stop)",
        "📈".bright_blue(),
        bank.to_string().bright_white(),
        address,
        u32::from(address) + u32::from(count),
        interval
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(interval.max(1)));
    let mut previous: Option<Vec<u16>> = None;
    loop {
        ticker.tick().await;
        let values = report(read_bank(&mut client, bank, address, count).await)?;

        match target.format {
            "json" => println!("{}", json!({ "bank": bank, "address": address, "values": values })),
            _ => {
                let changed = previous.as_ref().map_or(true, |prev| prev != &values);
                if changed || target.verbose {
                    let line = format_compact(&values);
                    if previous.is_some() && changed {
                        println!("{} {}", "Δ".yellow(), line.bright_cyan());
                    } else {
                        println!("  {}", line);
                    }
                }
            }
        }
        previous = Some(values);
    }
}

fn handle_server(matches: &ArgMatches<'_>, port: u16) -> CliResult<()> {
    let background = matches.is_present("background");

    println!("{}", "🚀 Starting IED field device simulator...".bright_green().bold());

    let port_arg = port.to_string();
    let mut cmd = Command::new("cargo");
    cmd.args(["run", "--bin", "iedsim-server", "--", "--port", port_arg.as_str()]);

    if background {
        cmd.spawn()?;
        println!("{} Server started in background on port {}", "✅".green(), port);
    } else {
        println!("{} Server starting on port {} (Press Ctrl+C to stop)", "🌐".bright_blue(), port);
        cmd.status()?;
    }

    Ok(())
}

// Helper functions

async fn connect(target: &Target<'_>) -> CliResult<ModbusClient> {
    let addr = format!("{}:{}", target.host, target.port);
    if target.verbose {
        println!("{} Connecting to {} (unit {})", "🔌".bright_blue(), addr, target.unit);
    }

    match ModbusClient::connect(addr.as_str(), target.unit).await {
        Ok(client) => Ok(client),
        Err(e) => {
            eprintln!("{} Failed to connect to field device at {}", "❌".red(), addr.bright_white());
            match &e {
                ClientError::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                    eprintln!("{} Simulator is not running. Start it with:", "💡".yellow());
                    eprintln!("   {}", "iedsim server".bright_cyan());
                    eprintln!("   or");
                    eprintln!("   {}", "cargo run --bin iedsim-server".bright_cyan());
                }
                ClientError::Timeout => {
                    eprintln!("{} Connection timed out after 5 seconds", "⏰".yellow());
                }
                other => {
                    eprintln!("{} Network error: {}", "🔌".yellow(), other.to_string().bright_red());
                }
            }
            Err(e.into())
        }
    }
}

async fn read_bank(
    client: &mut ModbusClient,
    bank: RegisterBank,
    address: u16,
    count: u16,
) -> Result<Vec<u16>, ClientError> {
    match bank {
        RegisterBank::Coil => client.read_coils(address, count).await.map(bits_to_words),
        RegisterBank::DiscreteInput => client.read_discrete_inputs(address, count).await.map(bits_to_words),
        RegisterBank::HoldingRegister => client.read_holding_registers(address, count).await,
        RegisterBank::InputRegister => client.read_input_registers(address, count).await,
    }
}

fn bits_to_words(bits: Vec<bool>) -> Vec<u16> {
    bits.into_iter().map(u16::from).collect()
}

/// Print a readable line for device-side failures before propagating them.
fn report<T>(result: Result<T, ClientError>) -> CliResult<T> {
    result.map_err(|e| {
        match &e {
            ClientError::Exception(code) => {
                eprintln!("{} Device rejected request: {}", "❌".red(), code.to_string().bright_red());
            }
            ClientError::Timeout => {
                eprintln!("{} No response within 5 seconds", "⏰".yellow());
                eprintln!("{} Check the unit id; strict devices ignore other units", "💡".yellow());
            }
            ClientError::InvalidQuantity { .. } => {
                eprintln!("{} {}", "⚠️".yellow(), e.to_string().bright_red());
            }
            _ => {}
        }
        e.into()
    })
}

fn parse_arg<T: FromStr>(matches: &ArgMatches<'_>, name: &str) -> CliResult<T> {
    let raw = matches
        .value_of(name)
        .ok_or_else(|| format!("missing argument '{name}'"))?;
    parse_value(raw, name)
}

fn parse_value<T: FromStr>(raw: &str, what: &str) -> CliResult<T> {
    raw.parse::<T>()
        .map_err(|_| format!("invalid {what} '{raw}'").into())
}

fn normalize_state(state: &str) -> CliResult<bool> {
    match state {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        other => Err(format!("invalid coil state '{other}'").into()),
    }
}

fn format_compact(values: &[u16]) -> String {
    values.iter().map(u16::to_string).collect::<Vec<_>>().join(" ")
}

fn print_values(bank: RegisterBank, address: u16, values: &[u16], format: &str) {
    match format {
        "json" => println!("{}", json!({ "bank": bank, "address": address, "values": values })),
        "compact" => println!("{}", format_compact(values)),
        _ => {
            println!("\n{} {}", "📖".bright_blue(), bank.to_string().bright_blue().bold());
            println!("{}", "┌─────────┬────────┬────────┐".bright_white());
            println!("{}", "│ Address │  Value │    Hex │".bright_white());
            println!("{}", "├─────────┼────────┼────────┤".bright_white());
            for (offset, value) in values.iter().enumerate() {
                println!(
                    "│ {:>7} │ {:>6} │ {:>6} │",
                    u32::from(address) + offset as u32,
                    value.to_string().bright_cyan(),
                    format!("{value:#06x}")
                );
            }
            println!("{}", "└─────────┴────────┴────────┘".bright_white());
        }
    }
}

fn print_write_result(what: &str, address: u16, values: &[u16], format: &str) {
    match format {
        "json" => println!("{}", json!({ "status": "success", "address": address, "values": values })),
        "compact" => println!("{}", "OK".bright_green()),
        _ => println!(
            "{} {} {} set to {}",
            "✅".green(),
            what.bright_white(),
            address,
            format_compact(values).bright_cyan()
        ),
    }
}
