//! Voltage PLC Console
//!
//! Line-driven front end for a single PLC session. Connects, prints every
//! notification as it arrives and accepts commands on stdin until the session
//! watchdog closes the connection.
//!
//! Usage: cargo run --bin plc_console [address[:port]]
//! Example: cargo run --bin plc_console 192.168.0.2:502
//!
//! Commands:
//!   poll        toggle polling
//!   green, red  switch the indicator lamps
//!   on N, off N drive coil N
//!   status      print session state and last readings
//!   quit        disconnect and exit

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use voltage_plc::{
    ChannelSink, Lamp, PlcEvent, PlcSession, PollTransition, SessionConfig, DEFAULT_TCP_PORT,
};

const DEFAULT_HOST: &str = "192.168.0.2";

fn parse_target(arg: Option<String>) -> (String, u16) {
    let Some(arg) = arg else {
        return (DEFAULT_HOST.to_string(), DEFAULT_TCP_PORT);
    };
    match arg.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') || host.starts_with('[') => {
            let port = port.parse().unwrap_or(DEFAULT_TCP_PORT);
            (host.trim_matches(|c| c == '[' || c == ']').to_string(), port)
        }
        _ => (arg, DEFAULT_TCP_PORT),
    }
}

fn print_event(event: &PlcEvent) {
    match event {
        PlcEvent::Connected(addr) => println!("🔗 Connected to {}", addr),
        PlcEvent::StatusChanged(status) => println!("   PLC status: {}", status),
        PlcEvent::ValueChanged(value) => println!("   Value: {}", value),
        PlcEvent::Error(e) => println!("❌ {}", e),
        PlcEvent::WatchdogTick(remaining) => {
            println!("⏱  {}s left", remaining.as_secs())
        }
        PlcEvent::WatchdogExpired => println!("⏰ Session time is up"),
        PlcEvent::Disconnected(reason) => println!("🔌 Disconnected ({:?})", reason),
    }
}

async fn run_command(session: &PlcSession, line: &str) -> Result<bool, Box<dyn std::error::Error>> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (Some("poll"), _) => match session.toggle_polling().await? {
            PollTransition::Started => println!("▶️  Polling started"),
            PollTransition::Stopped => println!("⏸  Polling stopped"),
        },
        (Some("green"), _) => session.set_lamp(Lamp::Green).await?,
        (Some("red"), _) => session.set_lamp(Lamp::Red).await?,
        (Some(cmd @ ("on" | "off")), Some(coil)) => {
            let coil: u16 = coil.parse()?;
            session.write_coil(coil, cmd == "on").await?;
            println!("✅ Coil {} {}", coil, cmd.to_uppercase());
        }
        (Some("status"), _) => {
            let snapshot = session.poll_snapshot().await;
            println!("   Session: {:?}", session.state().await);
            println!("   PLC status: {}", snapshot.plc_status);
            println!("   Last value: {:?}", snapshot.last_value);
            println!("   Watchdog: {:?}", session.watchdog_remaining().await);
            if let Some(stats) = session.transport_stats().await {
                println!(
                    "   Requests: {}, errors: {}",
                    stats.requests_sent, stats.errors
                );
            }
        }
        (Some("quit"), _) => return Ok(false),
        (None, _) => {}
        _ => println!("Commands: poll | green | red | on N | off N | status | quit"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    voltage_plc::logging::init("info")?;
    println!("🚀 {}", voltage_plc::info());

    let (host, port) = parse_target(std::env::args().nth(1));
    let (sink, mut events) = ChannelSink::new();
    let session = PlcSession::new(SessionConfig::default(), Arc::new(sink))?;

    if let Err(e) = session.connect(&host, port).await {
        println!("❌ Could not connect to {}:{}: {}", host, port, e);
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event);
                if matches!(event, PlcEvent::Disconnected(_)) {
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match run_command(&session, line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("❌ {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect().await;
    println!("👋 Bye");
    Ok(())
}
