//! Command-line interface and REPL

use anyhow::{bail, Context, Result};
use colored::*;
use midi_thru::directory::Port;
use midi_thru::engine::{ChannelSet, Routing, RoutingEngine};
use midi_thru::midi::cc;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tracing::debug;

/// A parsed REPL command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ports,
    Status,
    Input(Option<String>),
    Output(Option<String>),
    Route(Option<String>, Option<String>),
    Mute(u8),
    Solo(u8),
    Control { channel: u8, controller: u8, value: u8 },
    Panic,
    Rescan,
    Help,
    Quit,
}

/// Parse one line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (head.to_lowercase().as_str(), args.as_slice()) {
        ("ports" | "ls", []) => Command::Ports,
        ("status", []) => Command::Status,
        ("in", [id]) => Command::Input(port_arg(id)),
        ("out", [id]) => Command::Output(port_arg(id)),
        ("route", [input, output]) => Command::Route(port_arg(input), port_arg(output)),
        ("mute", [channel]) => Command::Mute(number(channel, "channel")?),
        ("solo", [channel]) => Command::Solo(number(channel, "channel")?),
        ("cc", [channel, controller, value]) => Command::Control {
            channel: number(channel, "channel")?,
            controller: match cc::from_alias(controller) {
                Some(controller) => controller,
                None => number(controller, "controller")?,
            },
            value: number(value, "value")?,
        },
        ("panic", []) => Command::Panic,
        ("rescan", []) => Command::Rescan,
        ("help" | "?", []) => Command::Help,
        ("quit" | "exit", []) => Command::Quit,
        (other, _) if is_known(other) => bail!("Wrong arguments for '{}', try 'help'", other),
        (other, _) => bail!("Unknown command '{}', try 'help'", other),
    };
    Ok(Some(command))
}

fn is_known(word: &str) -> bool {
    matches!(
        word,
        "ports" | "ls" | "status" | "in" | "out" | "route" | "mute" | "solo" | "cc" | "panic"
            | "rescan" | "help" | "?" | "quit" | "exit"
    )
}

/// `-` clears a side
fn port_arg(word: &str) -> Option<String> {
    (word != "-").then(|| word.to_string())
}

fn number(word: &str, what: &str) -> Result<u8> {
    word.parse()
        .with_context(|| format!("Invalid {} '{}' (expected 0-255)", what, word))
}

/// Execute a command. Returns false when the REPL should stop.
pub async fn execute(engine: &RoutingEngine, command: Command) -> bool {
    match command {
        Command::Ports => print_ports(&engine.inputs(), &engine.outputs(), Some(&engine.routing())),
        Command::Status => print_status(engine),
        Command::Input(id) => {
            let output = engine.routing().output_id;
            engine.set_routing(id.as_deref(), output.as_deref());
            print_routing(&engine.routing());
        },
        Command::Output(id) => {
            let input = engine.routing().input_id;
            engine.set_routing(input.as_deref(), id.as_deref());
            print_routing(&engine.routing());
        },
        Command::Route(input, output) => {
            engine.set_routing(input.as_deref(), output.as_deref());
            print_routing(&engine.routing());
        },
        Command::Mute(channel) => {
            if engine.mute(channel) {
                println!("  ch {} {}", channel, "muted".red());
            } else if ChannelSet::is_valid(channel) {
                println!("  ch {} {}", channel, "unmuted".green());
            } else {
                println!("  {}", "channel must be 1-16".red());
            }
        },
        Command::Solo(channel) => {
            if engine.solo(channel) {
                println!("  ch {} {}", channel, "soloed".yellow());
            } else if ChannelSet::is_valid(channel) {
                println!("  ch {} {}", channel, "unsoloed".green());
            } else {
                println!("  {}", "channel must be 1-16".red());
            }
        },
        Command::Control { channel, controller, value } => {
            engine.send_control(channel, controller, value);
        },
        Command::Panic => {
            engine.panic();
            println!("  {}", "All notes off sent".yellow());
        },
        Command::Rescan => {
            if engine.start().await {
                print_routing(&engine.routing());
            } else {
                println!("  {}", "MIDI unavailable".red());
            }
        },
        Command::Help => print_help(),
        Command::Quit => return false,
    }
    true
}

/// Read lines on a blocking thread and hand them to the async side.
///
/// Ctrl+C or Ctrl+D at the prompt is delivered as `quit`.
pub fn spawn_reader(prompt: &'static str) -> Result<mpsc::UnboundedReceiver<String>> {
    let mut editor = DefaultEditor::new().context("Failed to initialize line editor")?;
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("repl".to_string())
        .spawn(move || loop {
            match editor.readline(prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                    }
                    if tx.send(line).is_err() {
                        break;
                    }
                },
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                    let _ = tx.send("quit".to_string());
                    break;
                },
                Err(e) => {
                    debug!("Line editor stopped: {}", e);
                    let _ = tx.send("quit".to_string());
                    break;
                },
            }
        })
        .context("Failed to spawn REPL thread")?;

    Ok(rx)
}

/// Print inputs and outputs, marking the active pair when known
pub fn print_ports(inputs: &[Port], outputs: &[Port], routing: Option<&Routing>) {
    let active_in = routing.and_then(|r| r.input_id.as_deref());
    let active_out = routing.and_then(|r| r.output_id.as_deref());

    for (title, ports, active) in [
        ("Input Ports:", inputs, active_in),
        ("Output Ports:", outputs, active_out),
    ] {
        println!("\n{}", title.bold());
        if ports.is_empty() {
            println!("  {}", "No ports found".dimmed());
            continue;
        }
        for port in ports {
            let marker = if Some(port.id.as_str()) == active {
                "*".bright_green()
            } else {
                " ".normal()
            };
            println!(
                "  {} {} {} {}",
                marker,
                port.display_name().bright_white(),
                format!("[{}]", port.transport).yellow(),
                port.id.dimmed()
            );
        }
    }
    println!();
}

fn print_routing(routing: &Routing) {
    println!(
        "  {} {} {} {}",
        "route".bold(),
        routing.input_name.as_deref().unwrap_or("none").cyan(),
        "->".dimmed(),
        routing.output_name.as_deref().unwrap_or("none").cyan()
    );
}

fn print_status(engine: &RoutingEngine) {
    println!("  {} {}", "status".bold(), engine.status().to_string().green());
    print_routing(&engine.routing());
    println!("  {}   {}", "muted".bold(), engine.muted_channels());
    println!("  {}  {}", "soloed".bold(), engine.soloed_channels());
}

fn print_help() {
    println!("\n{}", "Commands:".bold().cyan());
    for (usage, about) in [
        ("ports", "list MIDI ports (* = active)"),
        ("status", "engine state, routing and channel filter"),
        ("in <id|->", "select or clear the input"),
        ("out <id|->", "select or clear the output"),
        ("route <in|-> <out|->", "select both sides"),
        ("mute <ch>", "toggle mute on channel 1-16"),
        ("solo <ch>", "toggle solo on channel 1-16"),
        ("cc <ch> <ctl> <val>", "send a control change (ctl may be volume, pan, cutoff, ...)"),
        ("panic", "all notes off on every output"),
        ("rescan", "re-request access and re-resolve ports"),
        ("quit", "exit"),
    ] {
        println!("  {:<22} {}", usage.yellow(), about);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_blank_line() {
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_routing_commands() {
        assert_eq!(parse("in i1").unwrap(), Some(Command::Input(Some("i1".to_string()))));
        assert_eq!(parse("out -").unwrap(), Some(Command::Output(None)));
        assert_eq!(
            parse("route - o2").unwrap(),
            Some(Command::Route(None, Some("o2".to_string())))
        );
    }

    #[test]
    fn test_parse_control_aliases() {
        assert_eq!(
            parse("cc 1 cutoff 64").unwrap(),
            Some(Command::Control { channel: 1, controller: 74, value: 64 })
        );
        assert_eq!(
            parse("CC 16 7 127").unwrap(),
            Some(Command::Control { channel: 16, controller: 7, value: 127 })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("mute").is_err());
        assert!(parse("mute x").is_err());
        assert!(parse("cc 1 wobble 3").is_err());
        assert!(parse("frobnicate").is_err());
    }

    #[tokio::test]
    async fn test_execute_against_virtual_engine() {
        use midi_thru::directory::VirtualDirectory;
        use midi_thru::engine::EngineOptions;
        use midi_thru::preferences::MemoryPreferences;
        use std::sync::Arc;

        let dir = Arc::new(VirtualDirectory::with_ports(
            &[("i1", "CtrlA")],
            &[("o1", "SynthB")],
        ));
        let engine = RoutingEngine::new(
            dir.clone(),
            Arc::new(MemoryPreferences::new()),
            EngineOptions { access_timeout: None, ..EngineOptions::default() },
        );
        assert!(execute(&engine, Command::Rescan).await);
        assert!(execute(&engine, Command::Output(None)).await);
        assert_eq!(engine.routing().input_id.as_deref(), Some("i1"));
        assert_eq!(engine.routing().output_id, None);

        assert!(execute(&engine, Command::Mute(4)).await);
        assert!(engine.muted_channels().contains(4));
        assert!(execute(&engine, Command::Mute(4)).await);
        assert!(!engine.muted_channels().contains(4));

        // Out of range channels leave the filter untouched
        assert!(execute(&engine, Command::Mute(0)).await);
        assert!(execute(&engine, Command::Solo(17)).await);
        assert!(engine.muted_channels().is_empty());
        assert!(engine.soloed_channels().is_empty());
        assert!(!execute(&engine, Command::Quit).await);
    }
}
