use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use colored::Colorize;

use crate::bias::{BiasChannel, BiasValue};
use crate::error::Error;
use crate::processing::autobias::StepDirection;
use crate::session::{Command, CommandSource, DisplaySink, TickReport};

// -----------------------------------------------------------------------------
// TERMINAL DISPLAY
// -----------------------------------------------------------------------------

/// Prints one status line per rate check plus bias changes and errors.
/// Frames and rasters are not drawn.
pub struct TerminalDisplay {
    low_rate_threshold: f64,
    high_rate_threshold: f64,
}

impl TerminalDisplay {
    pub fn new(low_rate_threshold: f64, high_rate_threshold: f64) -> Self {
        Self {
            low_rate_threshold,
            high_rate_threshold,
        }
    }
}

impl DisplaySink for TerminalDisplay {
    fn show_bias(&mut self, serial: &str, channel: BiasChannel, value: BiasValue) {
        println!("{} {:>10} {:<15} {}", "bias".cyan(), serial, channel.label(), value);
    }

    fn show_error(&mut self, source: &str, error: &Error) {
        eprintln!("{} {}: {}", "error".red().bold(), source, error);
    }

    fn report(&mut self, report: &TickReport) {
        let Some(rate) = report.rate else {
            return;
        };

        let rate_text = format!("{:>10.0} ev/s/sensor", rate);
        let rate_text = if rate < self.low_rate_threshold {
            rate_text.yellow()
        } else if rate > self.high_rate_threshold {
            rate_text.red()
        } else {
            rate_text.green()
        };
        let rec = if report.recording {
            "REC".red().bold()
        } else {
            "   ".white()
        };
        let controller = match report.controller {
            Some(state) => format!(
                "coarse {:>3}  low {} high {}",
                state.current_coarse, state.low_count, state.high_count
            ),
            None => "autobias off".to_string(),
        };
        println!(
            "{} {}  {}  sensors {}",
            rec, rate_text, controller, report.active_sensors
        );

        if let Some(step) = report.step {
            let why = match step.direction {
                StepDirection::Down => "below",
                StepDirection::Up => "above",
            };
            let message = format!(
                "Autobias: rate {:.0} {} band, {} coarse {} -> {}",
                step.rate, why, step.channel, step.from, step.value.coarse
            );
            println!("{}", message.magenta());
        }
    }
}

/// Coloured table of one sensor's six registers.
pub fn print_bias_table(serial: &str, biases: &[(BiasChannel, BiasValue)]) {
    println!("{}", format!("Sensor {}", serial).bold());
    for (channel, value) in biases {
        println!(
            "  {:<15} coarse {:>3}  fine {:>3}",
            channel.label().cyan(),
            value.coarse,
            value.fine
        );
    }
}

// -----------------------------------------------------------------------------
// STDIN COMMANDS
// -----------------------------------------------------------------------------

/// Reads one command per line on a background thread. Lines that do not
/// parse are reported and skipped.
pub struct StdinCommands {
    rx: Receiver<Command>,
}

impl StdinCommands {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{} {}", "?".yellow(), e),
                }
            }
        });
        Self { rx }
    }
}

impl CommandSource for StdinCommands {
    fn poll_command(&mut self, timeout: Duration) -> Option<Command> {
        self.rx.recv_timeout(timeout).ok()
    }
}

pub fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  q                            quit");
    println!("  r                            start recording");
    println!("  s                            stop recording");
    println!("  <channel> coarse|fine <n>    set a bias on every sensor");
    let channels: Vec<&str> = BiasChannel::ALL.iter().map(|c| c.label()).collect();
    println!("  channels: {}", channels.join(", "));
}
