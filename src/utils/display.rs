//! Terminal output for the chat CLI.

use crate::core::message::{format_timestamp, Message};
use colored::*;
use std::io::{self, Write};
use std::time::Duration;

/// How a one-line status message is coloured, and where it goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Info,
    Failure,
}

pub fn print_status(tone: Tone, text: &str) {
    match tone {
        Tone::Success => println!("{}", text.green()),
        Tone::Info => println!("{}", text.blue()),
        Tone::Failure => eprintln!("{}", text.red().bold()),
    }
}

/// Underlined title, optionally followed by a dimmed detail line
pub fn print_banner(title: &str, detail: Option<&str>) {
    println!("\n{}", title.bright_cyan().bold());
    println!("{}", "=".repeat(title.chars().count()).bright_cyan());
    if let Some(detail) = detail {
        println!("{}", detail.dimmed());
    }
}

/// Print a prompt without a newline and flush so it shows before input is read
pub fn prompt(text: &str) -> io::Result<()> {
    print!("{}", text.yellow().bold());
    io::stdout().flush()
}

/// Numbered thread list; the entry after the last thread starts a new one
pub fn print_thread_menu(threads: &[String]) {
    println!("Existing threads:");
    for line in thread_menu_lines(threads) {
        println!("{}", line);
    }
}

fn thread_menu_lines(threads: &[String]) -> Vec<String> {
    threads
        .iter()
        .enumerate()
        .map(|(i, thread)| format!("{}. {}", i + 1, thread))
        .chain(std::iter::once(format!("{}. Start a new thread", threads.len() + 1)))
        .collect()
}

/// `User: hello` per message, with stored timestamps when asked for
pub fn print_transcript(messages: &[Message], with_timestamps: bool) {
    for message in messages {
        let speaker = capitalize(message.role.as_str());
        match message.timestamp.filter(|_| with_timestamps) {
            Some(ts) => println!(
                "{}: {} {}",
                speaker.bold(),
                message.content,
                format!("[{}]", format_timestamp(&ts)).dimmed()
            ),
            None => println!("{}: {}", speaker.bold(), message.content),
        }
    }
}

pub fn print_timing(label: &str, elapsed: Duration) {
    println!("{}\n", timing_line(label, elapsed).dimmed());
}

fn timing_line(label: &str, elapsed: Duration) -> String {
    format!("({}: {:.4} seconds)", label, elapsed.as_secs_f64())
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
