//! Terminal presentation of the event bus

use colored::Colorize;
use tokio::task::JoinHandle;

use crate::backup::BackupRecord;
use crate::events::{Event, EventReceiver, LogEvent, ProgressEvent, Severity};
use crate::status::StatusReport;

fn render_progress(event: &ProgressEvent) -> String {
    let percent = (event.fraction_complete * 100.0).round() as u32;
    let counter = format!("[{:>3}%]", percent);
    if event.terminal {
        format!("{} {}", counter.bold(), event.message)
    } else {
        format!(
            "{} {}",
            counter.cyan(),
            format!("({}/{}) {}", event.step_index, event.total_steps, event.message).dimmed()
        )
    }
}

fn render_log(event: &LogEvent) -> String {
    let time = event.timestamp.format("%H:%M:%S").to_string();
    let marker = match event.level {
        Severity::Debug => "·".dimmed(),
        Severity::Info => "→".cyan().bold(),
        Severity::Warning => "⚠".yellow().bold(),
        Severity::Error => "✗".red().bold(),
        Severity::Success => "✓".green().bold(),
    };
    format!("{} {} {}", time.dimmed(), marker, event.message)
}

/// Print events as they arrive until every emitter is dropped
pub fn spawn_presenter(mut receiver: EventReceiver, verbose: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match &event {
                Event::Progress(progress) => println!("{}", render_progress(progress)),
                Event::Log(log) if log.level == Severity::Debug && !verbose => {}
                Event::Log(log) => println!("{}", render_log(log)),
            }
        }
    })
}

pub fn print_status(report: &StatusReport) {
    println!("{} {}", "Stack on".bold(), report.target.bold());
    for service in &report.services {
        let state = if service.is_ready() {
            service.state.green().to_string()
        } else {
            service.state.red().to_string()
        };
        let health = service
            .health
            .map(|h| format!(" ({:?})", h).to_lowercase())
            .unwrap_or_default();
        println!(
            "  {} {} {}{} {}",
            "•".dimmed(),
            service.name.bold(),
            state,
            health,
            service.started_at.as_deref().unwrap_or_default().dimmed()
        );
    }
    let summary = format!("{}/{} running", report.running_count(), report.services.len());
    if report.all_running {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.red());
    }
}

pub fn print_backups(records: &[BackupRecord]) {
    if records.is_empty() {
        println!("{}", "No backups".dimmed());
        return;
    }
    for record in records {
        println!(
            "  {} {} {} {} {}",
            "•".dimmed(),
            record.id.bold(),
            record.kind,
            record.application_version,
            format!("{} bytes", record.size_bytes).dimmed()
        );
    }
}
