//! Command execution.

use crate::Commands;
use colored::Colorize;
use ptpip_client::{Client, Command, CommandError, CommandOutput};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long to wait for the next live view frame.
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Maps a subcommand onto the shared command language.
pub fn to_command(cmd: &Commands) -> Result<Command, CommandError> {
    let line = match cmd {
        Commands::Info => "info".to_string(),
        Commands::State => "state".to_string(),
        Commands::Get { code } => format!("get {}", code),
        Commands::Set { code, value } => format!("set {} {}", code, value),
        Commands::Describe { code } => format!("describe {}", code),
        Commands::Capture { .. } => "capture".to_string(),
        Commands::Opreq { code, params } => format!("opreq {} {}", code, params.join(" ")),
        Commands::Probe => "probe".to_string(),
        // Handled directly in main.rs
        Commands::Repl | Commands::Liveview { .. } | Commands::Events => {
            return Err(CommandError::Usage("not a one-shot command"))
        }
    };
    Command::parse(&line)
}

/// Executes a command and returns the formatted output.
pub async fn execute(
    client: &Client,
    cmd: Commands,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    let preview_path = match &cmd {
        Commands::Capture { out } => out.clone(),
        _ => None,
    };

    let output = to_command(&cmd)?.execute(client).await?;

    let mut text = format_output(&output, json);
    if let (Some(path), CommandOutput::Capture { preview, .. }) = (preview_path, &output) {
        match preview {
            Some(preview) => {
                std::fs::write(&path, preview)?;
                text.push_str(&format!("\n{} {}", "Preview written to".dimmed(), path.display()));
            }
            None => text.push_str(&format!("\n{}", "No preview returned".yellow())),
        }
    }
    Ok(text)
}

/// Formats command output for display.
pub fn format_output(output: &CommandOutput, json: bool) -> String {
    if json {
        let value = output.to_json();
        return serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    }

    let text = output.render();
    match output {
        CommandOutput::Set { .. } | CommandOutput::Capture { .. } | CommandOutput::Probe { .. } => {
            text.green().to_string()
        }
        CommandOutput::Raw { code, .. } if !code.is_ok() => text.yellow().to_string(),
        CommandOutput::Describe { desc: None, .. } => text.yellow().to_string(),
        _ => text,
    }
}

/// Path of live view frame `index` under `dir`.
pub fn frame_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("frame-{:05}.jpg", index))
}

/// Saves up to `count` live view frames and returns how many were written.
pub async fn save_frames(
    client: &Client,
    count: usize,
    dir: &Path,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut frames = client
        .take_frames()
        .ok_or("live view unavailable: streamer socket not connected")?;
    std::fs::create_dir_all(dir)?;

    let mut saved = 0;
    while saved < count {
        let frame = match tokio::time::timeout(FRAME_TIMEOUT, frames.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(_) => {
                eprintln!("{}: no frame within {:?}", "Warning".yellow(), FRAME_TIMEOUT);
                break;
            }
        };
        std::fs::write(frame_path(dir, saved), &frame)?;
        saved += 1;
    }
    Ok(saved)
}

/// Streams events as JSON lines until Ctrl+C or the connection drops.
pub async fn watch_events(client: &Client) {
    let mut events = client.subscribe_events();
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let line = serde_json::json!({
                            "received_at": chrono::Utc::now().to_rfc3339(),
                            "event": event,
                        });
                        println!("{}", line);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        eprintln!("{}: lagged {} events", "Warning".yellow(), n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        eprintln!("{}", "Connection closed".red());
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping...".dimmed());
                break;
            }
        }
    }
}
