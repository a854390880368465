//! Interactive REPL.

use crate::commands::format_output;
use colored::Colorize;
use ptpip_client::command::USAGE;
use ptpip_client::{Client, Command, Config};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;

const HELP_TEXT: &str = "
Session:
  help                        Show this help
  status                      Connection state and responder
  quit, exit                  Exit the REPL

Camera:";

pub async fn run(client: Client, config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "ptpip CLI".bold().cyan());
    println!(
        "Connecting to {} ({})...",
        config.responder.host, config.responder.vendor
    );

    client.connect().await?;
    if let Some(responder) = client.responder() {
        println!("{} {}", "Connected to".green(), responder.friendly_name.cyan());
    }

    let rl_config = rustyline::Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(rl_config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".ptpip_history"))
        .unwrap_or_else(|_| ".ptpip_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "ptpip>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, line, json).await {
                    Some(output) => println!("{}\n", output),
                    None => break,
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    let _ = client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

/// Runs one REPL line. `None` means exit.
async fn execute_repl_command(client: &Client, line: &str, json: bool) -> Option<String> {
    let cmd = line
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();

    match cmd.as_str() {
        "help" | "?" => Some(format!("{}\n{}\n", HELP_TEXT, USAGE)),

        "quit" | "exit" | "q" => None,

        "status" => {
            let mut out = format!("State: {}", client.state());
            if let Some(responder) = client.responder() {
                out.push_str(&format!(
                    "\nResponder: {} ({})\nConnection number: {}",
                    responder.friendly_name.cyan(),
                    responder.guid,
                    responder.connection_number
                ));
            }
            Some(out)
        }

        _ => {
            let result = match Command::parse(line) {
                Ok(command) => command.execute(client).await,
                Err(e) => Err(e),
            };
            Some(match result {
                Ok(output) => format_output(&output, json),
                Err(e) => format!("{}: {}", "Error".red(), e),
            })
        }
    }
}
