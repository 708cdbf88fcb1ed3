use std::io::Write;

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::client::ChatClient;

pub async fn run(url: &str) -> Result<()> {
    let mut rl = DefaultEditor::new().expect("Editor failed");
    let mut client = ChatClient::new(url);

    println!("Where to next? Ask about destinations, dates, and local tips.");

    loop {
        let readline = rl.readline(">>> ");
        match readline {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }

                let result = client
                    .send_message(&line, |fragment| {
                        print!("{}", fragment);
                        let _ = std::io::stdout().flush();
                    })
                    .await;

                match result {
                    Ok(()) => {
                        if let Some(turn) = client.turns().last() {
                            if !turn.sources.is_empty() {
                                println!("\n\nSources:");
                                for source in &turn.sources {
                                    if source.title.is_empty() {
                                        println!("- {}", source.uri);
                                    } else {
                                        println!("- {} ({})", source.title, source.uri);
                                    }
                                }
                            }
                        }
                        println!();
                    }
                    // The client swaps the broken reply for an error turn
                    Err(_) => {
                        if let Some(turn) = client.turns().last() {
                            println!("\n{}", turn.text);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
