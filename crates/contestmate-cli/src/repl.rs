use std::io::Write;
use std::pin::pin;
use std::time::Duration;

use anyhow::Result;
use contestmate_core::{ChatSessionController, LoadOutcome, QuickAction, SendOutcome};
use contestmate_schema::MessageId;
use tokio_util::sync::CancellationToken;

use crate::app::App;
use crate::print_messages;

const HELP: &str = "\
Commands:
  /new              start over with a fresh conversation
  /history          list past conversations
  /open <id>        continue a past conversation
  /delete <id>      delete a past conversation
  /quick <action>   recommend | skills | trends | help
  quit              leave
Press Ctrl-C while a reply is typing to show it at once.";

enum Input<'a> {
    Quit,
    Help,
    New,
    History,
    Open(&'a str),
    Delete(&'a str),
    Quick(&'a str),
    Say(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };
    match command {
        "quit" | "exit" => Input::Quit,
        "/help" => Input::Help,
        "/new" => Input::New,
        "/history" => Input::History,
        "/open" => Input::Open(arg),
        "/delete" => Input::Delete(arg),
        "/quick" => Input::Quick(arg),
        _ => Input::Say(line),
    }
}

pub async fn run_repl(app: &App) -> Result<()> {
    let user = app.require_user()?;
    let controller = app.controller();

    let cancel = CancellationToken::new();
    let sweeper = app
        .cache
        .spawn_sweeper(app.config.cache_sweep_interval(), cancel.clone());

    controller.initialize_chat();
    print_messages(&controller.store().messages());
    println!("Signed in as {}. Type /help for commands.", user.id);
    println!("---");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_input(line) {
            Input::Quit => break,
            Input::Help => println!("{HELP}"),
            Input::New => {
                controller.clear_chat()?;
                print_messages(&controller.store().messages());
            }
            Input::History => {
                let summaries = controller.load_summary_list().await?;
                crate::print_summaries(&summaries);
            }
            Input::Open(id) => match controller.load_conversation(id).await? {
                LoadOutcome::Loaded(count) => {
                    println!("({count} messages)");
                    print_messages(&controller.store().messages());
                }
                _ => print_messages(&controller.store().messages()),
            },
            Input::Delete(id) => {
                if controller.delete_conversation(id).await? {
                    println!("Deleted {id}.");
                } else {
                    eprintln!("Could not delete {id}.");
                }
            }
            Input::Quick(name) => match QuickAction::parse(name) {
                Some(action) => {
                    println!("> {}", action.prompt());
                    let outcome = controller.quick_action(action).await?;
                    show_outcome(&controller, outcome, app.config.typewriter_interval()).await;
                }
                None => eprintln!("Unknown quick action: {name}"),
            },
            Input::Say(text) => {
                let outcome = controller.send_message(text).await?;
                show_outcome(&controller, outcome, app.config.typewriter_interval()).await;
            }
        }
    }

    cancel.cancel();
    if let Err(error) = sweeper.await {
        tracing::warn!(%error, "cache sweeper ended abnormally");
    }
    Ok(())
}

async fn show_outcome(controller: &ChatSessionController, outcome: SendOutcome, every: Duration) {
    match outcome {
        SendOutcome::Replied(id) => stream_reply(controller, &id, every).await,
        SendOutcome::Failed => {
            if let Some(last) = controller.store().messages().last() {
                eprintln!("{}", last.content);
            }
        }
        SendOutcome::Ignored | SendOutcome::Superseded => {}
    }
}

/// Prints the reply as the typewriter reveals it.
async fn stream_reply(controller: &ChatSessionController, id: &MessageId, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    let mut interrupt = pin!(tokio::signal::ctrl_c());
    let mut skipped = false;
    let mut shown = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut interrupt, if !skipped => {
                skipped = true;
                controller.skip_typing();
            }
        }
        let Some(message) = controller.store().message(id) else {
            break;
        };
        if let Some(fresh) = message.content.get(shown..) {
            print!("{fresh}");
            shown = message.content.len();
            let _ = std::io::stdout().flush();
        }
        if !message.is_typing {
            println!();
            if !message.suggestions.is_empty() {
                println!("  try: {}", message.suggestions.join(" | "));
            }
            break;
        }
    }
    controller.wait_for_reply().await;
}
