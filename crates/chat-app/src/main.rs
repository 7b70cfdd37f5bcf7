use chatline::{ChatApp, ChatResult, Command, TranscriptPrinter};
use chatline_storage::{SharedStore, StoreEvent};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

const HELP: &str = "commands: /new /abort /regen /resend /edit <text> /clear /sessions /quit";

/// Terminal entry point.
///
/// Logs go to stderr so streamed replies on stdout stay readable.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        tracing::error!(error = %error, "chatline stopped");
        std::process::exit(1);
    }
}

async fn run() -> ChatResult<()> {
    let app = ChatApp::load()?;
    app.new_session();

    let events = app.store().lock().subscribe();
    let printer = tokio::spawn(print_transcript(app.store().clone(), events));

    let mut stdout = tokio::io::stdout();
    write_line(&mut stdout, HELP).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(error = %error, "failed to read input");
                        break;
                    }
                };

                match Command::parse(&line) {
                    None => {}
                    Some(Command::Quit) => break,
                    Some(Command::Sessions) => {
                        for entry in app.session_overview() {
                            write_line(&mut stdout, &entry).await;
                        }
                    }
                    Some(command) => {
                        // Outcomes are logged by the exchange task itself.
                        let _ = app.execute(command);
                    }
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    tracing::warn!(error = %error, "failed to listen for ctrl-c");
                    break;
                }
                if !app.controller().abort_streaming() {
                    break;
                }
            }
        }
    }

    app.controller().shutdown();
    printer.abort();
    Ok(())
}

async fn print_transcript(store: SharedStore, mut events: broadcast::Receiver<StoreEvent>) {
    let mut printer = TranscriptPrinter::new();
    let mut stdout = tokio::io::stdout();

    loop {
        let message_id = match events.recv().await {
            Ok(StoreEvent::MessageUpdated { message_id, .. }) => message_id,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "transcript printer fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let output = {
            let store = store.lock();
            store
                .message(message_id)
                .and_then(|message| printer.render(message))
        };
        if let Some(output) = output {
            if let Err(error) = stdout.write_all(output.as_bytes()).await {
                tracing::warn!(error = %error, "failed to write reply");
                break;
            }
            let _ = stdout.flush().await;
        }
    }
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) {
    let text = format!("{line}\n");
    if let Err(error) = stdout.write_all(text.as_bytes()).await {
        tracing::warn!(error = %error, "failed to write output");
    }
}
