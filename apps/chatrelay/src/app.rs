//! Terminal front-ends for the relay server and client.

use chatrelay_client::{ChatClient, ClientError, ClientSettings, ClientState};
use chatrelay_connection::ChatObserver;
use chatrelay_protocol::constants::CLIENT_PREFIX;
use chatrelay_server::{RelayServer, ServerConfig};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Prints transcript lines to stdout.
struct Terminal;

impl ChatObserver for Terminal {
    fn on_message(&self, text: &str) {
        println!("{text}");
    }

    fn on_client_joined(&self, name: &str) {
        tracing::debug!(%name, "client joined");
    }

    fn on_client_left(&self, name: &str) {
        tracing::debug!(%name, "client left");
    }
}

/// Runs the relay server until Ctrl-C, then stops it cleanly.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let server = RelayServer::new(config, Terminal);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    server.stop().await?;
    Ok(())
}

/// Joins a server and sends every stdin line as a chat message.
///
/// Returns when stdin ends, on `/quit` or Ctrl-C, or when the server goes away.
pub async fn run_client(settings: ClientSettings) -> anyhow::Result<()> {
    let client = ChatClient::new(Terminal);
    client.connect(settings).await?;

    let Some(mut state) = client.subscribe_state().await else {
        return Ok(());
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                match client.send_message(line).await {
                    Ok(()) => {}
                    Err(ClientError::InvalidInput(_)) => {
                        println!("{CLIENT_PREFIX}: Message has invalid characters, try again!");
                    }
                    Err(e) => {
                        tracing::warn!("send failed: {e}");
                        println!("{CLIENT_PREFIX}: Can't send message to server!");
                    }
                }
            }

            _ = state.wait_for(|s| *s == ClientState::Closed) => {
                // Server shut down or the connection dropped.
                return Ok(());
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, leaving");
                break;
            }
        }
    }

    if client.state().await == ClientState::Active {
        client.disconnect().await?;
    }
    Ok(())
}
