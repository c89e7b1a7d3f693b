//! `market-relay chat`: a line-oriented terminal client for the relay.
//!
//! Handy for poking at a running server by hand. Each stdin line becomes a
//! chat frame; every frame the server sends is printed as it arrives.

use anyhow::{Context, Result, bail};
use futures::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite;

use crate::models::UserId;
use crate::ws::{ClientFrame, ServerFrame};

pub async fn chat_command(
    url: &str,
    user_id: UserId,
    token: Option<String>,
    conversation_id: i64,
) -> Result<()> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;
    let (mut ws_write, mut ws_read) = ws_stream.split();

    send_frame(&mut ws_write, &ClientFrame::Auth { user_id, token }).await?;

    // Wait for the handshake answer before reading input
    loop {
        match ws_read.next().await {
            Some(Ok(tungstenite::Message::Text(text))) => {
                match serde_json::from_str::<ServerFrame>(text.as_str()) {
                    Ok(ServerFrame::Authenticated { user_id }) => {
                        eprintln!("[connected as user {user_id}, conversation {conversation_id}]");
                        break;
                    }
                    Ok(ServerFrame::Error { message }) => bail!("Handshake rejected: {message}"),
                    Ok(other) => print_frame(&other),
                    Err(_) => eprintln!("[unrecognized frame: {text}]"),
                }
            }
            Some(Ok(tungstenite::Message::Close(_))) | None => {
                bail!("Connection closed during handshake")
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e).context("WebSocket error during handshake"),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let frame = ClientFrame::Chat { conversation_id, content: line };
                if send_frame(&mut ws_write, &frame).await.is_err() {
                    eprintln!("[connection lost]");
                    break;
                }
            }
            msg = ws_read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match serde_json::from_str::<ServerFrame>(text.as_str()) {
                            Ok(frame) => print_frame(&frame),
                            Err(_) => eprintln!("[unrecognized frame: {text}]"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        eprintln!("[server closed the connection]");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        eprintln!("[connection error: {e}]");
                        break;
                    }
                }
            }
        }
    }

    let _ = ws_write.close().await;
    Ok(())
}

async fn send_frame<S>(ws_write: &mut S, frame: &ClientFrame) -> Result<()>
where
    S: Sink<tungstenite::Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(frame)?;
    ws_write
        .send(tungstenite::Message::Text(json.into()))
        .await
        .context("Failed to send frame")
}

fn print_frame(frame: &ServerFrame) {
    match frame {
        ServerFrame::Message { data } => {
            println!("<{}> {}", data.sender_id, data.content);
        }
        ServerFrame::MessageSent { data } => {
            println!("[sent #{}]", data.id);
        }
        ServerFrame::Error { message } => eprintln!("[error: {message}]"),
        ServerFrame::Authenticated { user_id } => eprintln!("[authenticated as {user_id}]"),
    }
}
