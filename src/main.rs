use std::env;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncBufReadExt;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tempchat_client::auth::{AuthSession, Identity};
use tempchat_client::gateway::HttpRpc;
use tempchat_client::models::CreateRoomParams;
use tempchat_client::realtime::WsTransport;
use tempchat_client::recent::RecentRoom;
use tempchat_client::session::MessageComposer;
use tempchat_client::{ClientContext, Config};

/// Minimal terminal client: joins (or creates) a room, prints live messages
/// and sends whatever is typed on stdin.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting TempChat client...");

    let config = Config::from_env()?;

    let auth = Arc::new(AuthSession::new());
    match (
        env::var("TEMPCHAT_USER_ID"),
        env::var("TEMPCHAT_ACCESS_TOKEN"),
    ) {
        (Ok(user_id), Ok(access_token)) => {
            auth.set_identity(Identity {
                user_id,
                display_name: env::var("TEMPCHAT_DISPLAY_NAME")
                    .unwrap_or_else(|_| "Guest".to_string()),
                avatar_url: None,
                access_token,
            });
        }
        _ => {
            anyhow::bail!(
                "TEMPCHAT_USER_ID and TEMPCHAT_ACCESS_TOKEN are required to sign in"
            );
        }
    }

    let rpc = Arc::new(HttpRpc::new(&config, auth.clone())?);
    let transport = Arc::new(WsTransport::connect(&config.realtime_url, &config.api_key).await?);
    let context = ClientContext::new(config, auth, rpc, transport);

    // Join the room named by TEMPCHAT_ROOM_CODE, or create a fresh one.
    let room_id = match env::var("TEMPCHAT_ROOM_CODE") {
        Ok(code) => {
            let password = env::var("TEMPCHAT_ROOM_PASSWORD").ok();
            let joined = context.gateway.join_room(&code, password.as_deref()).await?;
            tracing::info!(room = %joined.room_name, "Joined room");
            joined.room_id
        }
        Err(_) => {
            let params = CreateRoomParams {
                name: "TempChat Demo".to_string(),
                ..Default::default()
            };
            let created = context.gateway.create_room(&params).await?;
            println!(
                "Created room — share this code to invite others: {}",
                created.room_code
            );
            created.room_id
        }
    };

    let session = context.session();
    if let Err(e) = session.enter(&room_id).await {
        if e.redirects_to_join_screen() {
            anyhow::bail!("Room is no longer available: {}", e);
        }
        return Err(e.into());
    }

    if let Some(room) = session.room() {
        if let Err(e) = context.recent_rooms.remember(RecentRoom {
            room_id: room.id.clone(),
            name: room.name.clone(),
            room_code: room.room_code.clone(),
            last_accessed: Utc::now(),
            expires_at: room.expires_at,
        }) {
            tracing::warn!(error = %e, "Could not update recent rooms");
        }
        println!(
            "Connected to '{}' ({} participant(s)). Type to chat, Ctrl+C to leave.",
            room.name,
            session.participant_count()
        );
    }

    run_chat_loop(&session).await;

    session.leave().await;
    tracing::info!("Session closed");
    Ok(())
}

async fn run_chat_loop(session: &tempchat_client::session::RoomSession) {
    let mut composer = MessageComposer::new();
    let mut revision = session.watch_revision();
    let mut warned_expiry = false;
    let mut warned_degraded = false;

    let history = session.messages();
    for msg in &history {
        println!(
            "[{}] {}: {}",
            msg.created_at.format("%H:%M:%S"),
            msg.sender.display_name,
            msg.content
        );
    }
    let mut printed = history.len();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                println!("Leaving room...");
                break;
            }
            changed = revision.changed() => {
                if changed.is_err() {
                    break;
                }
                let messages = session.messages();
                for msg in messages.iter().skip(printed) {
                    println!("[{}] {}: {}", msg.created_at.format("%H:%M:%S"), msg.sender.display_name, msg.content);
                }
                printed = messages.len();

                if session.live_updates_degraded() && !warned_degraded {
                    warned_degraded = true;
                    println!("(connection degraded — you may miss live updates)");
                }
                if let Some(remaining) = session.remaining() {
                    if remaining.is_warning() && !warned_expiry {
                        warned_expiry = true;
                        println!(
                            "(room expires in {}m {}s)",
                            remaining.minutes, remaining.seconds
                        );
                    }
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => {
                        composer.set_draft(text);
                        if let Some(outgoing) = composer.submit() {
                            if let Err(e) = session.send_message(outgoing).await {
                                tracing::warn!(error = %e, "Send failed; message kept for resend");
                            }
                        }
                    }
                    _ => break,
                }
            }
        }
    }
}

/// Handle shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
