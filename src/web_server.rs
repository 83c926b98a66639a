use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    serve, Json, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::advice::AdviceClient;
use crate::catalog::{Catalog, Question};
use crate::conversation::{Event, WELCOME_MESSAGE};
use crate::session::{Pacing, Session};

/// Frame sent from the server to a browser.
#[derive(Clone, Debug, Serialize)]
pub struct ServerMessage {
    pub message_type: String,
    pub payload: serde_json::Value,
}

impl ServerMessage {
    pub fn new<T: Serialize>(message_type: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            message_type: message_type.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    fn view(session: &Session) -> serde_json::Result<Self> {
        Self::new("View", &session.view())
    }

    fn rejected(reason: String) -> Self {
        Self {
            message_type: "Rejected".to_string(),
            payload: serde_json::json!({ "reason": reason }),
        }
    }
}

/// Frame sent from a browser to the server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Start,
    Answer { option: String },
    RequestAdvice,
}

impl From<ClientMessage> for Event {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::Start => Event::Start,
            ClientMessage::Answer { option } => Event::AnswerSelected(option),
            ClientMessage::RequestAdvice => Event::AdviceRequested,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
}

// Shared application state. Sessions themselves are owned by their socket task.
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    catalog: Arc<Catalog>,
    advisor: AdviceClient,
    pacing: Pacing,
}

impl AppState {
    pub fn new(
        templates_dir: PathBuf,
        catalog: Arc<Catalog>,
        advisor: AdviceClient,
        pacing: Pacing,
    ) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env(templates_dir)),
            catalog,
            advisor,
            pacing,
        }
    }
}

// Minijinja Environment setup
fn create_minijinja_env(templates_dir: PathBuf) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&templates_dir));
        notifier.watch_path(&templates_dir, true);
        Ok(env)
    })
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, (StatusCode, Html<String>)> {
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                tmpl.render(minijinja::context! {
                    title => "Compass",
                    welcome => WELCOME_MESSAGE,
                    question_count => state.catalog.len(),
                })
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
        })
}

async fn questions_handler(State(state): State<AppState>) -> Json<Vec<Question>> {
    Json(state.catalog.questions().to_vec())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Sends one frame. False means the connection should be closed.
async fn send_frame(socket: &mut WebSocket, frame: serde_json::Result<ServerMessage>) -> bool {
    let json = match frame.and_then(|frame| serde_json::to_string(&frame)) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return false;
        }
    };
    socket.send(Message::Text(json)).await.is_ok()
}

/// Applies one client frame to the session and returns the reply to send.
pub fn handle_client_text(session: &mut Session, text: &str) -> serde_json::Result<ServerMessage> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Unparseable client message {:?}: {}", text, e);
            return Ok(ServerMessage::rejected(format!("invalid message: {}", e)));
        }
    };
    match session.dispatch(message.into()) {
        Ok(()) => ServerMessage::view(session),
        Err(e) => Ok(ServerMessage::rejected(e.to_string())),
    }
}

// One session per connection; it lives exactly as long as the socket.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut session = Session::new(state.catalog.clone(), state.advisor.clone(), state.pacing);
    info!(session = %session.id(), "New WebSocket connection established");

    if !send_frame(&mut socket, ServerMessage::view(&session)).await {
        warn!("Failed to send initial view to new WebSocket client");
        return;
    }

    loop {
        tokio::select! {
            // A timer or the advice fetch completed
            result = session.next_internal() => {
                // Stale timers are already logged by the session; the client did nothing.
                if result.is_ok() && !send_frame(&mut socket, ServerMessage::view(&session)).await {
                    warn!("WebSocket client disconnected or send error. Closing connection.");
                    break;
                }
            }

            // Message received from the client
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame = handle_client_text(&mut session, &text);
                        if !send_frame(&mut socket, frame).await {
                            warn!("WebSocket client disconnected or send error. Closing connection.");
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Received unexpected binary message from client");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested WebSocket close");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                    // Client disconnected without sending a Close message
                    None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                }
            }
        }
    }

    session.teardown();
    info!(session = %session.id(), "WebSocket connection closed");
}

pub fn router(state: AppState, static_dir: PathBuf) -> Router {
    let static_files_service = ServeDir::new(static_dir).not_found_service(tower::service_fn(|_| async {
        Ok::<_, std::convert::Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
    }));

    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/questions", get(questions_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(
    config: ServerConfig,
    catalog: Arc<Catalog>,
    advisor: AdviceClient,
    pacing: Pacing,
) -> Result<()> {
    let state = AppState::new(config.templates_dir, catalog, advisor, pacing);
    let app = router(state, config.static_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
