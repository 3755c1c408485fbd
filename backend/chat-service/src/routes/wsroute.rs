use crate::state::AppState;
use crate::websocket::handlers::{self, SessionContext};
use crate::websocket::ConnectionState;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_middleware::{authenticate_bearer, bearer_token};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

// WebSocket Actor
struct WsSession {
    session: SessionContext,
    state: AppState,
    conn_state: ConnectionState,
    hb: Instant,
    /// Registry events waiting to be attached to the context on start.
    outbound: Option<UnboundedReceiver<String>>,
    /// Feeds the task that handles this socket's events in arrival order.
    inbound: Option<UnboundedSender<String>>,
}

impl WsSession {
    fn new(
        session: SessionContext,
        state: AppState,
        conn_state: ConnectionState,
        outbound: UnboundedReceiver<String>,
    ) -> Self {
        Self {
            session,
            state,
            conn_state,
            hb: Instant::now(),
            outbound: Some(outbound),
            inbound: None,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user_id = %act.session.user_id, "websocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");

            let presence = act.state.presence.clone();
            let session = act.session;
            actix::spawn(async move {
                if let Err(e) = presence.refresh(session.user_id, session.connection_id).await {
                    tracing::debug!(error = %e, "presence refresh failed");
                }
            });
        });
    }

    fn start_event_worker(&mut self) {
        let (tx, mut rx) = unbounded_channel::<String>();
        self.inbound = Some(tx);

        let state = self.state.clone();
        let session = self.session;
        actix::spawn(async move {
            while let Some(text) = rx.recv().await {
                handlers::handle_text(&state, session, &text).await;
            }
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(
            user_id = %self.session.user_id,
            connection_id = %self.session.connection_id,
            "websocket session started"
        );

        self.hb(ctx);
        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
        self.start_event_worker();
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.conn_state.transition(ConnectionState::Disconnected);
        // Closing the channel ends the worker once queued events are handled.
        self.inbound.take();

        let state = self.state.clone();
        let session = self.session;
        actix::spawn(async move {
            handlers::on_disconnect(&state, session).await;
        });
    }
}

// Events from the registry, already serialised.
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, msg: String, ctx: &mut Self::Context) {
        ctx.text(msg);
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                let delivered = self
                    .inbound
                    .as_ref()
                    .is_some_and(|tx| tx.send(text.to_string()).is_ok());
                if !delivered {
                    ctx.stop();
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!("WebSocket close message received: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// GET /ws
///
/// The token comes from `Authorization: Bearer` or `?token=`. Rejected
/// handshakes never reach the upgrade.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let mut conn_state = ConnectionState::Connecting;
    conn_state.transition(ConnectionState::Authenticating);

    let query_token = web::Query::<WsParams>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().token);
    let token = bearer_token(req.headers())
        .map(str::to_owned)
        .or(query_token);

    let user_id = match authenticate_bearer(state.jwt.as_deref(), token.as_deref()) {
        Ok(user_id) => user_id,
        Err(failure) => {
            tracing::warn!(reason = %failure, "websocket connection rejected");
            conn_state.transition(ConnectionState::Disconnected);
            return Ok(failure.to_response());
        }
    };

    // Refuse non-upgrade requests before any registration happens.
    ws::handshake(&req)?;
    conn_state.transition(ConnectionState::Authenticated);

    let (session, outbound) = handlers::on_connect(&state, user_id).await?;
    let actor = WsSession::new(session, state.get_ref().clone(), conn_state, outbound);

    match ws::start(actor, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            handlers::on_disconnect(&state, session).await;
            Err(e)
        }
    }
}
