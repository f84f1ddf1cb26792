use crate::gateway::ConnectionId;
use crate::state::AppState;
use crate::websocket::{ChatConnection, ConnectionRegistry};
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

// Outbound payload for the socket
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct TextMessage(String);

/// Socket adapter. Frames in, payloads out; the session logic lives in
/// [`ChatConnection`], which runs in its own task.
struct WsSession {
    connection_id: ConnectionId,
    inbound: UnboundedSender<String>,
    registry: ConnectionRegistry,
    hb: Instant,
}

impl WsSession {
    fn new(
        connection_id: ConnectionId,
        inbound: UnboundedSender<String>,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            connection_id,
            inbound,
            registry,
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(connection_id = %act.connection_id, "websocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "websocket session started");
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "websocket session stopped");

        // unsubscribe right away; the session task finishes presence cleanup
        let registry = self.registry.clone();
        let connection_id = self.connection_id;
        actix::spawn(async move {
            registry.remove_connection(connection_id).await;
        });
    }
}

impl Handler<TextMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: TextMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

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
                if self.inbound.send(text.to_string()).is_err() {
                    tracing::warn!(connection_id = %self.connection_id, "session task gone, closing");
                    ctx.stop();
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::debug!(connection_id = %self.connection_id, "binary frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(connection_id = %self.connection_id, ?reason, "websocket close received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// GET /ws
/// Upgrade to the realtime protocol. The first command must be
/// `authenticate`.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    // reject plain requests before anything is registered
    ws::handshake(&req)?;

    let (mut connection, mut outbound) = ChatConnection::open(state.get_ref().clone()).await?;
    let (inbound_tx, mut inbound_rx) = unbounded_channel::<String>();

    let session = WsSession::new(connection.id(), inbound_tx, state.registry.clone());
    let (addr, resp) = match ws::start_with_addr(session, &req, stream) {
        Ok(started) => started,
        Err(e) => {
            connection.disconnect().await;
            return Err(e);
        }
    };

    // registry -> socket
    actix::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            addr.do_send(TextMessage(payload));
        }
    });

    // socket -> session, one command at a time
    actix::spawn(async move {
        while let Some(text) = inbound_rx.recv().await {
            connection.handle_text(&text).await;
        }
        connection.disconnect().await;
    });

    Ok(resp)
}
