use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::services::{BroadcastHub, Notification};

/// WebSocket heartbeat interval
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Client timeout - close connection if no heartbeat received
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Forwards every notification of one channel to a websocket client.
pub struct NotificationSocket {
    channel: String,
    receiver: Option<broadcast::Receiver<Notification>>,
    hb: Instant,
}

impl NotificationSocket {
    pub fn new(channel: String, receiver: broadcast::Receiver<Notification>) -> Self {
        Self {
            channel,
            receiver: Some(receiver),
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut <Self as Actor>::Context) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(channel = %act.channel, "Notification client heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }

            ctx.ping(b"");
        });
    }
}

impl Actor for NotificationSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(channel = %self.channel, "Notification subscriber connected");
        if let Some(receiver) = self.receiver.take() {
            ctx.add_stream(BroadcastStream::new(receiver));
        }
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(channel = %self.channel, "Notification subscriber disconnected");
    }
}

impl StreamHandler<Result<Notification, BroadcastStreamRecvError>> for NotificationSocket {
    fn handle(
        &mut self,
        item: Result<Notification, BroadcastStreamRecvError>,
        ctx: &mut Self::Context,
    ) {
        match item {
            Ok(notification) => match serde_json::to_string(&notification) {
                Ok(text) => ctx.text(text),
                Err(err) => tracing::error!("Failed to encode notification: {}", err),
            },
            Err(err) => {
                tracing::warn!(channel = %self.channel, "Subscriber lagged behind: {}", err);
            }
        }
    }

    // The websocket stays open even if the channel goes away.
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for NotificationSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                tracing::debug!("Ignoring inbound message on a notification socket");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(err) => {
                tracing::warn!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[tracing::instrument(name = "Notification subscription", skip(req, stream, hub))]
#[get("/{channel}")]
pub async fn subscribe_handler(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<(String,)>,
    hub: web::Data<Arc<BroadcastHub>>,
) -> Result<HttpResponse, Error> {
    let channel = path.into_inner().0;
    let receiver = hub.subscribe(&channel);
    ws::start(NotificationSocket::new(channel, receiver), &req, stream)
}
