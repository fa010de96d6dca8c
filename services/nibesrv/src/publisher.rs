//! Publish/subscribe side of the gateway
//!
//! The poll engine only sees [`Publisher`]. [`MqttPublisher`] is the rumqttc
//! implementation: `publish` enqueues and returns at once, a delivery task
//! drains the queue at the configured rate, and an event-loop task keeps the
//! broker session alive.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::error::{NibeSrvError, Result};

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Fire-and-forget message sink
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()>;
}

/// Remove doubled separators left by concatenation
pub fn collapse_topic(topic: &str) -> String {
    let mut collapsed = topic.to_string();
    while collapsed.contains("//") {
        collapsed = collapsed.replace("//", "/");
    }
    collapsed
}

/// Join topic segments with `/` and collapse the result
pub fn join_topic(segments: &[&str]) -> String {
    collapse_topic(&segments.join("/"))
}

pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

#[derive(Debug)]
struct OutgoingMessage {
    topic: String,
    payload: String,
    retain: bool,
}

/// MQTT publisher backed by rumqttc
pub struct MqttPublisher {
    client: AsyncClient,
    queue: mpsc::Sender<OutgoingMessage>,
    status_topic: String,
    stopper: CancellationToken,
    delivery: JoinHandle<()>,
    event_loop: JoinHandle<()>,
}

impl MqttPublisher {
    /// Build the session and spawn its tasks
    ///
    /// The last will publishes `offline` on `<prefix>/status` when the
    /// session drops; `online` is published on every (re)connect. Both tasks
    /// run until [`MqttPublisher::shutdown`] or until `stopper` is cancelled.
    pub fn start(config: &MqttConfig, stopper: CancellationToken) -> Self {
        let qos = qos_from_level(config.qos);
        let status_topic = join_topic(&[&config.topic_prefix, "status"]);

        let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_last_will(LastWill::new(&status_topic, STATUS_OFFLINE, qos, true));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let capacity = config.queue_size.max(1);
        let (client, eventloop) = AsyncClient::new(options, capacity);
        let (queue, receiver) = mpsc::channel(capacity);

        info!(
            "MQTT publisher for {}:{} as '{}' (qos {}, rate {}/s)",
            config.broker, config.port, config.client_id, config.qos, config.rate
        );

        let event_loop = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            status_topic.clone(),
            qos,
            stopper.clone(),
        ));
        let delivery = tokio::spawn(run_delivery(
            receiver,
            client.clone(),
            qos,
            config.rate,
            stopper.clone(),
        ));

        Self {
            client,
            queue,
            status_topic,
            stopper,
            delivery,
            event_loop,
        }
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    /// Retained status message on `<prefix>/status`
    pub async fn set_status(&self, status: &str) -> Result<()> {
        self.publish(&self.status_topic, status, true).await
    }

    /// Disconnect from the broker and stop both tasks
    pub async fn shutdown(self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect request not queued: {}", e);
        }
        let Self {
            stopper,
            delivery,
            mut event_loop,
            ..
        } = self;

        if tokio::time::timeout(RECONNECT_DELAY, &mut event_loop)
            .await
            .is_err()
        {
            debug!("MQTT event loop still running, stopping it");
        }
        stopper.cancel();
        event_loop.abort();
        let _ = delivery.await;
        info!("MQTT publisher stopped");
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        let message = OutgoingMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        };

        match self.queue.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!("MQTT queue full, dropping message on {}", message.topic);
                Ok(())
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(NibeSrvError::publish("MQTT publisher is stopped"))
            },
        }
    }
}

async fn run_delivery(
    mut receiver: mpsc::Receiver<OutgoingMessage>,
    client: AsyncClient,
    qos: QoS,
    rate: u32,
    stopper: CancellationToken,
) {
    // 0 = unlimited
    let spacing = (rate > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(rate)));

    loop {
        let message = tokio::select! {
            () = stopper.cancelled() => break,
            message = receiver.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        debug!("MQTT publish {} ({} bytes)", message.topic, message.payload.len());
        let sent = tokio::select! {
            () = stopper.cancelled() => break,
            sent = client.publish(message.topic, qos, message.retain, message.payload) => sent,
        };
        if let Err(e) = sent {
            warn!("MQTT publish failed: {}", e);
        }

        if let Some(spacing) = spacing {
            tokio::select! {
                () = stopper.cancelled() => break,
                () = tokio::time::sleep(spacing) => {}
            }
        }
    }
    debug!("MQTT delivery task finished");
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    status_topic: String,
    qos: QoS,
    stopper: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = stopper.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("Connected to MQTT broker ({:?})", ack.code);
                if let Err(e) = client.try_publish(&status_topic, qos, true, STATUS_ONLINE) {
                    warn!("Cannot announce online status: {}", e);
                }
            },
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnected from MQTT broker");
                break;
            },
            Ok(notification) => {
                debug!("MQTT event: {:?}", notification);
            },
            Err(e) => {
                error!("MQTT connection error: {}; retrying in {:?}", e, RECONNECT_DELAY);
                tokio::select! {
                    () = stopper.cancelled() => break,
                    () = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            },
        }
    }
    debug!("MQTT event loop finished");
}
