use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, Publish, QoS,
};
use tokio::signal::unix::{signal, SignalKind};

use crate::constants::{DIAG_ARTIFACT_TOPIC, MQTT_CLIENT_ID, MQTT_KEEP_ALIVE_SECS, RPC_DRIVER_ID};
use crate::error::DiagError;
use crate::server::diag::{ArchiveInfo, ArtifactSink};
use crate::server::dispatcher::Dispatcher;

pub(crate) const REQUEST_QUEUE_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// `/rpc/v1/<driver>/<service>/<method>`, retained `"1"` while the method is served.
pub fn method_topic(service: &str, method: &str) -> String {
    format!("/rpc/v1/{}/{}/{}", RPC_DRIVER_ID, service, method)
}

/// Split a request topic into `(service, method, client_id)`.
pub fn parse_request_topic(topic: &str) -> Option<(String, String, String)> {
    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        ["", "rpc", "v1", driver, service, method, client_id]
            if *driver == RPC_DRIVER_ID && !client_id.is_empty() =>
        {
            Some((service.to_string(), method.to_string(), client_id.to_string()))
        }
        _ => None,
    }
}

pub fn mqtt_options(host: &str, port: u16) -> MqttOptions {
    let mut options = MqttOptions::new(MQTT_CLIENT_ID, host, port);
    options.set_keep_alive(Duration::from_secs(MQTT_KEEP_ALIVE_SECS));
    options
}

/// Publishes collection results on the artifact topic.
#[derive(Clone)]
pub struct MqttArtifactSink {
    client: AsyncClient,
}

impl MqttArtifactSink {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactSink for MqttArtifactSink {
    async fn publish(&self, artifact: Option<&ArchiveInfo>) {
        let payload = match artifact.map(serde_json::to_vec).transpose() {
            Ok(payload) => payload.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to encode artifact: {}", e);
                Vec::new()
            }
        };
        if let Err(e) = self
            .client
            .publish(DIAG_ARTIFACT_TOPIC, QoS::AtLeastOnce, false, payload)
            .await
        {
            warn!("Failed to publish artifact: {}", e);
        }
    }
}

/// JSON-RPC over MQTT front end for a [`Dispatcher`].
pub struct RpcServer {
    client: AsyncClient,
    dispatcher: Arc<Dispatcher>,
}

impl RpcServer {
    pub fn new(client: AsyncClient, dispatcher: Arc<Dispatcher>) -> Self {
        Self { client, dispatcher }
    }

    /// Serve requests until SIGINT or SIGTERM, then clean up.
    ///
    /// Fails when the broker cannot be reached or refuses the first
    /// connection; later disconnects are retried.
    pub async fn run(&self, eventloop: &mut EventLoop) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut connected = false;

        let result = loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT, stopping");
                    break Ok(());
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, stopping");
                    break Ok(());
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code != ConnectReturnCode::Success {
                            break Err(refused(ack.code));
                        }
                        connected = true;
                        if let Err(e) = self.setup_endpoints().await {
                            break Err(e);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => self.spawn_request(publish),
                    Ok(_) => {}
                    Err(ConnectionError::ConnectionRefused(code)) => break Err(refused(code)),
                    Err(e) if !connected => {
                        break Err(DiagError::Mqtt(format!("Cannot connect to broker: {}", e)).into());
                    }
                    Err(e) => {
                        warn!("MQTT connection lost: {}", e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        };

        if let Err(e) = &result {
            error!("{:#}", e);
        }
        self.stop(eventloop).await;
        result
    }

    async fn setup_endpoints(&self) -> Result<()> {
        debug!("Setting up RPC endpoints");
        for (service, method) in self.dispatcher.keys() {
            let topic = method_topic(service, method);
            self.client
                .publish(topic.as_str(), QoS::AtLeastOnce, true, "1")
                .await
                .map_err(|e| DiagError::Mqtt(e.to_string()))?;
            debug!("Subscribe to {}/+", topic);
            self.client
                .subscribe(format!("{}/+", topic), QoS::AtLeastOnce)
                .await
                .map_err(|e| DiagError::Mqtt(e.to_string()))?;
        }
        Ok(())
    }

    /// Handle one request on its own task so the event loop keeps polling.
    fn spawn_request(&self, publish: Publish) {
        let Some((service, method, client_id)) = parse_request_topic(&publish.topic) else {
            debug!("Ignoring message on {}", publish.topic);
            return;
        };

        let client = self.client.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            let response = dispatcher.handle(&publish.payload, &service, &method).await;
            let reply_topic = format!("{}/{}/reply", method_topic(&service, &method), client_id);

            let body = match serde_json::to_vec(&response) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Failed to encode reply to {}: {}", reply_topic, e);
                    return;
                }
            };
            if let Err(e) = client.publish(reply_topic.as_str(), QoS::AtMostOnce, false, body).await {
                warn!("Failed to publish reply to {}: {}", reply_topic, e);
            }
        });
    }

    async fn stop(&self, eventloop: &mut EventLoop) {
        debug!("Cleaning up retains");
        MqttArtifactSink::new(self.client.clone()).publish(None).await;

        for (service, method) in self.dispatcher.keys() {
            if let Err(e) = self
                .client
                .publish(method_topic(service, method), QoS::AtLeastOnce, true, Vec::<u8>::new())
                .await
            {
                warn!("Failed to clear {}/{}: {}", service, method, e);
            }
        }
        if let Err(e) = self.client.disconnect().await {
            warn!("Failed to disconnect: {}", e);
        }

        let drained = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("Broker did not confirm shutdown in {:?}", SHUTDOWN_DRAIN_TIMEOUT);
        }
    }
}

fn refused(code: ConnectReturnCode) -> anyhow::Error {
    DiagError::Mqtt(format!("MQTT broker connection failed, code {:?}", code)).into()
}
