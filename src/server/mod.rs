//! MQTT RPC front end.
//!
//! `serve` connects to the broker, registers the `diag` and `status`
//! methods and answers requests until the process is signalled. Results of
//! `diag` also go to the artifact topic.

use std::sync::Arc;

use anyhow::Result;
use log::info;
use rumqttc::AsyncClient;

use crate::collectors::collector::Collector;
use crate::config::{CollectionOptions, MqttConfig};

/// Request dispatch table and JSON-RPC envelopes
pub mod dispatcher;

/// The `diag` and `status` methods
pub mod diag;

/// Broker connection and request loop
pub mod rpc;

use diag::{build_dispatcher, DiagService};
use rpc::{mqtt_options, MqttArtifactSink, RpcServer, REQUEST_QUEUE_CAPACITY};

/// Run the RPC server until SIGINT or SIGTERM.
pub async fn serve(options: CollectionOptions, mqtt: &MqttConfig) -> Result<()> {
    let (host, port) = mqtt.endpoint()?;
    info!("Connecting to broker {}:{}", host, port);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options(&host, port), REQUEST_QUEUE_CAPACITY);

    let sink = Arc::new(MqttArtifactSink::new(client.clone()));
    let service = Arc::new(DiagService::new(Collector::new(), options, sink));
    let dispatcher = Arc::new(build_dispatcher(service));

    RpcServer::new(client, dispatcher).run(&mut eventloop).await
}
