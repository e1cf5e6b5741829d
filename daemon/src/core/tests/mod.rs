// End-to-end and storage tests for the coordination core, run against
// temporary databases and the in-process simulated network.

mod mock_plugins;
mod property_tests;
mod scenario_tests;
mod storage_tests;

use std::{sync::Arc, time::Duration};

use uuid::Uuid;
use weft_common::{
    batch::BatchPayload,
    data::Data,
    message::{context_hash, Message, MessageState, MessageType},
    pin::{BatchPin, PinEntry},
    time::get_current_time_in_millis,
};

use crate::{
    config::NodeConfig,
    core::{
        assembler::new_message,
        storage::{MessageProvider, SledStorage},
        Node,
    },
    plugins::{simulator::simulator_plugins, simulator::SimulatedNetwork, Plugins},
};

pub(crate) fn test_config(org: &str, node: &str) -> NodeConfig {
    NodeConfig {
        org: org.to_owned(),
        node: node.to_owned(),
        signing_key: format!("0x{}", org),
        batch_timeout_millis: 25,
        retry_base_millis: 10,
        retry_cap_millis: 50,
        reconcile_interval_millis: 100,
        stale_threshold_millis: 50,
        cid_grace_millis: 60_000,
        ..NodeConfig::default()
    }
}

// Spin up a node on the simulated network with a throwaway database
pub(crate) async fn sim_node(
    network: &Arc<SimulatedNetwork>,
    org: &str,
    node: &str,
) -> Arc<Node<SledStorage>> {
    let config = test_config(org, node);
    let plugins = simulator_plugins(Arc::clone(network), org, node, &config.signing_key);
    sim_node_with_plugins(network, config, plugins).await
}

pub(crate) async fn sim_node_with_plugins(
    network: &Arc<SimulatedNetwork>,
    config: NodeConfig,
    plugins: Plugins,
) -> Arc<Node<SledStorage>> {
    let storage = SledStorage::temporary().expect("temporary storage");
    let org = config.org.clone();
    let node_name = config.node.clone();
    let node = Node::new(config, storage, plugins);
    network
        .register_node(&org, &node_name, node.events_sender())
        .await;
    node.start().await.expect("node start");
    node
}

// Poll until the message reaches the state, or give up
pub(crate) async fn await_message_state(
    node: &Arc<Node<SledStorage>>,
    id: &Uuid,
    state: MessageState,
    timeout_millis: u64,
) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_millis);
    loop {
        {
            let storage = node.storage();
            let guard = storage.read().await;
            if let Ok(Some(message)) = guard.get_message(id).await {
                if message.state == state {
                    return true;
                }
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// A batch as a remote author would have sealed and announced it: the wire
// payload plus the batch pin carrying one nonce-chained context per topic
pub(crate) fn remote_batch(
    namespace: &str,
    author: &str,
    topics: &[&str],
    nonces: &[u64],
    cid: Option<Uuid>,
    data: Vec<Data>,
) -> (BatchPin, Vec<u8>, Message) {
    let mut message = new_message(
        namespace,
        author,
        MessageType::Broadcast,
        topics.iter().map(|t| (*t).to_owned()).collect(),
        None,
    );
    message.header.key = format!("0x{}", author);
    message.header.created = get_current_time_in_millis();
    message.header.cid = cid;
    message.data = data
        .iter()
        .map(|d| d.as_ref().expect("sealed data"))
        .collect();
    message.seal().expect("sealable message");

    let batch_id = Uuid::new_v4();
    let mut wire = message.clone();
    wire.state = MessageState::Sent;
    wire.batch = Some(batch_id);
    let payload = BatchPayload {
        messages: vec![wire],
        data,
    };
    let bytes = payload.wire_bytes().expect("wire payload");
    let payload_hash = payload.hash().expect("payload hash");

    let contexts = topics
        .iter()
        .zip(nonces)
        .map(|(topic, nonce)| PinEntry {
            context: context_hash(namespace, topic, None).expect("context"),
            nonce: *nonce,
        })
        .collect();

    let batch_pin = BatchPin {
        namespace: namespace.to_owned(),
        batch_id,
        batch_hash: payload_hash,
        payload_ref: None,
        contexts,
    };
    (batch_pin, bytes, message)
}

