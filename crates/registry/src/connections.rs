//! Connection discovery between block types.
//!
//! For every ordered pair of registered block types the index records whether an
//! output of the producer may bind to a selector input of the consumer. Selector
//! fields that accept whole-step references connect to every block type, since
//! they route execution rather than consume data. Ordered collections keep the
//! index independent of registration or execution order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use visionflow_types::SelectedElement;

use crate::{blocks::BlockRegistry, catalog::kinds_compatible};

/// One direction of the connection index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionsIndex {
    /// Block type -> connected block types.
    pub block_wise: BTreeMap<String, BTreeSet<String>>,
    /// Block type -> property (input field or output name) -> connected block types.
    pub property_wise: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl ConnectionsIndex {
    fn connect(&mut self, block_type: &str, property: &str, other: &str) {
        self.block_wise.entry(block_type.to_string()).or_default().insert(other.to_string());
        self.property_wise
            .entry(block_type.to_string())
            .or_default()
            .entry(property.to_string())
            .or_default()
            .insert(other.to_string());
    }

    fn ensure_block(&mut self, block_type: &str) {
        self.block_wise.entry(block_type.to_string()).or_default();
        self.property_wise.entry(block_type.to_string()).or_default();
    }

    /// Block types connected to `block_type`; empty when none.
    pub fn connected(&self, block_type: &str) -> impl Iterator<Item = &str> {
        self.block_wise.get(block_type).into_iter().flatten().map(String::as_str)
    }
}

/// Direction-aware connection index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlocksConnections {
    /// Consumer -> producers whose outputs may feed its inputs (property-wise by input field).
    pub input_connections: ConnectionsIndex,
    /// Producer -> consumers that may take its outputs (property-wise by output name).
    pub output_connections: ConnectionsIndex,
}

impl BlocksConnections {
    /// Whether any output of `producer` may bind to some input of `consumer`.
    pub fn can_connect(&self, producer: &str, consumer: &str) -> bool {
        self.input_connections
            .block_wise
            .get(consumer)
            .is_some_and(|producers| producers.contains(producer))
    }

    /// Whether `producer` may feed the `property` field of `consumer`.
    pub fn can_feed_property(&self, producer: &str, consumer: &str, property: &str) -> bool {
        self.input_connections
            .property_wise
            .get(consumer)
            .and_then(|properties| properties.get(property))
            .is_some_and(|producers| producers.contains(producer))
    }
}

/// Derives the connection index from the registry's schemas and the kind rules.
pub fn discover_blocks_connections(registry: &BlockRegistry) -> BlocksConnections {
    let mut connections = BlocksConnections::default();

    for block in registry.blocks() {
        connections.input_connections.ensure_block(block.block_type());
        connections.output_connections.ensure_block(block.block_type());
    }

    for consumer in registry.blocks() {
        for field in consumer.manifest.selector_fields.values() {
            let output_kinds = field.kinds_for(SelectedElement::StepOutput);
            for producer in registry.blocks() {
                for output in &producer.descriptor.outputs {
                    let step_reference = field.accepts_step_reference;
                    let typed_reference = field.accepts_step_output && kinds_compatible(output.kinds.as_slice(), output_kinds.as_slice());
                    if step_reference || typed_reference {
                        connections
                            .input_connections
                            .connect(consumer.block_type(), &field.property_name, producer.block_type());
                        connections
                            .output_connections
                            .connect(producer.block_type(), &output.name, consumer.block_type());
                    }
                }
                if field.accepts_step_reference && producer.descriptor.outputs.is_empty() {
                    // Output-less blocks (flow control) can still be selected as a whole step.
                    connections
                        .input_connections
                        .connect(consumer.block_type(), &field.property_name, producer.block_type());
                    connections
                        .output_connections
                        .block_wise
                        .entry(producer.block_type().to_string())
                        .or_default()
                        .insert(consumer.block_type().to_string());
                }
            }
        }
    }

    connections
}
