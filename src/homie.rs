//! Homie convention naming.
//!
//! Topics here are relative to the device base topic; the MQTT adapter
//! prefixes `{base_topic}/` before handing them to the client.
//!
//! ```text
//!  {node}/$name            {node}/{prop}/$name
//!  {node}/$type            {node}/{prop}/$unit
//!  {node}/$properties      {node}/{prop}/$datatype
//!  {node}/{prop}           $state
//! ```

use core::fmt::Write;

use crate::catalog::{Catalog, NodeDescriptor, Reading, RegisterDescriptor, ValueFormat};
use crate::error::PublishError;

/// Longest relative topic the node produces.
pub const MAX_TOPIC_LEN: usize = 64;

/// Longest payload (the `$properties` list is the worst case).
pub const MAX_PAYLOAD_LEN: usize = 128;

pub type Topic = heapless::String<MAX_TOPIC_LEN>;
pub type Payload = heapless::String<MAX_PAYLOAD_LEN>;

pub const ATTR_NAME: &str = "$name";
pub const ATTR_TYPE: &str = "$type";
pub const ATTR_PROPERTIES: &str = "$properties";
pub const ATTR_UNIT: &str = "$unit";
pub const ATTR_DATATYPE: &str = "$datatype";
pub const ATTR_STATE: &str = "$state";
pub const ATTR_HOMIE: &str = "$homie";
pub const ATTR_NODES: &str = "$nodes";

/// Convention version advertised as `$homie`.
pub const HOMIE_VERSION: &str = "3.0.1";

/// `$type` of every node.
pub const NODE_TYPE: &str = "sensor";
/// `$datatype` of every property; readings are opaque integers.
pub const DATATYPE_INTEGER: &str = "integer";

/// Device lifecycle values published on `$state`.
pub const STATE_READY: &str = "ready";
pub const STATE_SLEEPING: &str = "sleeping";
pub const STATE_LOST: &str = "lost";

/// Homie ID: `[a-z0-9]` and `-`, not starting with `-`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('-')
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// `{node}/{attr}`
pub fn node_attr(node: &NodeDescriptor<'_>, attr: &str) -> Result<Topic, PublishError> {
    let mut t = Topic::new();
    write!(t, "{}/{}", node.id, attr).map_err(|_| PublishError::Overflow)?;
    Ok(t)
}

/// `{node}/{prop}`: live value topic.
pub fn property(node: &NodeDescriptor<'_>, prop: &RegisterDescriptor<'_>) -> Result<Topic, PublishError> {
    let mut t = Topic::new();
    write!(t, "{}/{}", node.id, prop.id).map_err(|_| PublishError::Overflow)?;
    Ok(t)
}

/// `{node}/{prop}/{attr}`
pub fn property_attr(
    node: &NodeDescriptor<'_>,
    prop: &RegisterDescriptor<'_>,
    attr: &str,
) -> Result<Topic, PublishError> {
    let mut t = Topic::new();
    write!(t, "{}/{}/{}", node.id, prop.id, attr).map_err(|_| PublishError::Overflow)?;
    Ok(t)
}

/// Comma-separated property ids of `node`, in catalog order.
pub fn properties_list(node: &NodeDescriptor<'_>) -> Result<Payload, PublishError> {
    let mut list = Payload::new();
    for (i, prop) in node.properties.iter().enumerate() {
        if i > 0 {
            list.push(',').map_err(|_| PublishError::Overflow)?;
        }
        list.push_str(prop.id).map_err(|_| PublishError::Overflow)?;
    }
    Ok(list)
}

/// Comma-separated node ids of the catalog (`$nodes`).
pub fn nodes_list(catalog: &Catalog<'_>) -> Result<Payload, PublishError> {
    let mut list = Payload::new();
    for (i, node) in catalog.nodes().iter().enumerate() {
        if i > 0 {
            list.push(',').map_err(|_| PublishError::Overflow)?;
        }
        list.push_str(node.id).map_err(|_| PublishError::Overflow)?;
    }
    Ok(list)
}

/// Render a reading's value according to its display format.
pub fn render_value(reading: &Reading<'_>) -> Result<Payload, PublishError> {
    let mut p = Payload::new();
    let width = reading.register.width;
    let res = match reading.register.format {
        ValueFormat::Decimal => write!(p, "{}", reading.value()),
        ValueFormat::Hex if width.registers() == 1 => write!(p, "0x{:04X}", reading.raw & 0xFFFF),
        ValueFormat::Hex => write!(p, "0x{:08X}", reading.raw),
    };
    res.map_err(|_| PublishError::Overflow)?;
    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RegisterWidth;

    static PROPS: [RegisterDescriptor<'static>; 2] = [
        RegisterDescriptor {
            id: "temperature",
            name: "Temperature",
            unit: "°C",
            address: 0x3110,
            width: RegisterWidth::Int16,
            format: ValueFormat::Decimal,
        },
        RegisterDescriptor {
            id: "status",
            name: "Status",
            unit: "",
            address: 0x3200,
            width: RegisterWidth::Uint16,
            format: ValueFormat::Hex,
        },
    ];
    static NODE: NodeDescriptor<'static> = NodeDescriptor {
        id: "battery",
        name: "Battery",
        properties: &PROPS,
    };

    #[test]
    fn topics_follow_convention() {
        assert_eq!(property(&NODE, &PROPS[0]).unwrap(), "battery/temperature");
        assert_eq!(node_attr(&NODE, ATTR_NAME).unwrap(), "battery/$name");
        assert_eq!(
            property_attr(&NODE, &PROPS[1], ATTR_DATATYPE).unwrap(),
            "battery/status/$datatype"
        );
        assert_eq!(properties_list(&NODE).unwrap(), "temperature,status");
        let catalog = Catalog::new(&crate::catalog::epsolar::NODES).unwrap();
        assert_eq!(nodes_list(&catalog).unwrap(), "array,battery,device,load");
    }

    #[test]
    fn renders_signed_decimal_and_hex() {
        let t = Reading { node: &NODE, register: &PROPS[0], raw: 0xFFFF_FFF6 };
        assert_eq!(render_value(&t).unwrap(), "-10");
        let s = Reading { node: &NODE, register: &PROPS[1], raw: 0x0000_00A1 };
        assert_eq!(render_value(&s).unwrap(), "0x00A1");
    }

    #[test]
    fn id_validation() {
        assert!(is_valid_id("charging-status"));
        assert!(is_valid_id("array2"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("-lead"));
        assert!(!is_valid_id("Upper"));
        assert!(!is_valid_id("has/slash"));
        assert!(!is_valid_id("$name"));
    }

    #[test]
    fn overlong_topic_is_an_error() {
        static LONG: [RegisterDescriptor<'static>; 1] = [RegisterDescriptor {
            id: "a-property-id-that-is-long-enough-to-blow-the-topic-buffer-away",
            name: "x",
            unit: "",
            address: 0,
            width: RegisterWidth::Uint16,
            format: ValueFormat::Decimal,
        }];
        static LONG_NODE: NodeDescriptor<'static> = NodeDescriptor {
            id: "battery",
            name: "Battery",
            properties: &LONG,
        };
        assert_eq!(
            property_attr(&LONG_NODE, &LONG[0], ATTR_DATATYPE),
            Err(PublishError::Overflow)
        );
    }
}
