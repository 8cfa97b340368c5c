//! EPSolar Tracer charge-controller register map.
//!
//! Input registers (Modbus function 0x04).  Raw values are published as-is;
//! scaling (most are ×100) is left to subscribers.

use super::{NodeDescriptor, RegisterDescriptor, RegisterWidth, ValueFormat};

const fn prop(
    id: &'static str,
    name: &'static str,
    unit: &'static str,
    address: u16,
    width: RegisterWidth,
) -> RegisterDescriptor<'static> {
    RegisterDescriptor {
        id,
        name,
        unit,
        address,
        width,
        format: ValueFormat::Decimal,
    }
}

use RegisterWidth::{Int16, Int32, Uint16, Uint32};

static ARRAY: [RegisterDescriptor<'static>; 3] = [
    prop("voltage", "Voltage", "V", 0x3100, Uint16),
    prop("current", "Current", "A", 0x3101, Uint16),
    prop("power", "Power", "W", 0x3102, Uint32),
];

static BATTERY: [RegisterDescriptor<'static>; 5] = [
    prop("temperature", "Temperature", "°C", 0x3110, Int16),
    prop("level", "Level", "%", 0x311A, Uint16),
    prop("status", "Status", "", 0x3200, Uint16),
    prop("voltage", "Voltage", "V", 0x331A, Uint16),
    prop("current", "Current", "A", 0x331B, Int32),
];

static DEVICE: [RegisterDescriptor<'static>; 3] = [
    prop("temperature", "Temperature", "°C", 0x3111, Int16),
    prop("charging-status", "Charging status", "", 0x3201, Uint16),
    prop("discharging-status", "Discharging status", "", 0x3202, Uint16),
];

static LOAD: [RegisterDescriptor<'static>; 3] = [
    prop("voltage", "Voltage", "V", 0x310C, Uint16),
    prop("current", "Current", "A", 0x310D, Uint16),
    prop("power", "Power", "W", 0x310E, Uint32),
];

/// Nodes in advertise/poll order.
pub static NODES: [NodeDescriptor<'static>; 4] = [
    NodeDescriptor { id: "array", name: "Solar array", properties: &ARRAY },
    NodeDescriptor { id: "battery", name: "Battery", properties: &BATTERY },
    NodeDescriptor { id: "device", name: "Device", properties: &DEVICE },
    NodeDescriptor { id: "load", name: "Load", properties: &LOAD },
];
