//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements              | Connects to                |
//! |------------|-------------------------|----------------------------|
//! | `log_sink` | EventSink               | Serial log output          |
//! | `modbus`   | BusPort                 | UART / RS-485 Modbus RTU   |
//! | `mqtt`     | PublishPort             | MQTT broker (Homie)        |
//! | `nvs`      | StoragePort, ConfigPort | NVS / in-memory store      |
//! | `ota`      | UpdatePort              | HTTPS image → OTA partition|
//! | `wifi`     | NetworkPort             | ESP-IDF WiFi STA           |

pub mod log_sink;
pub mod modbus;
pub mod mqtt;
pub mod nvs;
pub mod ota;
pub mod wifi;
