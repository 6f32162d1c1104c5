//! `matter-fabric-bridge`: a long-lived bridge process that owns a single administrative
//! identity over a fleet of commissioned Matter devices and drives `chip-tool` as its south-bound
//! client, exposing the fleet through HTTP/WebSocket, MQTT (Homie 3.0.1) and a SQLite device
//! database.
//!
//! Module layout mirrors the component table in the design document: the log-to-record pipeline
//! (`log_cleaner` -> `blocks` -> `grammar` -> `shaper`) feeds the process executor (`chip_tool`),
//! which in turn backs the command gateway (`gateway`), the commissioning orchestrator
//! (`commissioning`) and the polling engine (`polling`). `registry` is the only writer of
//! persistent state; `notify` and `mqtt` fan change events out to WebSocket clients and the MQTT
//! broker respectively; `http` binds the whole thing to a REST/WebSocket surface.

pub mod blocks;
pub mod chip_tool;
pub mod commands;
pub mod commissioning;
pub mod config;
pub mod datamodel;
pub mod gateway;
pub mod grammar;
pub mod http;
pub mod log_cleaner;
pub mod mqtt;
pub mod notify;
pub mod polling;
pub mod registry;
pub mod shaper;
pub mod types;
