//! Modbus Monitor - acquisition engine for a Modbus gateway dashboard
//!
//! Polls holding registers, coils and discrete inputs of one slave through an
//! HTTP gateway, validates user-edited address ranges and sends single-register
//! writes. A small local JSON API exposes the state to the dashboard.

pub mod api;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod metrics;
pub mod modbus;
