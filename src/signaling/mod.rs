//! Signaling Module - RPC/Event Client für die SFU
//!
//! Dieses Modul verwaltet die Kommunikation mit dem SFU-Host:
//! - WebSocket-Verbindung aufbauen und halten
//! - Anfragen korrelieren und Antworten zustellen
//! - Push-Events parsen und weiterleiten
//!

mod client;
mod messages;

pub use client::{ConnectionStatus, SfuAdapter, SignalingError};
pub use messages::*;
