//! Store Module - unidirektionaler State-Container
//!
//! Dieses Modul stellt die generische Store Engine bereit, auf der die
//! Audio-Session- und die ICE-State-Machine aufbauen:
//! - Serielle Verarbeitung aller Actions pro Store
//! - Middleware für Seiteneffekte, Reducer für reine State-Übergänge
//! - Beobachtung des States (voll oder als de-duplizierte Projektion)
//! - Optionales Action-Log für deterministisches Replay

mod action_log;
mod engine;

pub use action_log::{ActionLog, ActionRecord};
pub use engine::{
    Dispatcher, Middleware, Reducer, Step, Store, StoreBuilder, StoreError, StoreNamespace,
};
