//! Core types and configuration for titlemgr.
//!
//! This crate provides the error taxonomy, per-item engine states, engine and
//! application configuration, and the title/ticket/save data records shared
//! across the titlemgr workspace.

mod config;
mod error;
mod step;
mod title;

pub use config::{
    AppConfig, EngineConfig, EngineConfigBuilder, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE,
};
pub use error::{ConfigError, DataOpError};
pub use step::ItemStep;
pub use title::{
    ExtSaveDataInfo, MediaType, ParseIdError, PendingTitleInfo, SaveId, SystemSaveDataInfo,
    TicketInfo, TitleId,
};
