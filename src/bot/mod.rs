//! Chat front end.
//!
//! [`commands`] parses chat input, [`service`] runs it against the bot state,
//! [`format`] renders replies and [`telegram`] moves them over the wire.

pub mod commands;
pub mod format;
pub mod service;
pub mod telegram;

pub use commands::Command;
pub use service::{BotService, BotState};
