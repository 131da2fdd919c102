// src/lib.rs
//! Process-role-aware display coordination.
//!
//! A `DisplayController` works out which part of a split graphics pipeline
//! the current process plays (single process, browser, or GPU), brings up
//! only what that role needs, routes widget operations locally or across
//! the inter-process channel, and propagates primary output geometry to
//! the process that lays out the UI.

pub mod channel;
pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod geometry;
pub mod role;
pub mod widget;

pub use controller::DisplayController;
pub use error::{ControllerError, ControllerResult};
pub use role::{LaunchSwitches, ProcessRole};
