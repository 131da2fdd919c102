// src/error.rs
//! Error types returned by the display controller.
//!
//! Collaborators (display connections, transports) report failures as
//! `anyhow::Error`; the controller wraps those and adds the contract errors
//! callers are expected to match on.

use crate::widget::{RenderHandle, WidgetId, WidgetStateKind};
use std::time::Duration;

pub type ControllerResult<T> = std::result::Result<T, ControllerError>;

/// Operations that are recognised but deliberately not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unimplemented {
    /// A widget state change with no handler (full screen, focus, visibility).
    WidgetState(WidgetStateKind),
    /// Geometry change reported for an output other than the primary one.
    MultipleOutputs,
}

impl std::fmt::Display for Unimplemented {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unimplemented::WidgetState(kind) => write!(f, "widget state {:?}", kind),
            Unimplemented::MultipleOutputs => write!(f, "multiple outputs"),
        }
    }
}

#[derive(Debug)]
pub enum ControllerError {
    /// No widget is registered under this id.
    UnknownWidget(WidgetId),
    /// No realized widget carries this render handle.
    UnknownHandle(RenderHandle),
    /// The display spec was queried before any geometry report arrived.
    DisplaySpecUnknown,
    NotImplemented(Unimplemented),
    /// Every widget id has been handed out.
    WidgetIdsExhausted,
    /// The look-ahead probe gave up before the primary output reported.
    ProbeTimedOut(Duration),
    ProbeCancelled,
    /// The channel transport failed.
    Channel(anyhow::Error),
    /// The native display connection failed.
    Display(anyhow::Error),
}

impl ControllerError {
    /// True for errors that flag a missing feature rather than a failure.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, ControllerError::NotImplemented(_))
    }
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::UnknownWidget(id) => write!(f, "unknown widget {}", id),
            ControllerError::UnknownHandle(handle) => {
                write!(f, "no realized widget with handle {}", handle)
            }
            ControllerError::DisplaySpecUnknown => {
                write!(f, "display spec requested before the first output report")
            }
            ControllerError::WidgetIdsExhausted => write!(f, "widget ids exhausted"),
            ControllerError::NotImplemented(what) => write!(f, "not implemented: {}", what),
            ControllerError::ProbeTimedOut(after) => {
                write!(f, "primary output geometry not reported within {:?}", after)
            }
            ControllerError::ProbeCancelled => write!(f, "output geometry probe cancelled"),
            ControllerError::Channel(e) => write!(f, "channel error: {:#}", e),
            ControllerError::Display(e) => write!(f, "display error: {:#}", e),
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControllerError::Channel(e) | ControllerError::Display(e) => Some(&**e),
            _ => None,
        }
    }
}
