// src/display/mod.rs
//! Display side of the controller.
//!
//! - NativeDisplayConnection: the display server client (trait + drivers)
//! - Dispatcher: turns server traffic into output events
//! - DisplaySpec / DesktopScreen: where primary output geometry ends up

pub mod connection;
pub mod dispatcher;
pub mod drivers;
pub mod screen;
pub mod spec;


pub use connection::{
    DisplayConnector, NativeDisplayConnection, OutputEvent, OutputId, RegistrationMode,
};
pub use dispatcher::Dispatcher;
pub use screen::DesktopScreen;
pub use spec::DisplaySpec;
