//! Native display connection implementations.

pub mod headless;

#[cfg(feature = "x11")]
pub mod x11;

pub use headless::{HeadlessConnection, HeadlessConnector, HeadlessServer};

#[cfg(feature = "x11")]
pub use self::x11::{X11Connection, X11Connector};
