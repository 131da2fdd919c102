// src/role.rs
//! Process role resolution.
//!
//! A process learns which part of the split graphics pipeline it plays from
//! the switches it was launched with. The mapping is a pure function of the
//! switch set so it can be resolved once and cached.

use bitflags::bitflags;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Launch switches that influence role resolution.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct LaunchSwitches: u32 {
        const SINGLE_PROCESS     = 1 << 0;
        const IN_PROCESS_GPU     = 1 << 1;
        const TEST_COMPOSITOR    = 1 << 2;
        /// `--type=<name>`: present in every child process.
        const PROCESS_TYPE       = 1 << 3;
        const GPU_DEVICE_ID      = 1 << 4;
        const GPU_DRIVER_VENDOR  = 1 << 5;
        const GPU_DRIVER_VERSION = 1 << 6;
    }
}

impl LaunchSwitches {
    /// Any of these collapses the pipeline into one process.
    pub const IN_PROCESS: Self = Self::SINGLE_PROCESS
        .union(Self::IN_PROCESS_GPU)
        .union(Self::TEST_COMPOSITOR);

    /// Any of these marks a child process as the GPU process.
    pub const GPU_INFO: Self = Self::GPU_DEVICE_ID
        .union(Self::GPU_DRIVER_VENDOR)
        .union(Self::GPU_DRIVER_VERSION);

    /// Collects known switches from command-line arguments. Unknown
    /// arguments are ignored; values after `=` are not inspected.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut switches = Self::empty();
        for arg in args {
            let arg = arg.as_ref();
            let Some(name) = arg.strip_prefix("--") else {
                continue;
            };
            let name = name.split_once('=').map_or(name, |(name, _)| name);
            switches |= match name {
                "single-process" => Self::SINGLE_PROCESS,
                "in-process-gpu" => Self::IN_PROCESS_GPU,
                "test-compositor" => Self::TEST_COMPOSITOR,
                "type" => Self::PROCESS_TYPE,
                "gpu-device-id" => Self::GPU_DEVICE_ID,
                "gpu-driver-vendor" => Self::GPU_DRIVER_VENDOR,
                "gpu-driver-version" => Self::GPU_DRIVER_VERSION,
                _ => Self::empty(),
            };
        }
        debug!("Launch switches: {:?}", switches);
        switches
    }
}

/// The part of the graphics pipeline this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcessRole {
    /// Not resolved yet.
    #[default]
    Unresolved,
    /// Browser and GPU work share one process.
    SingleProcess,
    /// UI process of a multi-process launch. Owns no native connection.
    Browser,
    /// GPU process of a multi-process launch. Owns the native connection.
    Gpu,
}

impl ProcessRole {
    /// Maps launch switches to a role. Child processes that are not GPU
    /// processes resolve to `Browser` rather than failing.
    pub fn resolve(switches: LaunchSwitches) -> Self {
        if switches.intersects(LaunchSwitches::IN_PROCESS) {
            return ProcessRole::SingleProcess;
        }

        if !switches.contains(LaunchSwitches::PROCESS_TYPE) {
            return ProcessRole::Browser;
        }

        if switches.intersects(LaunchSwitches::GPU_INFO) {
            return ProcessRole::Gpu;
        }

        warn!(
            "Child process without GPU switches ({:?}); treating it as the browser process",
            switches
        );
        ProcessRole::Browser
    }

    /// Roles that hold a native display connection.
    pub fn owns_native_display(self) -> bool {
        matches!(self, ProcessRole::SingleProcess | ProcessRole::Gpu)
    }

    /// Roles that run an in-process dispatcher and own the display spec.
    pub fn owns_display_spec(self) -> bool {
        matches!(self, ProcessRole::SingleProcess | ProcessRole::Browser)
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProcessRole::Unresolved => "unresolved",
            ProcessRole::SingleProcess => "single-process",
            ProcessRole::Browser => "browser",
            ProcessRole::Gpu => "gpu",
        };
        f.write_str(name)
    }
}
