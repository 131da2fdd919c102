// src/display/drivers/x11.rs
#![allow(non_snake_case)] // Allow non-snake case for X11 types

//! Xlib-backed native display connection.
//!
//! The default screen is the primary output; its size tracks the root
//! window, which the server resizes when the output mode changes.
//! Realized widgets are simple top-level windows.

use crate::display::connection::{
    DisplayConnector, NativeDisplayConnection, OutputEvent, OutputId, RegistrationMode,
};
use crate::geometry::Rect;
use crate::widget::{RenderHandle, WidgetId};
use anyhow::{anyhow, bail, Result};
use libc::c_int;
use log::{debug, info, warn};
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;
use std::ptr;
use x11::xlib;

/// Owns the `*mut xlib::Display` and closes it on drop.
#[derive(Debug)]
struct ManagedDisplay {
    ptr: *mut xlib::Display,
}

impl ManagedDisplay {
    /// Opens the display named by `DISPLAY`.
    fn open() -> Result<Self> {
        let ptr = unsafe { xlib::XOpenDisplay(ptr::null()) };
        if ptr.is_null() {
            return Err(anyhow!(
                "Failed to open X display. Check DISPLAY environment variable or X server status."
            ));
        }
        debug!("X display opened: {:p}", ptr);
        Ok(Self { ptr })
    }

    #[inline]
    fn raw(&self) -> *mut xlib::Display {
        self.ptr
    }
}

impl Drop for ManagedDisplay {
    fn drop(&mut self) {
        info!("Closing X11 display connection: {:p}", self.ptr);
        let status = unsafe { xlib::XCloseDisplay(self.ptr) };
        if status != 0 {
            warn!("XCloseDisplay returned non-zero status: {}", status);
        }
    }
}

/// Opens Xlib connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct X11Connector;

impl DisplayConnector for X11Connector {
    fn connect(&self, mode: RegistrationMode) -> Result<Box<dyn NativeDisplayConnection>> {
        Ok(Box::new(X11Connection::open(mode)?))
    }
}

pub struct X11Connection {
    display: ManagedDisplay,
    screen: c_int,
    root: xlib::Window,
    mode: RegistrationMode,
    geometry: Rect,
    windows: Vec<xlib::Window>,
}

impl X11Connection {
    pub fn open(mode: RegistrationMode) -> Result<Self> {
        info!("Establishing X11 server connection ({:?}).", mode);
        let display = ManagedDisplay::open()?;
        let dpy = display.raw();

        let (screen, root, width, height) = unsafe {
            let screen = xlib::XDefaultScreen(dpy);
            let root = xlib::XRootWindow(dpy, screen);
            // Root resizes arrive as ConfigureNotify on the root window.
            xlib::XSelectInput(dpy, root, xlib::StructureNotifyMask);
            (
                screen,
                root,
                xlib::XDisplayWidth(dpy, screen),
                xlib::XDisplayHeight(dpy, screen),
            )
        };
        debug!("Default screen {} root {:#x} {}x{}", screen, root, width, height);

        Ok(Self {
            display,
            screen,
            root,
            mode,
            geometry: Rect::from_size(width.max(0) as u32, height.max(0) as u32),
            windows: Vec::new(),
        })
    }
}

impl NativeDisplayConnection for X11Connection {
    fn primary_output(&self) -> Option<OutputId> {
        Some(OutputId(self.screen as u32))
    }

    fn output_geometry(&self, output: OutputId) -> Option<Rect> {
        (output == OutputId(self.screen as u32) && !self.geometry.is_empty())
            .then_some(self.geometry)
    }

    fn display_fd(&self) -> Option<RawFd> {
        Some(unsafe { xlib::XConnectionNumber(self.display.raw()) })
    }

    fn roundtrip(&mut self) -> Result<()> {
        unsafe {
            xlib::XSync(self.display.raw(), xlib::False);
        }
        self.dispatch_pending().map(|_| ())
    }

    fn dispatch_pending(&mut self) -> Result<Vec<OutputEvent>> {
        let dpy = self.display.raw();
        let mut events = Vec::new();
        while unsafe { xlib::XPending(dpy) } > 0 {
            let mut event = MaybeUninit::<xlib::XEvent>::uninit();
            let event = unsafe {
                xlib::XNextEvent(dpy, event.as_mut_ptr());
                event.assume_init()
            };
            if event.get_type() != xlib::ConfigureNotify {
                continue;
            }
            let configure = xlib::XConfigureEvent::from(event);
            if configure.window != self.root {
                continue;
            }
            let geometry = Rect::from_size(configure.width.max(0) as u32, configure.height.max(0) as u32);
            if geometry != self.geometry {
                self.geometry = geometry;
                events.push(OutputEvent {
                    output: OutputId(self.screen as u32),
                    width: geometry.width,
                    height: geometry.height,
                });
            }
        }
        Ok(events)
    }

    fn create_surface(&mut self, widget: WidgetId, bounds: Rect) -> Result<RenderHandle> {
        if self.mode == RegistrationMode::RegisterOutputOnly {
            bail!("output-only X11 connection cannot create windows");
        }
        let dpy = self.display.raw();
        let window = unsafe {
            let window = xlib::XCreateSimpleWindow(
                dpy,
                self.root,
                bounds.x,
                bounds.y,
                bounds.width.max(1),
                bounds.height.max(1),
                0,
                xlib::XBlackPixel(dpy, self.screen),
                xlib::XBlackPixel(dpy, self.screen),
            );
            xlib::XMapWindow(dpy, window);
            xlib::XFlush(dpy);
            window
        };
        let handle = RenderHandle::new(window as u64)
            .ok_or_else(|| anyhow!("XCreateSimpleWindow failed for widget {}", widget))?;
        debug!("Widget {} realized as X window {:#x}", widget, window);
        self.windows.push(window);
        Ok(handle)
    }
}

impl Drop for X11Connection {
    fn drop(&mut self) {
        let dpy = self.display.raw();
        for window in self.windows.drain(..) {
            unsafe {
                xlib::XDestroyWindow(dpy, window);
            }
        }
        // ManagedDisplay closes the connection.
    }
}
