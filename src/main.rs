// src/main.rs

use display_controller::{
    channel::{NoChannel, OneShotConnector, StreamTransport},
    config::{Config, CONFIG},
    display::{drivers::HeadlessServer, DisplayConnector, OutputId},
    geometry::Rect,
    widget::WidgetStateKind,
    DisplayController, LaunchSwitches, ProcessRole,
};

use anyhow::{bail, Context};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PUMP_INTERVAL: Duration = Duration::from_millis(5);
const CHANNEL_SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Native connector for this run. Xlib when built with the `x11` feature
/// and a display is available, the scripted headless server otherwise.
fn display_connector(server: &HeadlessServer) -> Box<dyn DisplayConnector + Send> {
    #[cfg(feature = "x11")]
    if std::env::var_os("DISPLAY").is_some() {
        info!("Using the X11 display connection.");
        return Box::new(display_controller::display::drivers::X11Connector);
    }
    info!("Using the headless display server.");
    Box::new(server.connector())
}

/// Drives a controller until `done` returns true or the timeout passes.
fn pump_until(
    controller: &mut DisplayController,
    timeout: Duration,
    mut done: impl FnMut(&DisplayController) -> bool,
) -> anyhow::Result<bool> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        controller.pump()?;
        if done(controller) {
            return Ok(true);
        }
        thread::sleep(PUMP_INTERVAL);
    }
    Ok(false)
}

fn run_single_process(config: Config, switches: LaunchSwitches, server: &HeadlessServer) -> anyhow::Result<()> {
    let mut controller =
        DisplayController::new(config, switches, display_connector(server), Box::new(NoChannel));
    let hardware = controller.initialize_hardware();
    info!("Hardware: {:?}", hardware);

    let widget = controller.acquire_widget()?;
    let handle = controller.realize_widget(widget)?;
    info!("Widget {} realized as {:?}", widget, handle);
    controller.attempt_resize(widget, Rect::from_size(1280, 720))?;
    controller.dispatch_widget_state(widget, WidgetStateKind::Maximize, 0, 0)?;

    controller.pump()?;
    info!("Display spec: {}", controller.current_display_spec()?);

    server.set_output_size(OutputId::PRIMARY, 2560, 1440);
    pump_until(&mut controller, Duration::from_secs(1), |c| {
        c.current_display_spec().is_ok_and(|spec| spec.starts_with("2560x"))
    })?;
    info!("Display spec after mode change: {}", controller.current_display_spec()?);
    info!("Desktop screen: {}", controller.desktop_screen()?.geometry());

    controller.terminate();
    Ok(())
}

/// Runs the browser controller on this thread and the GPU controller on a
/// second one, joined by a socket pair.
fn run_split_pipeline(config: Config, server: &HeadlessServer) -> anyhow::Result<()> {
    let (browser_end, gpu_end) = StreamTransport::pair()?;
    let stop = Arc::new(AtomicBool::new(false));

    let gpu_config = config.clone();
    let gpu_connector = display_connector(server);
    let gpu_stop = Arc::clone(&stop);
    let gpu_thread = thread::Builder::new()
        .name("gpu-process".to_string())
        .spawn(move || -> anyhow::Result<()> {
            let mut gpu = DisplayController::new(
                gpu_config,
                LaunchSwitches::PROCESS_TYPE | LaunchSwitches::GPU_DEVICE_ID,
                gpu_connector,
                Box::new(OneShotConnector::new(gpu_end)),
            );
            info!("GPU hardware: {:?}", gpu.initialize_hardware());
            while !gpu_stop.load(Ordering::Acquire) {
                gpu.pump()?;
                thread::sleep(PUMP_INTERVAL);
            }
            info!("GPU process owns {} widget(s) at shutdown", gpu.local_widget_count());
            gpu.terminate();
            Ok(())
        })
        .context("Failed to spawn GPU process thread")?;

    let mut browser = DisplayController::new(
        config,
        LaunchSwitches::empty(),
        display_connector(server),
        Box::new(OneShotConnector::new(browser_end)),
    );
    browser.initialize_hardware();

    let widget = browser.acquire_widget()?;
    if browser.realize_widget(widget)?.is_some() {
        warn!("Browser realized {} before the channel was up", widget);
    }
    if !pump_until(&mut browser, CHANNEL_SETUP_TIMEOUT, |c| c.state().is_connected())? {
        stop.store(true, Ordering::Release);
        bail!("GPU process never registered");
    }
    info!("Channel up: {:?}", browser.state());

    browser.attempt_resize(widget, Rect::from_size(1024, 768))?;
    pump_until(&mut browser, CHANNEL_SETUP_TIMEOUT, |c| {
        c.confirmed_widget_state(widget)
            .is_some_and(|confirmed| confirmed.state == WidgetStateKind::Resize)
    })?;
    info!("GPU confirmed {:?}", browser.confirmed_widget_state(widget));

    pump_until(&mut browser, CHANNEL_SETUP_TIMEOUT, |c| c.current_display_spec().is_ok())?;
    match browser.current_display_spec() {
        Ok(spec) => info!("Display spec reported by the GPU process: {}", spec),
        Err(e) => warn!("{}", e),
    }

    browser.terminate();
    stop.store(true, Ordering::Release);
    match gpu_thread.join() {
        Ok(result) => result,
        Err(_) => bail!("GPU process thread panicked"),
    }
}

/// Main entry point for the `display-controller` demo.
fn main() -> anyhow::Result<()> {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting display-controller...");
    let config = CONFIG.clone();
    let switches = LaunchSwitches::from_args(std::env::args().skip(1));
    let server = HeadlessServer::with_primary_output(1920, 1080);

    match ProcessRole::resolve(switches) {
        ProcessRole::SingleProcess => run_single_process(config, switches, &server)?,
        role => {
            info!("Launched as {}; running the browser and GPU roles side by side", role);
            run_split_pipeline(config, &server)?;
        }
    }

    info!("display-controller exited successfully.");
    Ok(())
}
