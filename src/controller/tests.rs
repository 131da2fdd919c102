// src/controller/tests.rs

use super::*;
use crate::channel::{ChannelTransport, MemoryTransport, NoChannel, OneShotConnector};
use crate::config::ProbeConfig;
use crate::display::drivers::HeadlessServer;
use anyhow::Result;
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

const GPU_SWITCHES: LaunchSwitches = LaunchSwitches::PROCESS_TYPE.union(LaunchSwitches::GPU_DEVICE_ID);

fn single_process(server: &HeadlessServer) -> DisplayController {
    DisplayController::new(
        Config::default(),
        LaunchSwitches::SINGLE_PROCESS,
        Box::new(server.connector()),
        Box::new(NoChannel),
    )
}

/// A GPU-role controller plus the browser's end of its channel.
fn gpu(server: &HeadlessServer) -> (DisplayController, MemoryTransport) {
    let (device_side, host_side) = MemoryTransport::pair();
    let controller = DisplayController::new(
        Config::default(),
        GPU_SWITCHES,
        Box::new(server.connector()),
        Box::new(OneShotConnector::new(device_side)),
    );
    (controller, host_side)
}

/// A browser-role controller plus the GPU's end of its channel.
fn browser(server: &HeadlessServer, config: Config) -> (DisplayController, MemoryTransport) {
    let (host_side, device_side) = MemoryTransport::pair();
    let controller = DisplayController::new(
        config,
        LaunchSwitches::empty(),
        Box::new(server.connector()),
        Box::new(OneShotConnector::new(host_side)),
    );
    (controller, device_side)
}

fn drain(peer: &mut MemoryTransport) -> Vec<ChannelMessage> {
    let mut messages = Vec::new();
    while let Ok(Received::Message(message)) = peer.try_recv() {
        messages.push(message);
    }
    messages
}

fn fast_probe(timeout_ms: u64) -> Config {
    Config {
        probe: ProbeConfig {
            timeout_ms,
            retry_interval_ms: 1,
        },
        ..Config::default()
    }
}

// --- Initialization and termination ---

#[test_log::test]
fn initialize_twice_has_no_extra_effects_in_single_process() {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);

    let first = controller.initialize_hardware();
    let second = controller.initialize_hardware();
    assert_eq!(first, HardwareState::Ready);
    assert_eq!(first, second);
    assert_eq!(server.connections_opened(), 1);
    assert_eq!(controller.role(), ProcessRole::SingleProcess);
    assert!(controller.native_display().is_some());
}

#[test_log::test]
fn initialize_twice_has_no_extra_effects_in_gpu_and_browser() {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let (mut gpu, _host) = gpu(&server);
    assert_eq!(gpu.initialize_hardware(), gpu.initialize_hardware());
    assert_eq!(server.connections_opened(), 1);

    let connects = Rc::new(Cell::new(0));
    let counted = Rc::clone(&connects);
    let mut browser = DisplayController::new(
        Config::default(),
        LaunchSwitches::empty(),
        Box::new(server.connector()),
        Box::new(move |_role: ProcessRole| -> anyhow::Result<Box<dyn ChannelTransport>> {
            counted.set(counted.get() + 1);
            Ok(Box::new(MemoryTransport::pair().0))
        }),
    );
    assert_eq!(browser.initialize_hardware(), HardwareState::Ready);
    assert_eq!(browser.initialize_hardware(), HardwareState::Ready);
    assert_eq!(connects.get(), 1);
    assert!(browser.native_display().is_none());
    // The browser never opens a native connection.
    assert_eq!(server.connections_opened(), 1);
}

#[test_log::test]
fn unreachable_display_is_a_non_fatal_failure() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    server.set_reachable(false);
    let mut controller = single_process(&server);

    assert_eq!(controller.initialize_hardware(), HardwareState::Failed);
    assert!(controller.state().is_initialized());

    let id = controller.acquire_widget()?;
    assert_eq!(controller.widget(id).map(Widget::kind), Some(WidgetKind::Headless));
    assert!(controller.realize_widget(id)?.is_some());
    Ok(())
}

#[test_log::test]
fn gpu_without_a_display_owns_headless_widgets() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    server.set_reachable(false);
    let (mut controller, _host_side) = gpu(&server);

    assert_eq!(controller.initialize_hardware(), HardwareState::Failed);
    let id = controller.acquire_widget()?;
    assert_eq!(controller.widget(id).map(Widget::kind), Some(WidgetKind::Headless));
    Ok(())
}

#[test_log::test]
fn connected_single_process_owns_top_level_widgets() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);
    assert_eq!(controller.initialize_hardware(), HardwareState::Ready);
    let id = controller.acquire_widget()?;
    assert_eq!(controller.widget(id).map(Widget::kind), Some(WidgetKind::TopLevel));
    Ok(())
}

#[test_log::test]
fn terminate_is_a_no_op_when_uninitialized_or_repeated() {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);
    controller.terminate();
    assert_eq!(controller.state(), ControllerState::Terminated);
    assert_eq!(server.connections_opened(), 0);

    controller.initialize_hardware();
    controller.terminate();
    controller.terminate();
    assert_eq!(controller.state(), ControllerState::Terminated);
    assert_eq!(controller.hardware_state(), None);
    assert!(controller.native_display().is_none());
}

#[test_log::test]
fn reinitialization_keeps_the_role_and_fresh_ids() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);

    let first = controller.acquire_widget()?;
    controller.terminate();
    assert_eq!(controller.local_widget_count(), 0);

    let second = controller.acquire_widget()?;
    assert_ne!(first, second);
    assert_eq!(controller.role(), ProcessRole::SingleProcess);
    assert_eq!(server.connections_opened(), 2);
    Ok(())
}

#[test_log::test]
fn child_without_gpu_switches_becomes_browser() {
    let server = HeadlessServer::new();
    let mut controller = DisplayController::new(
        Config::default(),
        LaunchSwitches::PROCESS_TYPE,
        Box::new(server.connector()),
        Box::new(NoChannel),
    );
    controller.initialize_hardware();
    assert_eq!(controller.role(), ProcessRole::Browser);
    // No channel: widgets fall back to headless local ones.
    assert!(!controller.is_proxying_widgets());
}

// --- Widgets ---

#[test_log::test]
fn single_process_realizes_immediately() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);

    let id = controller.acquire_widget()?;
    let handle = controller.realize_widget(id)?.expect("no channel gate");
    assert_eq!(controller.realize_widget(id)?, Some(handle));
    assert_eq!(server.surfaces_created(), 1);
    assert!(matches!(
        controller.realize_widget(WidgetId(999)),
        Err(ControllerError::UnknownWidget(WidgetId(999)))
    ));
    Ok(())
}

#[test_log::test]
fn single_process_resize_is_synchronous() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);
    let id = controller.acquire_widget()?;

    assert!(controller.attempt_resize(id, Rect::new(0, 0, 640, 480))?);
    assert_eq!(controller.widget(id).map(Widget::bounds), Some(Rect::from_size(640, 480)));

    // The widget's own answer comes back: empty bounds are refused.
    assert!(!controller.attempt_resize(id, Rect::from_size(0, 0))?);
    assert_eq!(controller.widget(id).map(Widget::bounds), Some(Rect::from_size(640, 480)));

    let handle = controller.realize_widget(id)?.expect("realized");
    assert!(controller.attempt_resize(handle, Rect::from_size(800, 600))?);
    assert_eq!(controller.widget(id).map(Widget::bounds), Some(Rect::from_size(800, 600)));
    Ok(())
}

#[test_log::test]
fn full_screen_is_reported_and_mutates_nothing() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);
    let id = controller.acquire_widget()?;
    controller.attempt_resize(id, Rect::from_size(300, 200))?;

    let err = controller
        .dispatch_widget_state(id, WidgetStateKind::FullScreen, 1280, 720)
        .unwrap_err();
    assert!(err.is_not_implemented());
    let widget = controller.widget(id).expect("widget exists");
    assert_eq!(widget.bounds(), Rect::from_size(300, 200));
    assert_eq!(widget.visual_state(), crate::widget::VisualState::Normal);
    Ok(())
}

#[test_log::test]
fn dispatch_create_uses_the_given_id() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);
    controller.dispatch_widget_state(WidgetId(7), WidgetStateKind::Create, 0, 0)?;
    controller.dispatch_widget_state(WidgetId(7), WidgetStateKind::Resize, 400, 300)?;
    controller.dispatch_widget_state(WidgetId(7), WidgetStateKind::Maximize, 0, 0)?;

    let widget = controller.widget(WidgetId(7)).expect("created");
    assert_eq!(widget.bounds(), Rect::from_size(400, 300));
    assert_eq!(widget.visual_state(), crate::widget::VisualState::Maximized);
    Ok(())
}

// --- Channel gating ---

#[test_log::test]
fn gpu_realize_waits_for_the_channel() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let (mut controller, mut host) = gpu(&server);
    let id = controller.acquire_widget()?;

    assert_eq!(controller.realize_widget(id)?, None);
    assert_eq!(controller.realize_widget(id)?, None);
    let registers = drain(&mut host)
        .into_iter()
        .filter(|m| matches!(m, ChannelMessage::Register { .. }))
        .count();
    assert_eq!(registers, 2);

    host.send(ChannelMessage::Established { peer_id: 11 })?;
    controller.pump()?;
    assert_eq!(controller.state().peer_id(), Some(11));

    assert!(controller.realize_widget(id)?.is_some());
    assert_eq!(server.surfaces_created(), 1);
    Ok(())
}

#[test_log::test]
fn browser_realize_establishes_then_proxies() -> Result<()> {
    let server = HeadlessServer::new();
    let (mut controller, mut device) = browser(&server, Config::default());
    let id = controller.acquire_widget()?;

    assert_eq!(controller.realize_widget(id)?, None);
    assert!(drain(&mut device).contains(&ChannelMessage::Establish));

    device.send(ChannelMessage::Register {
        peer_id: 22,
        display_fd: Some(5),
    })?;
    controller.pump()?;
    assert!(controller.state().is_connected());

    // Acknowledgement first, then the Create queued before the channel was up.
    assert_eq!(
        drain(&mut device),
        vec![
            ChannelMessage::Established {
                peer_id: std::process::id()
            },
            ChannelMessage::WidgetState {
                widget: id,
                state: WidgetStateKind::Create,
                width: 0,
                height: 0
            },
        ]
    );

    // Past the gate the browser has no local widget to hand out.
    assert!(matches!(
        controller.realize_widget(id),
        Err(ControllerError::UnknownWidget(_))
    ));
    Ok(())
}

#[test_log::test]
fn browser_resize_never_touches_local_widgets() -> Result<()> {
    let server = HeadlessServer::new();
    let (mut controller, mut device) = browser(&server, Config::default());
    controller.initialize_hardware();
    device.send(ChannelMessage::Register {
        peer_id: 22,
        display_fd: None,
    })?;
    controller.pump()?;
    drain(&mut device);

    assert!(controller.attempt_resize(WidgetId(7), Rect::from_size(1024, 768))?);
    assert_eq!(controller.local_widget_count(), 0);
    assert!(controller.widget(WidgetId(7)).is_none());
    assert_eq!(
        drain(&mut device),
        vec![ChannelMessage::WidgetState {
            widget: WidgetId(7),
            state: WidgetStateKind::Resize,
            width: 1024,
            height: 768
        }]
    );

    device.send(ChannelMessage::WidgetState {
        widget: WidgetId(7),
        state: WidgetStateKind::Resize,
        width: 1024,
        height: 768,
    })?;
    controller.pump()?;
    let confirmed = controller.confirmed_widget_state(WidgetId(7)).expect("confirmed");
    assert_eq!((confirmed.width, confirmed.height), (1024, 768));
    Ok(())
}

#[test_log::test]
fn browser_queues_while_closed_and_flushes_on_reregister() -> Result<()> {
    let server = HeadlessServer::new();
    let (mut controller, mut device) = browser(&server, Config::default());
    controller.initialize_hardware();
    device.send(ChannelMessage::Register {
        peer_id: 22,
        display_fd: None,
    })?;
    controller.pump()?;

    device.send(ChannelMessage::Closed)?;
    controller.pump()?;
    assert!(!controller.state().is_connected());
    drain(&mut device);

    controller.dispatch_widget_state(WidgetId(3), WidgetStateKind::Minimize, 0, 0)?;
    assert_eq!(controller.queued_channel_messages(), 1);
    assert!(drain(&mut device).is_empty());

    device.send(ChannelMessage::Register {
        peer_id: 23,
        display_fd: None,
    })?;
    controller.pump()?;
    assert_eq!(controller.state().peer_id(), Some(23));
    assert_eq!(controller.queued_channel_messages(), 0);
    assert_eq!(drain(&mut device).len(), 2);
    Ok(())
}

#[test_log::test]
fn peer_destroyed_falls_back_to_headless_until_reconnected() -> Result<()> {
    let server = HeadlessServer::new();
    let (first_host, first_device) = MemoryTransport::pair();
    let (second_host, mut second_device) = MemoryTransport::pair();
    let mut transports = vec![second_host, first_host];
    let mut controller = DisplayController::new(
        Config::default(),
        LaunchSwitches::empty(),
        Box::new(server.connector()),
        Box::new(move |_role: ProcessRole| -> anyhow::Result<Box<dyn ChannelTransport>> {
            let transport = transports
                .pop()
                .ok_or_else(|| anyhow::anyhow!("no more transports"))?;
            Ok(Box::new(transport))
        }),
    );
    controller.initialize_hardware();
    assert!(controller.is_proxying_widgets());

    drop(first_device);
    controller.pump()?;
    assert!(!controller.is_proxying_widgets());

    let id = controller.acquire_widget()?;
    assert_eq!(controller.local_widget_count(), 1);
    assert!(controller.realize_widget(id)?.is_some());

    controller.reconnect_channel()?;
    assert!(controller.is_proxying_widgets());
    controller.dispatch_widget_state(WidgetId(4), WidgetStateKind::Restore, 0, 0)?;
    second_device.send(ChannelMessage::Register {
        peer_id: 30,
        display_fd: None,
    })?;
    controller.pump()?;
    assert_eq!(drain(&mut second_device).len(), 2);
    Ok(())
}

#[test_log::test]
fn gpu_applies_browser_commands_and_confirms() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let (mut controller, mut host) = gpu(&server);
    controller.initialize_hardware();
    host.send(ChannelMessage::Established { peer_id: 1 })?;
    controller.pump()?;
    drain(&mut host);

    for (state, width, height) in [
        (WidgetStateKind::Create, 0, 0),
        (WidgetStateKind::Resize, 500, 400),
        (WidgetStateKind::FullScreen, 0, 0),
    ] {
        host.send(ChannelMessage::WidgetState {
            widget: WidgetId(7),
            state,
            width,
            height,
        })?;
    }
    controller.pump()?;

    assert_eq!(controller.widget(WidgetId(7)).map(Widget::bounds), Some(Rect::from_size(500, 400)));
    // FullScreen is not confirmed.
    let confirmations: Vec<_> = drain(&mut host)
        .into_iter()
        .filter_map(|m| match m {
            ChannelMessage::WidgetState { widget, state, width, height } => {
                Some((widget, state, width, height))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        confirmations,
        vec![
            (WidgetId(7), WidgetStateKind::Create, 0, 0),
            (WidgetId(7), WidgetStateKind::Resize, 500, 400),
        ]
    );
    Ok(())
}

// --- Output geometry ---

#[test_log::test]
fn single_process_local_size_updates_spec_and_screen() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);
    controller.initialize_hardware();
    assert!(matches!(
        controller.current_display_spec(),
        Err(ControllerError::DisplaySpecUnknown)
    ));

    assert_eq!(controller.desktop_screen()?.geometry(), Rect::from_size(1280, 720));
    controller.on_output_size_changed_local(1920, 1080);
    assert_eq!(controller.current_display_spec()?, "1920x1080*2");
    assert_eq!(controller.desktop_screen()?.geometry(), Rect::new(0, 0, 1920, 1080));
    Ok(())
}

#[test_log::test]
fn first_pump_reports_the_initial_geometry() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);
    controller.initialize_hardware();
    controller.pump()?;
    assert_eq!(controller.current_display_spec()?, "1280x720*2");

    server.set_output_size(OutputId::PRIMARY, 2560, 1440);
    controller.pump()?;
    assert_eq!(controller.current_display_spec()?, "2560x1440*2");
    Ok(())
}

#[test_log::test]
fn non_primary_output_is_rejected_without_changes() {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let secondary = server.add_output(1024, 768);
    let mut controller = single_process(&server);
    controller.initialize_hardware();

    let err = controller
        .on_output_size_changed(secondary, 1024, 768)
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::NotImplemented(Unimplemented::MultipleOutputs)
    ));
    assert!(controller.current_display_spec().is_err());
}

#[test_log::test]
fn output_changes_before_initialization_are_ignored() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);
    controller.on_output_size_changed(OutputId::PRIMARY, 800, 600)?;
    assert_eq!(controller.state(), ControllerState::Terminated);
    Ok(())
}

#[test_log::test]
fn gpu_rejects_non_primary_output_before_the_channel_is_up() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let secondary = server.add_output(1024, 768);
    let (mut controller, mut host) = gpu(&server);
    controller.initialize_hardware();
    // The initial geometry report is held for the browser.
    controller.pump()?;
    let held = controller.device.as_ref().and_then(DeviceEndpoint::pending_output);
    assert_eq!(held, Some((1280, 720)));

    let err = controller
        .on_output_size_changed(secondary, 1024, 768)
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::NotImplemented(Unimplemented::MultipleOutputs)
    ));
    assert_eq!(
        controller.device.as_ref().and_then(DeviceEndpoint::pending_output),
        held
    );
    assert!(drain(&mut host).is_empty());

    host.send(ChannelMessage::Establish)?;
    host.send(ChannelMessage::Established { peer_id: 1 })?;
    controller.pump()?;
    let sizes: Vec<_> = drain(&mut host)
        .into_iter()
        .filter(|m| matches!(m, ChannelMessage::OutputSizeChanged { .. }))
        .collect();
    assert_eq!(
        sizes,
        vec![ChannelMessage::OutputSizeChanged {
            width: 1280,
            height: 720
        }]
    );
    Ok(())
}

#[test_log::test]
fn connected_gpu_sends_nothing_for_non_primary_output() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let secondary = server.add_output(1024, 768);
    let (mut controller, mut host) = gpu(&server);
    controller.initialize_hardware();
    host.send(ChannelMessage::Establish)?;
    host.send(ChannelMessage::Established { peer_id: 1 })?;
    controller.pump()?;
    assert!(controller.state().is_connected());
    drain(&mut host);

    let err = controller
        .on_output_size_changed(secondary, 1024, 768)
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::NotImplemented(Unimplemented::MultipleOutputs)
    ));
    assert!(drain(&mut host).is_empty());
    assert_eq!(
        controller.device.as_ref().and_then(DeviceEndpoint::pending_output),
        None
    );
    Ok(())
}

#[test_log::test]
fn browser_rejects_non_primary_output() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let secondary = server.add_output(1024, 768);
    let (mut controller, mut device) = browser(&server, Config::default());
    controller.initialize_hardware();

    let err = controller
        .on_output_size_changed(secondary, 1024, 768)
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::NotImplemented(Unimplemented::MultipleOutputs)
    ));
    assert!(controller.current_display_spec().is_err());
    assert!(drain(&mut device).is_empty());
    Ok(())
}

#[test_log::test]
fn gpu_holds_output_size_until_connected() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let (mut controller, mut host) = gpu(&server);
    controller.initialize_hardware();
    assert!(controller.is_dispatcher_polling());
    // Consumes the initial geometry report.
    controller.pump()?;

    controller.on_output_size_changed(OutputId::PRIMARY, 1920, 1080)?;
    assert!(drain(&mut host).is_empty());

    host.send(ChannelMessage::Establish)?;
    controller.pump()?;
    assert!(matches!(
        drain(&mut host).as_slice(),
        [ChannelMessage::Register { .. }]
    ));

    host.send(ChannelMessage::Established { peer_id: 1 })?;
    controller.pump()?;
    assert_eq!(
        drain(&mut host),
        vec![ChannelMessage::OutputSizeChanged {
            width: 1920,
            height: 1080
        }]
    );

    controller.on_output_size_changed(OutputId::PRIMARY, 800, 600)?;
    assert_eq!(
        drain(&mut host),
        vec![ChannelMessage::OutputSizeChanged {
            width: 800,
            height: 600
        }]
    );
    Ok(())
}

#[test_log::test]
fn gpu_forwards_server_changes_through_the_poll_thread() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let (mut controller, mut host) = gpu(&server);
    controller.initialize_hardware();
    host.send(ChannelMessage::Established { peer_id: 1 })?;
    controller.pump()?;
    drain(&mut host);

    server.set_output_size(OutputId::PRIMARY, 3840, 2160);
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut forwarded = Vec::new();
    while forwarded.is_empty() && Instant::now() < deadline {
        controller.pump()?;
        forwarded = drain(&mut host);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(
        forwarded,
        vec![ChannelMessage::OutputSizeChanged {
            width: 3840,
            height: 2160
        }]
    );

    controller.on_event_loop_destroyed();
    assert!(!controller.is_dispatcher_polling());
    Ok(())
}

#[test_log::test]
fn browser_applies_forwarded_output_size() -> Result<()> {
    let server = HeadlessServer::new();
    let (mut controller, mut device) = browser(&server, Config::default());
    controller.initialize_hardware();
    device.send(ChannelMessage::OutputSizeChanged {
        width: 1920,
        height: 1080,
    })?;
    controller.pump()?;
    assert_eq!(controller.current_display_spec()?, "1920x1080*2");
    Ok(())
}

// --- Look-ahead probe ---

#[test_log::test]
fn browser_probe_learns_the_primary_output() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1600, 900);
    server.announce_after_roundtrips(3);
    let (mut controller, _device) = browser(&server, fast_probe(2_000));
    controller.initialize_hardware();

    assert_eq!(controller.desktop_screen()?.geometry(), Rect::from_size(1600, 900));
    // The throwaway connection is the only one the browser opened.
    assert_eq!(server.connections_opened(), 1);
    Ok(())
}

#[test_log::test]
fn probe_times_out_but_the_screen_survives() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1600, 900);
    server.announce_after_roundtrips(usize::MAX);
    let (mut controller, _device) = browser(&server, fast_probe(20));
    controller.initialize_hardware();

    assert!(matches!(
        controller.desktop_screen(),
        Err(ControllerError::ProbeTimedOut(_))
    ));
    assert!(controller.desktop_screen()?.geometry().is_empty());

    controller.on_output_size_changed_local(1600, 900);
    assert_eq!(controller.desktop_screen()?.geometry(), Rect::from_size(1600, 900));
    Ok(())
}

#[test_log::test]
fn probe_can_be_cancelled() {
    let server = HeadlessServer::with_primary_output(1600, 900);
    server.announce_after_roundtrips(usize::MAX);
    let (mut controller, _device) = browser(&server, fast_probe(60_000));
    controller.initialize_hardware();

    let cancel = controller.probe_cancel_handle();
    cancel.cancel();
    assert!(matches!(
        controller.desktop_screen(),
        Err(ControllerError::ProbeCancelled)
    ));
    assert!(!cancel.is_cancelled());
}

#[test_log::test]
fn probe_stops_when_cancelled_from_another_thread() {
    let server = HeadlessServer::with_primary_output(1600, 900);
    server.announce_after_roundtrips(usize::MAX);
    let cancel = ProbeCancel::new();
    let remote = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        remote.cancel();
    });

    let started = Instant::now();
    let result = look_ahead_output_geometry(
        &server.connector(),
        &ProbeConfig {
            timeout_ms: 60_000,
            retry_interval_ms: 1,
        },
        &cancel,
    );
    assert!(matches!(result, Err(ControllerError::ProbeCancelled)));
    assert!(started.elapsed() < Duration::from_secs(30));
    canceller.join().expect("canceller thread");
}

#[test_log::test]
fn acquire_fails_once_widget_ids_run_out() -> Result<()> {
    let server = HeadlessServer::with_primary_output(1280, 720);
    let mut controller = single_process(&server);
    controller.initialize_hardware();
    controller.widget_ids = WidgetIdAllocator::resuming_after(u32::MAX - 1);

    let last = controller.acquire_widget()?;
    assert_eq!(last, WidgetId(u32::MAX));
    let err = controller.acquire_widget().unwrap_err();
    assert!(matches!(err, ControllerError::WidgetIdsExhausted));
    assert_eq!(controller.local_widget_count(), 1);
    Ok(())
}

#[test_log::test]
fn browser_reports_commands_refused_by_a_full_queue() -> Result<()> {
    let server = HeadlessServer::new();
    let config = Config {
        channel: crate::config::ChannelConfig {
            max_queued_messages: 1,
        },
        ..Config::default()
    };
    let (mut controller, _device) = browser(&server, config);
    controller.initialize_hardware();

    controller.acquire_widget()?;
    let err = controller.acquire_widget().unwrap_err();
    assert!(matches!(err, ControllerError::Channel(_)));
    assert_eq!(controller.queued_channel_messages(), 1);
    Ok(())
}
