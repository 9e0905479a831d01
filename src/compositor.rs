//! Core compositor implementation
//!
//! [`Compositor`] owns the protocol engine, the client, surface, seat and
//! output registries, the buffer integrations and the listening sockets. It
//! does not own an event loop: the host loop drives it through
//! [`Compositor::process_wayland_events`] and [`Compositor::about_to_block`].
//!
//! Startup is two-phase. [`Compositor::pre_init`] makes sure a seat exists,
//! [`Compositor::init`] binds the socket, registers globals, loads buffer
//! integrations and starts the seats. After that the compositor is created
//! and stays so until it is dropped.

use log::{debug, info, warn};
use std::collections::VecDeque;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use wayland_server::backend::{ClientId, DisconnectReason, GlobalId};
use wayland_server::protocol::wl_surface::WlSurface;
use wayland_server::{Display, DisplayHandle};

use crate::buffer::{
    BufferIntegrations, ClientBuffer, ClientBufferIntegration, HardwareIntegration, IntegrationFactory,
    IntegrationPreferences, ServerBufferIntegration, ShmFormat,
};
use crate::client::{ClientInfo, ClientRegistry, WindowManagerExtension};
use crate::config::{HarborConfig, OutputConfig};
use crate::error::{CompositorError, Result};
use crate::event_loop::{CalloopHost, HostLoop, ReadyCallback, WatchId};
use crate::grab::{self, SurfaceGrabber};
use crate::input::{
    ApplicationState, DefaultDeviceFactory, DeviceFactory, InputEvent, KeyEvent, ResolvedKeyEvent, Seat, SeatId,
    SeatList,
};
use crate::output::{Output, OutputId, OutputList, WindowId};
use crate::protocol;
use crate::selection::{MimeData, SelectionState};
use crate::serial::{CompositorClock, SerialCounter};
use crate::signal::Signal;
use crate::socket::{fatal_socket_error, resolve_socket_name, SocketManager};
use crate::surface::{
    DefaultSurfaceFactory, Surface, SurfaceFactory, SurfaceId, SurfaceRegistry, SurfaceRequest,
};

/// Startup progress; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    Constructed,
    PreInitialized,
    Created,
}

/// A subsurface gained or lost its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsurfaceChange {
    pub child: SurfaceId,
    pub parent: Option<SurfaceId>,
}

/// Notifications raised by the compositor
#[derive(Debug, Default)]
pub struct CompositorSignals {
    pub socket_name_changed: Signal<String>,
    pub created: Signal<()>,
    /// Handlers may bind their own implementation with [`SurfaceRequest::bind`]
    pub surface_requested: Signal<SurfaceRequest>,
    pub surface_created: Signal<SurfaceId>,
    pub surface_about_to_be_destroyed: Signal<SurfaceId>,
    pub subsurface_changed: Signal<SubsurfaceChange>,
    pub output_added: Signal<OutputId>,
    pub output_removed: Signal<OutputId>,
    /// Carries the new default output, `None` once the list is empty
    pub default_output_changed: Signal<Option<OutputId>>,
    pub retained_selection_changed: Signal<bool>,
    pub retained_selection_received: Signal<MimeData>,
    pub additional_shm_formats_changed: Signal<Vec<ShmFormat>>,
    pub use_hardware_integration_extension_changed: Signal<bool>,
    pub client_connected: Signal<ClientId>,
    pub client_disconnected: Signal<ClientId>,
    /// Every key event after keymap resolution, repeats included
    pub key_event: Signal<ResolvedKeyEvent>,
}

/// State reachable from protocol dispatch
pub struct CompositorState {
    pub(crate) display: DisplayHandle,
    pub(crate) signals: CompositorSignals,
    pub(crate) clients: ClientRegistry,
    pub(crate) surfaces: SurfaceRegistry,
    pub(crate) seats: SeatList,
    pub(crate) outputs: OutputList,
    pub(crate) buffers: BufferIntegrations,
    pub(crate) hardware_integration: Option<HardwareIntegration>,
    pub(crate) serials: SerialCounter,
    pub(crate) clock: CompositorClock,
    pub(crate) surface_factory: Box<dyn SurfaceFactory>,
    pub(crate) device_factory: Box<dyn DeviceFactory>,
    pub(crate) window_manager: Option<Box<dyn WindowManagerExtension>>,
    pub(crate) additional_shm_formats: Vec<ShmFormat>,
    pub(crate) use_hardware_integration_extension: bool,
    pub(crate) selection: SelectionState,
}

impl CompositorState {
    fn new(display: DisplayHandle, config: &HarborConfig) -> Self {
        Self {
            display,
            signals: CompositorSignals::default(),
            clients: ClientRegistry::new(),
            surfaces: SurfaceRegistry::new(),
            seats: SeatList::new(),
            outputs: OutputList::new(),
            buffers: BufferIntegrations::new(),
            hardware_integration: None,
            serials: SerialCounter::new(),
            clock: CompositorClock::start(),
            surface_factory: Box::new(DefaultSurfaceFactory),
            device_factory: Box::new(DefaultDeviceFactory),
            window_manager: None,
            additional_shm_formats: config.shm.additional_formats.clone(),
            use_hardware_integration_extension: config.hardware.use_extension,
            selection: SelectionState {
                retain: config.general.retain_selection,
                override_data: None,
            },
        }
    }

    /// Advertised shm formats: the required pair, then the additional ones
    pub(crate) fn shm_formats(&self) -> Vec<ShmFormat> {
        let mut formats = ShmFormat::REQUIRED.to_vec();
        for format in &self.additional_shm_formats {
            if !formats.contains(format) {
                formats.push(*format);
            }
        }
        formats
    }

    /// Ask observers for an implementation, fall back to the default one, register
    pub(crate) fn register_surface(
        &mut self,
        id: SurfaceId,
        client: ClientId,
        protocol_id: u32,
        version: u32,
        resource: Option<WlSurface>,
    ) {
        let request = SurfaceRequest::new(client.clone(), protocol_id, version);
        self.signals.surface_requested.emit(&request);
        let handler = match request.take_binding() {
            Some(handler) => handler,
            None => self.surface_factory.create_default_surface(&request),
        };
        self.surfaces
            .insert(Surface::new(id, client, protocol_id, version, resource, handler));
        self.signals.surface_created.emit(&id);
    }

    pub(crate) fn create_subsurface(&mut self, child: SurfaceId, parent: SurfaceId) -> Result<()> {
        self.surfaces.link_subsurface(child, parent)?;
        debug!("{} is now a subsurface of {}", child, parent);
        self.signals.subsurface_changed.emit(&SubsurfaceChange {
            child,
            parent: Some(parent),
        });
        Ok(())
    }

    pub(crate) fn drop_subsurface_role(&mut self, child: SurfaceId) {
        if self.surfaces.unlink_subsurface(child).is_some() {
            self.signals
                .subsurface_changed
                .emit(&SubsurfaceChange { child, parent: None });
        }
    }

    pub(crate) fn destroy_surface(&mut self, id: SurfaceId) -> bool {
        if !self.surfaces.contains(id) {
            warn!("Cannot destroy unknown {}", id);
            return false;
        }
        self.signals.surface_about_to_be_destroyed.emit(&id);
        for seat in self.seats.iter_mut() {
            seat.surface_destroyed(id);
        }
        self.surfaces.destroy(id);
        debug!("Destroyed {}", id);
        true
    }

    pub(crate) fn destroy_client(&mut self, client: &ClientId) {
        if let Some(window_manager) = self.window_manager.as_mut() {
            window_manager.send_quit_message(client);
        }
        info!("Destroying client {:?}", client);
        self.display
            .backend_handle()
            .kill_client(client.clone(), DisconnectReason::ConnectionClosed);
    }

    fn default_keyboard_mut(&mut self) -> Option<&mut crate::input::Keyboard> {
        self.seats.default_seat_mut().and_then(Seat::keyboard_mut)
    }

    pub(crate) fn handle_key_event(&mut self, event: KeyEvent) {
        let serial = self.serials.next_serial();
        let claimed = self.seats.seat_for(&InputEvent::Key(event.clone()));
        if claimed.is_none() {
            debug!("No seat claims key event from {:?}", event.device);
        }
        // Held keys and modifiers live on the seat that receives the key;
        // unclaimed keys still update the default seat
        let seat_id = claimed.or_else(|| self.seats.default_seat().map(Seat::id));
        let Some(keyboard) = seat_id
            .and_then(|id| self.seats.get_mut(id))
            .and_then(Seat::keyboard_mut)
        else {
            self.signals
                .key_event
                .emit(&ResolvedKeyEvent::unresolved(event));
            return;
        };

        let resolved = keyboard.resolve(&event);
        // Clients generate their own repeats
        if event.repeat {
            self.signals.key_event.emit(&resolved);
            return;
        }

        keyboard.key_event(event.native_scan_code, event.state);
        self.signals.key_event.emit(&resolved);
        if claimed.is_some() {
            keyboard.send_key(event.native_scan_code, event.state, event.time, serial);
        }

        keyboard.maybe_update_keymap();
        if keyboard
            .update_modifier_state(event.native_scan_code, event.state)
            .is_some()
            && claimed.is_some()
        {
            keyboard.send_modifiers(serial);
        }
    }

    pub(crate) fn handle_input_event(&mut self, event: InputEvent) {
        if let InputEvent::Key(key) = event {
            self.handle_key_event(key);
            return;
        }
        let Some(seat_id) = self.seats.seat_for(&event) else {
            debug!("No seat claims input event from {:?}", event.device());
            return;
        };
        let serial = self.serials.next_serial();
        let Some(seat) = self.seats.get_mut(seat_id) else {
            return;
        };
        match event {
            InputEvent::PointerMotion { x, y, time, .. } => {
                if let Some(pointer) = seat.pointer_mut() {
                    pointer.motion(time, x, y);
                }
            }
            InputEvent::PointerButton {
                button,
                pressed,
                time,
                ..
            } => {
                if let Some(pointer) = seat.pointer_mut() {
                    pointer.button(serial, time, button, pressed);
                }
            }
            InputEvent::PointerAxis {
                horizontal,
                vertical,
                time,
                ..
            } => {
                if let Some(pointer) = seat.pointer_mut() {
                    pointer.axis(time, horizontal, vertical);
                }
            }
            InputEvent::TouchDown { slot, x, y, time, .. } => {
                if let Some(touch) = seat.touch_mut() {
                    touch.down(serial, time, slot, x, y);
                }
            }
            InputEvent::TouchMotion { slot, x, y, time, .. } => {
                if let Some(touch) = seat.touch_mut() {
                    touch.motion(time, slot, x, y);
                }
            }
            InputEvent::TouchUp { slot, time, .. } => {
                if let Some(touch) = seat.touch_mut() {
                    touch.up(serial, time, slot);
                }
            }
            InputEvent::TouchCancel { .. } => {
                if let Some(touch) = seat.touch_mut() {
                    touch.cancel();
                }
            }
            InputEvent::Key(_) => {}
        }
    }

    fn focus_target(&self, surface: Option<SurfaceId>) -> Option<Option<(SurfaceId, WlSurface)>> {
        match surface {
            None => Some(None),
            Some(id) => {
                let resource = self.surfaces.get(id)?.resource()?.clone();
                Some(Some((id, resource)))
            }
        }
    }
}

/// The compositor
pub struct Compositor {
    state: CompositorState,
    display: Display<CompositorState>,
    config: HarborConfig,
    sockets: SocketManager,
    socket_name: Option<String>,
    args: Vec<String>,
    host: Option<Box<dyn HostLoop>>,
    watches: Vec<WatchId>,
    lifecycle: Lifecycle,
    ready_callbacks: VecDeque<ReadyCallback>,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("lifecycle", &self.lifecycle)
            .field("socket_name", &self.socket_name)
            .field("clients", &self.state.clients.len())
            .field("surfaces", &self.state.surfaces.len())
            .field("seats", &self.state.seats.len())
            .field("outputs", &self.state.outputs.len())
            .finish()
    }
}

impl AsMut<Compositor> for Compositor {
    fn as_mut(&mut self) -> &mut Compositor {
        self
    }
}

impl Compositor {
    /// Create a compositor instance. Outputs listed in the configuration are
    /// added right away; nothing is bound until [`Compositor::init`].
    pub fn new(config: HarborConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CompositorError::InvalidConfig(e.to_string()))?;
        info!("🏗️ Constructing Harbor compositor");

        let display: Display<CompositorState> =
            Display::new().map_err(|e| CompositorError::Display(e.to_string()))?;
        let mut state = CompositorState::new(display.handle(), &config);
        for output_config in &config.outputs {
            let output = state.outputs.create(output_config);
            state.outputs.add(output);
        }

        Ok(Self {
            state,
            display,
            socket_name: config.socket.name.clone(),
            config,
            sockets: SocketManager::new(),
            args: std::env::args().collect(),
            host: None,
            watches: Vec::new(),
            lifecycle: Lifecycle::Constructed,
            ready_callbacks: VecDeque::new(),
        })
    }

    /// Command line consulted for `--wayland-socket-name` (defaults to the process arguments)
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn config(&self) -> &HarborConfig {
        &self.config
    }

    pub fn signals(&self) -> &CompositorSignals {
        &self.state.signals
    }

    pub fn display_handle(&self) -> DisplayHandle {
        self.state.display.clone()
    }

    pub fn set_device_factory(&mut self, factory: Box<dyn DeviceFactory>) {
        if self.lifecycle != Lifecycle::Constructed {
            warn!("Device factory replaced after seats were set up; existing seats keep their devices");
        }
        self.state.device_factory = factory;
    }

    pub fn set_surface_factory(&mut self, factory: Box<dyn SurfaceFactory>) {
        self.state.surface_factory = factory;
    }

    pub fn set_window_manager(&mut self, window_manager: Box<dyn WindowManagerExtension>) {
        self.state.window_manager = Some(window_manager);
    }

    // ---- lifecycle ----

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_created(&self) -> bool {
        self.lifecycle == Lifecycle::Created
    }

    /// Make sure at least one seat exists. Idempotent.
    pub fn pre_init(&mut self) {
        if self.lifecycle >= Lifecycle::PreInitialized {
            return;
        }
        if self.state.seats.is_empty() {
            self.state
                .seats
                .create(&*self.state.device_factory, &self.config.general.seat_name);
        }
        self.lifecycle = Lifecycle::PreInitialized;
    }

    /// Start the compositor on a calloop loop whose data gives access to it
    pub fn init<D>(&mut self, handle: &calloop::LoopHandle<'static, D>)
    where
        D: AsMut<Compositor> + 'static,
    {
        self.init_with_host(Some(Box::new(CalloopHost::new(handle.clone()))));
    }

    /// Start the compositor. Without a host loop the caller drives dispatch.
    ///
    /// # Panics
    ///
    /// If [`Compositor::pre_init`] has not run, or the compositor is already created.
    pub fn init_with_host(&mut self, host: Option<Box<dyn HostLoop>>) {
        assert_eq!(
            self.lifecycle,
            Lifecycle::PreInitialized,
            "init requires pre_init and may only run once"
        );
        self.host = host;

        let requested = resolve_socket_name(self.socket_name.as_deref(), &self.args);
        let auto_allocated = requested.is_none();
        let name = match self.sockets.bind(requested.as_deref()) {
            Ok(name) => name,
            Err(e) => fatal_socket_error(&e),
        };
        self.socket_name = Some(name.clone());
        if auto_allocated {
            self.state.signals.socket_name_changed.emit(&name);
        }

        protocol::create_core_globals(&self.state.display);
        debug!("Advertising shm formats {:?}", self.state.shm_formats());

        self.sockets.flush_external();
        self.watch_descriptors();

        self.state.hardware_integration = self
            .state
            .use_hardware_integration_extension
            .then(HardwareIntegration::new);
        let preferences = IntegrationPreferences::from_env_or(&self.config.hardware);
        self.state.buffers.load(
            &self.state.display,
            &preferences,
            self.state.hardware_integration.as_mut(),
        );

        for seat in self.state.seats.iter_mut() {
            seat.initialize(&*self.state.device_factory, &self.config.keyboard);
            seat.global = Some(protocol::create_seat_global(&self.state.display, seat.id()));
        }
        for output in self.state.outputs.iter_mut() {
            output.global = Some(protocol::create_output_global(&self.state.display, output.id()));
        }

        self.lifecycle = Lifecycle::Created;
        while let Some(callback) = self.ready_callbacks.pop_front() {
            callback(self);
        }
        info!("✅ Harbor compositor created on {}", name);
        self.state.signals.created.emit(&());
    }

    /// `pre_init` followed by a headless `init`
    pub fn create(&mut self) {
        self.pre_init();
        self.init_with_host(None);
    }

    /// Run `callback` once the compositor is created (immediately if it already is)
    pub fn run_when_ready<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut Compositor) + 'static,
    {
        if !self.is_created() {
            self.ready_callbacks.push_back(Box::new(callback));
            return;
        }
        match self.host.as_mut() {
            Some(host) => host.post(Box::new(callback)),
            None => callback(self),
        }
    }

    fn warn_if_created(&self, property: &str) -> bool {
        if self.is_created() {
            warn!("{} can only be set before the compositor is created; ignoring", property);
        }
        self.is_created()
    }

    // ---- sockets and dispatch ----

    pub fn socket_name(&self) -> Option<&str> {
        self.socket_name.as_deref()
    }

    pub fn set_socket_name(&mut self, name: impl Into<String>) {
        if self.warn_if_created("Socket name") {
            return;
        }
        let name = name.into();
        if self.socket_name.as_deref() == Some(name.as_str()) {
            return;
        }
        self.socket_name = Some(name.clone());
        self.state.signals.socket_name_changed.emit(&name);
    }

    /// Also accept connections on `fd`, an already listening socket owned by the caller
    pub fn add_socket_descriptor(&mut self, fd: RawFd) {
        self.sockets.queue_external(fd);
        if !self.is_created() {
            return;
        }
        for fd in self.sockets.flush_external() {
            self.watch(fd);
        }
    }

    fn watch_descriptors(&mut self) {
        let mut fds = vec![self.display.backend().poll_fd().as_raw_fd()];
        fds.extend(self.sockets.listening_fds());
        for fd in fds {
            self.watch(fd);
        }
    }

    fn watch(&mut self, fd: RawFd) {
        let Some(host) = self.host.as_mut() else {
            return;
        };
        match host.watch_readable(fd) {
            Ok(watch) => self.watches.push(watch),
            Err(e) => warn!("Failed to watch descriptor {}: {}", fd, e),
        }
    }

    /// Accept pending connections, dispatch client requests, flush replies
    pub fn process_wayland_events(&mut self) {
        for stream in self.sockets.accept_pending() {
            if let Err(e) = self.add_client_stream(stream) {
                warn!("Failed to add client: {}", e);
            }
        }
        if let Err(e) = self.display.dispatch_clients(&mut self.state) {
            warn!("Failed to dispatch clients: {}", e);
        }
        self.reap_disconnected_clients();
        if let Err(e) = self.display.flush_clients() {
            debug!("Failed to flush clients: {}", e);
        }
    }

    /// Hook for the host loop right before it blocks
    pub fn about_to_block(&mut self) {
        self.process_wayland_events();
    }

    /// Serve a client on an already connected stream
    pub fn add_client_stream(&mut self, stream: UnixStream) -> Result<ClientId> {
        let client = self
            .state
            .display
            .insert_client(stream, self.state.clients.client_data())?;
        let id = self.state.clients.register(&client, &self.state.display);
        self.state.signals.client_connected.emit(&id);
        Ok(id)
    }

    fn reap_disconnected_clients(&mut self) {
        for client in self.state.clients.reap_disconnected() {
            for surface in self.state.surfaces.for_client(&client) {
                self.state.destroy_surface(surface);
            }
            info!("Client {:?} disconnected", client);
            self.state.signals.client_disconnected.emit(&client);
        }
    }

    // ---- clients ----

    pub fn clients(&self) -> &ClientRegistry {
        &self.state.clients
    }

    pub fn client(&self, id: &ClientId) -> Option<&ClientInfo> {
        self.state.clients.get(id)
    }

    /// Tell the window manager the client should quit, then drop its connection
    pub fn destroy_client(&mut self, client: &ClientId) {
        self.state.destroy_client(client);
    }

    pub fn destroy_client_for_surface(&mut self, surface: SurfaceId) {
        let Some(client) = self.state.surfaces.get(surface).map(|s| s.client().clone()) else {
            warn!("Cannot destroy client of unknown {}", surface);
            return;
        };
        self.state.destroy_client(&client);
    }

    // ---- surfaces ----

    /// Register a surface for `client` with protocol object id `id`
    pub fn create_surface(&mut self, client: &ClientId, id: u32, version: u32) -> SurfaceId {
        let surface = self.state.surfaces.allocate_id();
        self.state.register_surface(surface, client.clone(), id, version, None);
        surface
    }

    pub fn create_subsurface(&mut self, child: SurfaceId, parent: SurfaceId) -> Result<()> {
        self.state.create_subsurface(child, parent)
    }

    /// Returns false if the surface was not registered
    pub fn destroy_surface(&mut self, surface: SurfaceId) -> bool {
        self.state.destroy_surface(surface)
    }

    pub fn commit_surface(&mut self, surface: SurfaceId) -> Result<()> {
        self.state.surfaces.commit(surface)
    }

    /// Surface ids in creation order
    pub fn surfaces(&self) -> Vec<SurfaceId> {
        self.state.surfaces.ids()
    }

    pub fn surfaces_for_client(&self, client: &ClientId) -> Vec<SurfaceId> {
        self.state.surfaces.for_client(client)
    }

    pub fn surface(&self, surface: SurfaceId) -> Option<&Surface> {
        self.state.surfaces.get(surface)
    }

    pub fn surface_mut(&mut self, surface: SurfaceId) -> Option<&mut Surface> {
        self.state.surfaces.get_mut(surface)
    }

    pub fn surface_registry(&self) -> &SurfaceRegistry {
        &self.state.surfaces
    }

    /// Fire pending frame callbacks with the current compositor time
    pub fn send_frame_callbacks(&mut self) {
        let time = self.state.clock.current_time_msecs();
        self.state.surfaces.send_frame_callbacks(time);
    }

    // ---- outputs ----

    pub fn create_output(&mut self, config: &OutputConfig) -> Output {
        self.state.outputs.create(config)
    }

    fn advertise_output(&mut self, id: OutputId) {
        if !self.is_created() {
            return;
        }
        let global = protocol::create_output_global(&self.state.display, id);
        if let Some(output) = self.state.outputs.get_mut(id) {
            output.global = Some(global);
        }
    }

    fn retire_global(&self, global: Option<GlobalId>) {
        if let Some(global) = global {
            self.state.display.remove_global::<CompositorState>(global);
        }
    }

    /// Append an output; adding an output twice is a no-op
    pub fn add_output(&mut self, output: Output) -> OutputId {
        let id = output.id();
        if self.state.outputs.add(output) {
            self.advertise_output(id);
            self.state.signals.output_added.emit(&id);
        }
        id
    }

    /// Make `output` the default, inserting it if it is not listed yet
    pub fn set_default_output(&mut self, output: Output) {
        let id = output.id();
        let change = self.state.outputs.set_default(output);
        if !change.changed {
            return;
        }
        if change.added {
            self.advertise_output(id);
        }
        self.state.signals.default_output_changed.emit(&Some(id));
        if change.added {
            self.state.signals.output_added.emit(&id);
        }
    }

    pub fn remove_output(&mut self, id: OutputId) -> bool {
        let was_default = self.state.outputs.default_output().map(Output::id) == Some(id);
        let Some(output) = self.state.outputs.remove(id) else {
            return false;
        };
        self.retire_global(output.global);
        self.state.signals.output_removed.emit(&id);
        if was_default {
            let new_default = self.state.outputs.default_output().map(Output::id);
            self.state.signals.default_output_changed.emit(&new_default);
        }
        true
    }

    pub fn outputs(&self) -> &OutputList {
        &self.state.outputs
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.state.outputs.get(id)
    }

    pub fn output_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.state.outputs.get_mut(id)
    }

    pub fn default_output(&self) -> Option<&Output> {
        self.state.outputs.default_output()
    }

    pub fn output_for(&self, window: WindowId) -> Option<&Output> {
        self.state.outputs.output_for(window)
    }

    // ---- seats and input ----

    /// Add a seat; after creation it is initialized and advertised immediately
    pub fn create_seat(&mut self, name: &str) -> SeatId {
        let id = self.state.seats.create(&*self.state.device_factory, name);
        if self.is_created() {
            let global = protocol::create_seat_global(&self.state.display, id);
            if let Some(seat) = self.state.seats.get_mut(id) {
                seat.initialize(&*self.state.device_factory, &self.config.keyboard);
                seat.global = Some(global);
            }
        }
        id
    }

    pub fn seats(&self) -> &SeatList {
        &self.state.seats
    }

    pub fn seats_mut(&mut self) -> &mut SeatList {
        &mut self.state.seats
    }

    pub fn default_seat(&self) -> Option<&Seat> {
        self.state.seats.default_seat()
    }

    pub fn seat_for(&self, event: &InputEvent) -> Option<SeatId> {
        self.state.seats.seat_for(event)
    }

    /// Resolve a platform key event and deliver it
    pub fn handle_key_event(&mut self, event: KeyEvent) {
        self.state.handle_key_event(event);
    }

    pub fn handle_input_event(&mut self, event: InputEvent) {
        self.state.handle_input_event(event);
    }

    /// Focus `surface` on the seat's keyboard. Only surfaces with a client
    /// resource can take focus.
    pub fn set_keyboard_focus(&mut self, seat: SeatId, surface: Option<SurfaceId>) -> bool {
        let Some(focus) = self.state.focus_target(surface) else {
            return false;
        };
        let serial = self.state.serials.next_serial();
        match self.state.seats.get_mut(seat).and_then(Seat::keyboard_mut) {
            Some(keyboard) => {
                keyboard.set_focus(focus, serial);
                true
            }
            None => false,
        }
    }

    pub fn set_pointer_focus(&mut self, seat: SeatId, surface: Option<SurfaceId>, x: f64, y: f64) -> bool {
        let Some(focus) = self.state.focus_target(surface) else {
            return false;
        };
        let serial = self.state.serials.next_serial();
        match self.state.seats.get_mut(seat).and_then(Seat::pointer_mut) {
            Some(pointer) => {
                pointer.set_focus(focus, x, y, serial);
                true
            }
            None => false,
        }
    }

    pub fn set_touch_focus(&mut self, seat: SeatId, surface: Option<SurfaceId>) -> bool {
        let Some(focus) = self.state.focus_target(surface) else {
            return false;
        };
        match self.state.seats.get_mut(seat).and_then(Seat::touch_mut) {
            Some(touch) => {
                touch.set_focus(focus);
                true
            }
            None => false,
        }
    }

    pub fn application_state_changed(&mut self, state: ApplicationState) {
        debug!("Application state changed to {:?}", state);
        if state != ApplicationState::Inactive {
            return;
        }
        if let Some(keyboard) = self.state.default_keyboard_mut() {
            keyboard.reset_keyboard_state();
        }
    }

    // ---- buffers ----

    pub fn additional_shm_formats(&self) -> &[ShmFormat] {
        &self.state.additional_shm_formats
    }

    pub fn set_additional_shm_formats(&mut self, formats: Vec<ShmFormat>) {
        if self.warn_if_created("Additional shm formats") || formats == self.state.additional_shm_formats {
            return;
        }
        self.state.additional_shm_formats = formats;
        self.state
            .signals
            .additional_shm_formats_changed
            .emit(&self.state.additional_shm_formats);
    }

    /// Formats advertised on `wl_shm`
    pub fn shm_formats(&self) -> Vec<ShmFormat> {
        self.state.shm_formats()
    }

    pub fn use_hardware_integration_extension(&self) -> bool {
        self.state.use_hardware_integration_extension
    }

    pub fn set_use_hardware_integration_extension(&mut self, enabled: bool) {
        if self.warn_if_created("Hardware integration extension")
            || enabled == self.state.use_hardware_integration_extension
        {
            return;
        }
        self.state.use_hardware_integration_extension = enabled;
        self.state
            .signals
            .use_hardware_integration_extension_changed
            .emit(&enabled);
    }

    pub fn hardware_integration(&self) -> Option<&HardwareIntegration> {
        self.state.hardware_integration.as_ref()
    }

    pub fn client_buffer_factories_mut(&mut self) -> &mut IntegrationFactory<dyn ClientBufferIntegration> {
        self.state.buffers.client_factories_mut()
    }

    pub fn server_buffer_factories_mut(&mut self) -> &mut IntegrationFactory<dyn ServerBufferIntegration> {
        self.state.buffers.server_factories_mut()
    }

    /// Active client buffer integrations, shared memory first
    pub fn client_buffer_integrations(&self) -> Vec<&str> {
        self.state.buffers.client_integration_names()
    }

    pub fn server_buffer_integration(&self) -> Option<&str> {
        self.state.buffers.server_integration_name()
    }

    /// Read back `buffer` and report the result to `grabber`
    pub fn grab_surface(&self, grabber: &mut dyn SurfaceGrabber, buffer: &ClientBuffer) {
        grab::grab_buffer(grabber, buffer);
    }

    // ---- selection ----

    pub fn retain_selection(&self) -> bool {
        self.state.selection.retain
    }

    pub fn set_retain_selection(&mut self, retain: bool) {
        if self.state.selection.retain == retain {
            return;
        }
        self.state.selection.retain = retain;
        self.state.signals.retained_selection_changed.emit(&retain);
    }

    /// Hand over selection data received from a client
    pub fn feed_retained_selection_data(&mut self, data: MimeData) {
        if !self.state.selection.retain {
            debug!("Ignoring selection data: retain_selection is off");
            return;
        }
        self.state.signals.retained_selection_received.emit(&data);
    }

    pub fn override_selection(&mut self, data: MimeData) {
        self.state.selection.override_data = Some(data);
    }

    pub fn selection_override(&self) -> Option<&MimeData> {
        self.state.selection.override_data.as_ref()
    }

    // ---- time ----

    /// Milliseconds since construction, as used in event timestamps
    pub fn current_time_msecs(&self) -> u32 {
        self.state.clock.current_time_msecs()
    }

    pub fn next_serial(&self) -> u32 {
        self.state.serials.next_serial()
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        for client in self.state.clients.ids() {
            self.state
                .display
                .backend_handle()
                .kill_client(client, DisconnectReason::ConnectionClosed);
        }
        if let Err(e) = self.display.dispatch_clients(&mut self.state) {
            debug!("Final dispatch failed: {}", e);
        }
        self.reap_disconnected_clients();

        for output in self.state.outputs.drain() {
            self.retire_global(output.global);
        }
        self.state.buffers.clear();
        if let Some(host) = self.host.as_mut() {
            for watch in self.watches.drain(..) {
                host.unwatch(watch);
            }
        }
        info!("🛑 Harbor compositor shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyboardConfig;
    use crate::input::KeyState;
    use crate::surface::SurfaceHandler;
    use serial_test::serial;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    const KEY_A: u32 = 38;

    fn compositor() -> Compositor {
        Compositor::new(HarborConfig::default())
            .unwrap()
            .with_args(["harbor"])
    }

    fn runtime_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_RUNTIME_DIR", dir.path());
        dir
    }

    fn connect(compositor: &mut Compositor) -> (ClientId, UnixStream) {
        let (server, client) = UnixStream::pair().unwrap();
        (compositor.add_client_stream(server).unwrap(), client)
    }

    fn recorder<T: Clone + 'static>(signal: &Signal<T>) -> Rc<RefCell<Vec<T>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        signal.connect(move |value: &T| sink.borrow_mut().push(value.clone()));
        seen
    }

    #[test]
    fn test_pre_init_is_idempotent() {
        let mut compositor = compositor();
        assert_eq!(compositor.lifecycle(), Lifecycle::Constructed);
        compositor.pre_init();
        compositor.pre_init();
        assert_eq!(compositor.lifecycle(), Lifecycle::PreInitialized);
        assert_eq!(compositor.seats().len(), 1);
        assert_eq!(compositor.default_seat().unwrap().name(), "seat0");
    }

    #[test]
    fn test_pre_init_keeps_existing_seats() {
        let mut compositor = compositor();
        let seat = compositor.create_seat("custom");
        compositor.pre_init();
        assert_eq!(compositor.seats().ids(), vec![seat]);
    }

    #[test]
    #[serial]
    fn test_create_runs_startup_in_order() {
        let _dir = runtime_dir();
        let mut compositor = compositor();
        let order = Rc::new(RefCell::new(Vec::new()));

        let log = order.clone();
        compositor.signals().socket_name_changed.connect(move |name: &String| {
            log.borrow_mut().push(format!("socket {}", name.split('-').next().unwrap_or("")));
        });
        let log = order.clone();
        compositor.signals().created.connect(move |_| log.borrow_mut().push("created".into()));
        let log = order.clone();
        compositor.run_when_ready(move |c| {
            assert!(c.is_created());
            log.borrow_mut().push("ready 1".into());
        });
        let log = order.clone();
        compositor.run_when_ready(move |_| log.borrow_mut().push("ready 2".into()));

        compositor.create();
        assert!(compositor.is_created());
        assert!(compositor.socket_name().unwrap().starts_with("wayland-"));
        assert_eq!(
            *order.borrow(),
            vec!["socket wayland", "ready 1", "ready 2", "created"]
        );
        assert_eq!(compositor.seats().len(), 1);
        assert!(compositor.default_seat().unwrap().is_initialized());

        // After creation callbacks run right away
        let log = order.clone();
        compositor.run_when_ready(move |_| log.borrow_mut().push("late".into()));
        assert_eq!(order.borrow().last().map(String::as_str), Some("late"));
    }

    #[test]
    #[serial]
    fn test_named_socket_does_not_announce_name() {
        let _dir = runtime_dir();
        let mut compositor = compositor();
        compositor.set_socket_name("harbor-named");
        let changes = recorder(&compositor.signals().socket_name_changed);
        compositor.create();
        assert_eq!(compositor.socket_name(), Some("harbor-named"));
        assert!(changes.borrow().is_empty());
    }

    #[test]
    #[serial]
    fn test_socket_name_from_arguments() {
        let _dir = runtime_dir();
        let mut compositor = Compositor::new(HarborConfig::default())
            .unwrap()
            .with_args(["harbor", "--wayland-socket-name", "harbor-from-args"]);
        compositor.create();
        assert_eq!(compositor.socket_name(), Some("harbor-from-args"));
    }

    #[test]
    #[serial]
    fn test_startup_properties_are_frozen_after_create() {
        let _dir = runtime_dir();
        let mut compositor = compositor();
        let formats = recorder(&compositor.signals().additional_shm_formats_changed);
        compositor.set_additional_shm_formats(vec![ShmFormat::Rgb565]);
        assert_eq!(formats.borrow().len(), 1);
        compositor.create();

        let name = compositor.socket_name().map(str::to_string);
        compositor.set_socket_name("too-late");
        compositor.set_additional_shm_formats(vec![]);
        compositor.set_use_hardware_integration_extension(true);
        assert_eq!(compositor.socket_name().map(str::to_string), name);
        assert_eq!(compositor.additional_shm_formats(), &[ShmFormat::Rgb565]);
        assert!(!compositor.use_hardware_integration_extension());
        assert_eq!(formats.borrow().len(), 1);
        assert_eq!(
            compositor.shm_formats(),
            vec![ShmFormat::Argb8888, ShmFormat::Xrgb8888, ShmFormat::Rgb565]
        );
    }

    #[test]
    #[should_panic(expected = "init requires pre_init")]
    fn test_init_without_pre_init_panics() {
        let mut compositor = compositor();
        compositor.init_with_host(None);
    }

    #[test]
    fn test_surface_without_binding_gets_default() {
        let mut compositor = compositor();
        let (client, _peer) = connect(&mut compositor);
        let requested = Rc::new(RefCell::new(Vec::new()));
        let sink = requested.clone();
        compositor
            .signals()
            .surface_requested
            .connect(move |r: &SurfaceRequest| sink.borrow_mut().push((r.id(), r.version())));
        let created = recorder(&compositor.signals().surface_created);

        let id = compositor.create_surface(&client, 7, 4);
        assert_eq!(*requested.borrow(), vec![(7, 4)]);
        assert_eq!(*created.borrow(), vec![id]);
        assert_eq!(compositor.surfaces(), vec![id]);
        let surface = compositor.surface(id).unwrap();
        assert_eq!(surface.protocol_id(), 7);
        assert_eq!(surface.handler().kind(), "surface");
    }

    #[test]
    fn test_observer_binding_is_used() {
        struct Bound;
        impl SurfaceHandler for Bound {
            fn kind(&self) -> &str {
                "bound"
            }
        }

        let mut compositor = compositor();
        let (client, _peer) = connect(&mut compositor);
        compositor
            .signals()
            .surface_requested
            .connect(|r: &SurfaceRequest| r.bind(Box::new(Bound)));
        let id = compositor.create_surface(&client, 3, 4);
        assert_eq!(compositor.surface(id).unwrap().handler().kind(), "bound");
        assert_eq!(compositor.surfaces().len(), 1);
    }

    #[test]
    fn test_destroy_surface_notifies_first_and_unlinks() {
        let mut compositor = compositor();
        let (client, _peer) = connect(&mut compositor);
        let parent = compositor.create_surface(&client, 3, 4);
        let child = compositor.create_surface(&client, 4, 4);
        let changes = recorder(&compositor.signals().subsurface_changed);
        compositor.create_subsurface(child, parent).unwrap();
        assert_eq!(
            *changes.borrow(),
            vec![SubsurfaceChange {
                child,
                parent: Some(parent)
            }]
        );

        let destroyed = recorder(&compositor.signals().surface_about_to_be_destroyed);
        assert!(compositor.destroy_surface(child));
        assert_eq!(*destroyed.borrow(), vec![child]);
        assert!(compositor.surface(child).is_none());
        assert!(compositor.surface(parent).unwrap().children().is_empty());
        assert!(!compositor.destroy_surface(child));
    }

    #[test]
    fn test_surfaces_for_client() {
        let mut compositor = compositor();
        let (first, _a) = connect(&mut compositor);
        let (second, _b) = connect(&mut compositor);
        let one = compositor.create_surface(&first, 3, 4);
        let two = compositor.create_surface(&second, 3, 4);
        let three = compositor.create_surface(&first, 5, 4);
        assert_eq!(compositor.surfaces_for_client(&first), vec![one, three]);
        assert_eq!(compositor.surfaces_for_client(&second), vec![two]);
        assert_eq!(compositor.clients().len(), 2);
    }

    #[test]
    fn test_destroy_client_notifies_window_manager() {
        struct Recorder(Rc<RefCell<Vec<ClientId>>>);
        impl WindowManagerExtension for Recorder {
            fn send_quit_message(&mut self, client: &ClientId) {
                self.0.borrow_mut().push(client.clone());
            }
        }

        let mut compositor = compositor();
        let quits = Rc::new(RefCell::new(Vec::new()));
        compositor.set_window_manager(Box::new(Recorder(quits.clone())));
        let (client, _peer) = connect(&mut compositor);
        let surface = compositor.create_surface(&client, 3, 4);
        let gone = recorder(&compositor.signals().client_disconnected);

        compositor.destroy_client_for_surface(surface);
        assert_eq!(*quits.borrow(), vec![client.clone()]);

        compositor.process_wayland_events();
        assert_eq!(*gone.borrow(), vec![client.clone()]);
        assert!(!compositor.clients().contains(&client));
        assert!(compositor.surfaces().is_empty());
    }

    #[test]
    fn test_set_default_output() {
        let mut compositor = compositor();
        let added = recorder(&compositor.signals().output_added);
        let defaults = recorder(&compositor.signals().default_output_changed);

        let first = compositor.create_output(&OutputConfig::default());
        let first_id = compositor.add_output(first);
        let second = compositor.create_output(&OutputConfig {
            name: "HARBOR-2".into(),
            ..OutputConfig::default()
        });
        let second_id = second.id();

        compositor.set_default_output(second);
        assert_eq!(compositor.outputs().ids(), vec![second_id, first_id]);
        assert_eq!(*added.borrow(), vec![first_id, second_id]);
        assert_eq!(*defaults.borrow(), vec![Some(second_id)]);

        let first_again = compositor.create_output(&OutputConfig::default());
        // A fresh output is a different output, even with the same settings
        assert_ne!(first_again.id(), first_id);
    }

    #[test]
    fn test_remove_default_output_moves_default() {
        let config = HarborConfig {
            outputs: vec![
                OutputConfig::default(),
                OutputConfig {
                    name: "HARBOR-2".into(),
                    ..OutputConfig::default()
                },
            ],
            ..HarborConfig::default()
        };
        let mut compositor = Compositor::new(config).unwrap();
        let ids = compositor.outputs().ids();
        let removed = recorder(&compositor.signals().output_removed);
        let defaults = recorder(&compositor.signals().default_output_changed);

        assert!(compositor.remove_output(ids[0]));
        assert_eq!(*removed.borrow(), vec![ids[0]]);
        assert_eq!(*defaults.borrow(), vec![Some(ids[1])]);
        assert!(compositor.remove_output(ids[1]));
        assert_eq!(defaults.borrow().last(), Some(&None));
        assert!(!compositor.remove_output(ids[1]));
    }

    #[test]
    fn test_output_for_window() {
        let mut compositor = compositor();
        let mut output = compositor.create_output(&OutputConfig::default());
        output.window = Some(WindowId(9));
        let id = compositor.add_output(output);
        assert_eq!(compositor.output_for(WindowId(9)).map(Output::id), Some(id));
        assert!(compositor.output_for(WindowId(1)).is_none());
    }

    #[test]
    fn test_repeat_release_leaves_key_state_alone() {
        let mut compositor = compositor();
        compositor.pre_init();
        let seat = compositor.seats().ids()[0];
        compositor
            .seats_mut()
            .get_mut(seat)
            .unwrap()
            .initialize(&DefaultDeviceFactory, &KeyboardConfig::default());
        let delivered = recorder(&compositor.signals().key_event);

        compositor.handle_key_event(KeyEvent::press(KEY_A, 1));
        let keyboard = compositor.default_seat().unwrap().keyboard().unwrap();
        assert_eq!(keyboard.keys(), &[KEY_A - 8]);

        compositor
            .seats_mut()
            .default_seat_mut()
            .unwrap()
            .keyboard_mut()
            .unwrap()
            .set_keymap(KeyboardConfig {
                layout: "de".into(),
                ..KeyboardConfig::default()
            });

        compositor.handle_key_event(KeyEvent::release(KEY_A, 2).with_repeat(true));
        let keyboard = compositor.default_seat().unwrap().keyboard().unwrap();
        assert_eq!(keyboard.keys(), &[KEY_A - 8]);
        assert!(keyboard.has_pending_keymap());
        assert_eq!(keyboard.keymap_config().layout, "us");
        assert_eq!(delivered.borrow().len(), 2);
        assert!(delivered.borrow()[1].event.repeat);

        compositor.handle_key_event(KeyEvent::release(KEY_A, 3));
        let keyboard = compositor.default_seat().unwrap().keyboard().unwrap();
        assert!(keyboard.keys().is_empty());
        assert!(!keyboard.has_pending_keymap());
        assert_eq!(keyboard.keymap_config().layout, "de");
    }

    #[test]
    fn test_inactive_application_resets_keyboard() {
        let mut compositor = compositor();
        compositor.pre_init();
        compositor
            .seats_mut()
            .default_seat_mut()
            .unwrap()
            .initialize(&DefaultDeviceFactory, &KeyboardConfig::default());
        compositor.handle_key_event(KeyEvent::press(KEY_A, 1));

        compositor.application_state_changed(ApplicationState::Hidden);
        assert_eq!(compositor.default_seat().unwrap().keyboard().unwrap().keys().len(), 1);
        compositor.application_state_changed(ApplicationState::Inactive);
        assert!(compositor.default_seat().unwrap().keyboard().unwrap().keys().is_empty());
    }

    #[test]
    fn test_key_events_without_seat_still_notify() {
        let mut compositor = compositor();
        let delivered = recorder(&compositor.signals().key_event);
        compositor.handle_key_event(KeyEvent::press(KEY_A, 1));
        assert_eq!(delivered.borrow().len(), 1);
        assert_eq!(delivered.borrow()[0].keysym, 0);
        assert_eq!(delivered.borrow()[0].event.state, KeyState::Pressed);
    }

    #[test]
    fn test_pointer_events_go_to_owning_seat() {
        let mut compositor = compositor();
        let laptop = compositor.create_seat("laptop");
        let usb = compositor.create_seat("usb");
        for id in [laptop, usb] {
            compositor
                .seats_mut()
                .get_mut(id)
                .unwrap()
                .initialize(&DefaultDeviceFactory, &KeyboardConfig::default());
        }
        compositor
            .seats_mut()
            .get_mut(laptop)
            .unwrap()
            .set_owner(|e| e.device() == Some("touchpad"));

        compositor.handle_input_event(InputEvent::PointerButton {
            device: Some("mouse".into()),
            button: 0x110,
            pressed: true,
            time: 1,
        });
        let seats = compositor.seats();
        assert!(seats.get(laptop).unwrap().pointer().unwrap().pressed_buttons().is_empty());
        assert_eq!(seats.get(usb).unwrap().pointer().unwrap().pressed_buttons(), &[0x110]);
    }

    #[test]
    fn test_held_keys_follow_the_receiving_seat() {
        let mut compositor = compositor();
        let laptop = compositor.create_seat("laptop");
        let usb = compositor.create_seat("usb");
        for id in [laptop, usb] {
            compositor
                .seats_mut()
                .get_mut(id)
                .unwrap()
                .initialize(&DefaultDeviceFactory, &KeyboardConfig::default());
        }
        compositor
            .seats_mut()
            .get_mut(laptop)
            .unwrap()
            .set_owner(|e| e.device() == Some("internal"));
        let delivered = recorder(&compositor.signals().key_event);

        compositor.handle_key_event(KeyEvent::press(KEY_A, 1).with_device("external"));
        let seats = compositor.seats();
        assert!(seats.get(laptop).unwrap().keyboard().unwrap().keys().is_empty());
        assert_eq!(seats.get(usb).unwrap().keyboard().unwrap().keys(), &[KEY_A - 8]);

        compositor.handle_key_event(KeyEvent::press(KEY_A, 2).with_device("internal"));
        compositor.handle_key_event(KeyEvent::release(KEY_A, 3).with_device("external"));
        let seats = compositor.seats();
        assert_eq!(seats.get(laptop).unwrap().keyboard().unwrap().keys(), &[KEY_A - 8]);
        assert!(seats.get(usb).unwrap().keyboard().unwrap().keys().is_empty());
        assert_eq!(delivered.borrow().len(), 3);
    }

    #[test]
    fn test_retained_selection() {
        let mut compositor = compositor();
        let changes = recorder(&compositor.signals().retained_selection_changed);
        let received = recorder(&compositor.signals().retained_selection_received);

        compositor.feed_retained_selection_data(MimeData::with_text("ignored"));
        assert!(received.borrow().is_empty());

        compositor.set_retain_selection(true);
        compositor.set_retain_selection(true);
        assert_eq!(*changes.borrow(), vec![true]);
        compositor.feed_retained_selection_data(MimeData::with_text("kept"));
        assert_eq!(*received.borrow(), vec![MimeData::with_text("kept")]);

        compositor.override_selection(MimeData::with_text("override"));
        assert_eq!(compositor.selection_override(), Some(&MimeData::with_text("override")));
    }

    #[test]
    fn test_focus_needs_client_resource() {
        let mut compositor = compositor();
        compositor.pre_init();
        let seat = compositor.seats().ids()[0];
        compositor
            .seats_mut()
            .get_mut(seat)
            .unwrap()
            .initialize(&DefaultDeviceFactory, &KeyboardConfig::default());
        let (client, _peer) = connect(&mut compositor);
        let surface = compositor.create_surface(&client, 3, 4);
        assert!(!compositor.set_keyboard_focus(seat, Some(surface)));
        assert!(compositor.set_keyboard_focus(seat, None));
    }
}
