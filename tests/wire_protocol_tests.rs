// Wire-level tests: a real wayland-client connection talking to the core.
//
// The compositor is single-threaded, so it is pumped on the test thread while
// the client runs its blocking roundtrips on a helper thread.

use serial_test::serial;
use std::os::unix::net::UnixStream;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use wayland_client::globals::{registry_queue_init, GlobalListContents};
use wayland_client::protocol::{wl_compositor, wl_registry, wl_shm, wl_subcompositor, wl_subsurface, wl_surface};
use wayland_client::{Connection, Dispatch, QueueHandle, WEnum};

use harbor::{Compositor, HarborConfig};

#[derive(Default)]
struct ClientState {
    formats: Vec<WEnum<wl_shm::Format>>,
}

impl Dispatch<wl_registry::WlRegistry, GlobalListContents> for ClientState {
    fn event(
        _state: &mut Self,
        _proxy: &wl_registry::WlRegistry,
        _event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_shm::WlShm, ()> for ClientState {
    fn event(
        state: &mut Self,
        _proxy: &wl_shm::WlShm,
        event: wl_shm::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_shm::Event::Format { format } = event {
            state.formats.push(format);
        }
    }
}

macro_rules! ignore_events {
    ($($iface:ty),*) => {
        $(
            impl Dispatch<$iface, ()> for ClientState {
                fn event(
                    _state: &mut Self,
                    _proxy: &$iface,
                    _event: <$iface as wayland_client::Proxy>::Event,
                    _data: &(),
                    _conn: &Connection,
                    _qh: &QueueHandle<Self>,
                ) {
                }
            }
        )*
    };
}

ignore_events!(
    wl_compositor::WlCompositor,
    wl_surface::WlSurface,
    wl_subcompositor::WlSubcompositor,
    wl_subsurface::WlSubsurface
);

fn created_compositor() -> (Compositor, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("XDG_RUNTIME_DIR", dir.path());
    let mut compositor = Compositor::new(HarborConfig::default()).unwrap().with_args(["harbor"]);
    compositor.create();
    (compositor, dir)
}

/// Pump the compositor until the client thread is done
fn serve<T>(compositor: &mut Compositor, client: JoinHandle<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !client.is_finished() {
        assert!(Instant::now() < deadline, "client did not finish in time");
        compositor.process_wayland_events();
        std::thread::sleep(Duration::from_millis(1));
    }
    compositor.process_wayland_events();
    client.join().expect("client thread panicked")
}

#[test]
#[serial]
fn test_registry_advertises_core_globals() {
    let (mut compositor, _dir) = created_compositor();
    let (server, client) = UnixStream::pair().unwrap();
    compositor.add_client_stream(server).unwrap();

    let handle = std::thread::spawn(move || {
        let conn = Connection::from_socket(client).unwrap();
        let (globals, _queue) = registry_queue_init::<ClientState>(&conn).unwrap();
        let mut interfaces: Vec<String> = globals
            .contents()
            .with_list(|list| list.iter().map(|g| g.interface.clone()).collect());
        interfaces.sort();
        interfaces
    });

    let interfaces = serve(&mut compositor, handle);
    for expected in ["wl_compositor", "wl_output", "wl_seat", "wl_shm", "wl_subcompositor"] {
        assert!(interfaces.iter().any(|i| i == expected), "missing {}", expected);
    }
}

#[test]
#[serial]
fn test_shm_advertises_required_formats() {
    let (mut compositor, _dir) = created_compositor();
    let (server, client) = UnixStream::pair().unwrap();
    compositor.add_client_stream(server).unwrap();

    let handle = std::thread::spawn(move || {
        let conn = Connection::from_socket(client).unwrap();
        let (globals, mut queue) = registry_queue_init::<ClientState>(&conn).unwrap();
        let qh = queue.handle();
        let _shm: wl_shm::WlShm = globals.bind(&qh, 1..=1, ()).unwrap();
        let mut state = ClientState::default();
        queue.roundtrip(&mut state).unwrap();
        state.formats
    });

    let formats = serve(&mut compositor, handle);
    assert!(formats.contains(&WEnum::Value(wl_shm::Format::Argb8888)));
    assert!(formats.contains(&WEnum::Value(wl_shm::Format::Xrgb8888)));
}

#[test]
#[serial]
fn test_client_surfaces_reach_the_registry() {
    let (mut compositor, _dir) = created_compositor();
    let (server, client) = UnixStream::pair().unwrap();
    let client_id = compositor.add_client_stream(server).unwrap();

    let created = std::rc::Rc::new(std::cell::RefCell::new(0));
    let sink = created.clone();
    compositor
        .signals()
        .surface_created
        .connect(move |_| *sink.borrow_mut() += 1);

    let handle = std::thread::spawn(move || {
        let conn = Connection::from_socket(client).unwrap();
        let (globals, mut queue) = registry_queue_init::<ClientState>(&conn).unwrap();
        let qh = queue.handle();
        let compositor: wl_compositor::WlCompositor = globals.bind(&qh, 1..=4, ()).unwrap();
        let subcompositor: wl_subcompositor::WlSubcompositor = globals.bind(&qh, 1..=1, ()).unwrap();
        let parent = compositor.create_surface(&qh, ());
        let child = compositor.create_surface(&qh, ());
        let _subsurface = subcompositor.get_subsurface(&child, &parent, &qh, ());
        child.commit();
        parent.commit();
        let mut state = ClientState::default();
        queue.roundtrip(&mut state).unwrap();
        // Keep the connection alive until the server has looked
        (conn, parent, child)
    });

    let _alive = serve(&mut compositor, handle);
    assert_eq!(*created.borrow(), 2);
    let surfaces = compositor.surfaces_for_client(&client_id);
    assert_eq!(surfaces.len(), 2);
    let parents: Vec<_> = surfaces
        .iter()
        .filter(|id| compositor.surface(**id).unwrap().parent().is_some())
        .collect();
    assert_eq!(parents.len(), 1);
}
