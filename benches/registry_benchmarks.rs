//! Performance benchmarks for the Harbor registries
//!
//! Covers the paths hit on every input event and every surface request.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::os::unix::net::UnixStream;

use harbor::input::InputEvent;
use harbor::signal::Signal;
use harbor::{Compositor, HarborConfig};

/// Benchmark signal emission with several connected handlers
fn bench_signal_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal_emit");
    for handlers in [1usize, 8, 64] {
        let signal: Signal<u32> = Signal::new();
        for _ in 0..handlers {
            signal.connect(|value| {
                black_box(*value);
            });
        }
        group.bench_function(format!("{}_handlers", handlers), |b| {
            b.iter(|| signal.emit(black_box(&7)))
        });
    }
    group.finish();
}

/// Benchmark seat lookup for pointer events across device-owned seats
fn bench_seat_for(c: &mut Criterion) {
    let mut compositor = Compositor::new(HarborConfig::default()).unwrap();
    compositor.pre_init();
    for n in 0..8 {
        let name = format!("seat-{}", n);
        let device = format!("mouse-{}", n);
        let id = compositor.create_seat(&name);
        if let Some(seat) = compositor.seats_mut().get_mut(id) {
            seat.set_owner(move |event: &InputEvent| event.device() == Some(device.as_str()));
        }
    }
    let event = InputEvent::PointerMotion {
        device: Some("mouse-7".to_string()),
        x: 10.0,
        y: 20.0,
        time: 0,
    };

    c.bench_function("seat_for_last_device", |b| {
        b.iter(|| black_box(compositor.seat_for(black_box(&event))))
    });
}

/// Benchmark creating and destroying client surfaces
fn bench_surface_churn(c: &mut Criterion) {
    let mut compositor = Compositor::new(HarborConfig::default()).unwrap();
    let (server, _peer) = UnixStream::pair().unwrap();
    let client = compositor.add_client_stream(server).unwrap();
    let mut protocol_id = 3;

    c.bench_function("surface_create_destroy", |b| {
        b.iter_batched(
            || {
                protocol_id += 1;
                protocol_id
            },
            |id| {
                let surface = compositor.create_surface(&client, id, 4);
                black_box(compositor.destroy_surface(surface));
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_signal_emit, bench_seat_for, bench_surface_churn);
criterion_main!(benches);
