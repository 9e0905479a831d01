//! Wire protocol glue
//!
//! `GlobalDispatch`/`Dispatch` implementations for the core Wayland
//! interfaces. Requests are translated into registry calls on
//! [`CompositorState`]; nothing here keeps state of its own beyond resource
//! user data.

mod compositor;
mod output;
mod seat;
mod shm;

pub use compositor::{RegionData, SubsurfaceData};
pub use shm::ShmPoolData;

use wayland_server::backend::GlobalId;
use wayland_server::protocol::{wl_compositor, wl_output, wl_seat, wl_shm, wl_subcompositor};
use wayland_server::DisplayHandle;

use crate::compositor::CompositorState;
use crate::input::SeatId;
use crate::output::OutputId;

pub const COMPOSITOR_VERSION: u32 = 4;
pub const SUBCOMPOSITOR_VERSION: u32 = 1;
pub const SHM_VERSION: u32 = 1;
pub const SEAT_VERSION: u32 = 5;
pub const OUTPUT_VERSION: u32 = 4;

/// Advertise `wl_compositor`, `wl_subcompositor` and `wl_shm`
pub(crate) fn create_core_globals(display: &DisplayHandle) {
    display.create_global::<CompositorState, wl_compositor::WlCompositor, ()>(COMPOSITOR_VERSION, ());
    display.create_global::<CompositorState, wl_subcompositor::WlSubcompositor, ()>(SUBCOMPOSITOR_VERSION, ());
    display.create_global::<CompositorState, wl_shm::WlShm, ()>(SHM_VERSION, ());
}

pub(crate) fn create_seat_global(display: &DisplayHandle, seat: SeatId) -> GlobalId {
    display.create_global::<CompositorState, wl_seat::WlSeat, SeatId>(SEAT_VERSION, seat)
}

pub(crate) fn create_output_global(display: &DisplayHandle, output: OutputId) -> GlobalId {
    display.create_global::<CompositorState, wl_output::WlOutput, OutputId>(OUTPUT_VERSION, output)
}
