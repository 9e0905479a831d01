//! wl_seat and its keyboard, pointer and touch objects

use wayland_server::backend::ClientId;
use wayland_server::protocol::{wl_keyboard, wl_pointer, wl_seat, wl_touch};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New};

use crate::compositor::CompositorState;
use crate::input::{Seat, SeatId};

impl GlobalDispatch<wl_seat::WlSeat, SeatId> for CompositorState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_seat::WlSeat>,
        global_data: &SeatId,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let resource = data_init.init(resource, *global_data);
        if let Some(seat) = state.seats.get_mut(*global_data) {
            seat.send_description(&resource);
            seat.resources.push(resource);
        }
    }
}

impl Dispatch<wl_seat::WlSeat, SeatId> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &wl_seat::WlSeat,
        request: wl_seat::Request,
        data: &SeatId,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_seat::Request::GetPointer { id } => {
                let pointer = data_init.init(id, *data);
                if let Some(device) = state.seats.get_mut(*data).and_then(Seat::pointer_mut) {
                    device.add_resource(pointer);
                }
            }
            wl_seat::Request::GetKeyboard { id } => {
                let keyboard = data_init.init(id, *data);
                let serial = state.serials.next_serial();
                if let Some(device) = state.seats.get_mut(*data).and_then(Seat::keyboard_mut) {
                    device.add_resource(keyboard, serial);
                }
            }
            wl_seat::Request::GetTouch { id } => {
                let touch = data_init.init(id, *data);
                if let Some(device) = state.seats.get_mut(*data).and_then(Seat::touch_mut) {
                    device.add_resource(touch);
                }
            }
            _ => {}
        }
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &wl_seat::WlSeat, data: &SeatId) {
        if let Some(seat) = state.seats.get_mut(*data) {
            seat.resources.retain(|r| r != resource);
        }
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, SeatId> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_keyboard::WlKeyboard,
        _request: wl_keyboard::Request,
        _data: &SeatId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &wl_keyboard::WlKeyboard, data: &SeatId) {
        if let Some(keyboard) = state.seats.get_mut(*data).and_then(Seat::keyboard_mut) {
            keyboard.remove_resource(resource);
        }
    }
}

impl Dispatch<wl_pointer::WlPointer, SeatId> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_pointer::WlPointer,
        _request: wl_pointer::Request,
        _data: &SeatId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // Cursor surfaces are the renderer's business
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &wl_pointer::WlPointer, data: &SeatId) {
        if let Some(pointer) = state.seats.get_mut(*data).and_then(Seat::pointer_mut) {
            pointer.remove_resource(resource);
        }
    }
}

impl Dispatch<wl_touch::WlTouch, SeatId> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_touch::WlTouch,
        _request: wl_touch::Request,
        _data: &SeatId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &wl_touch::WlTouch, data: &SeatId) {
        if let Some(touch) = state.seats.get_mut(*data).and_then(Seat::touch_mut) {
            touch.remove_resource(resource);
        }
    }
}
