//! wl_output

use wayland_server::backend::ClientId;
use wayland_server::protocol::wl_output;
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New};

use crate::compositor::CompositorState;
use crate::output::OutputId;

impl GlobalDispatch<wl_output::WlOutput, OutputId> for CompositorState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_output::WlOutput>,
        global_data: &OutputId,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let resource = data_init.init(resource, *global_data);
        if let Some(output) = state.outputs.get_mut(*global_data) {
            output.send_state(&resource);
            output.resources.push(resource);
        }
    }
}

impl Dispatch<wl_output::WlOutput, OutputId> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_output::WlOutput,
        _request: wl_output::Request,
        _data: &OutputId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &wl_output::WlOutput, data: &OutputId) {
        if let Some(output) = state.outputs.get_mut(*data) {
            output.resources.retain(|r| r != resource);
        }
    }
}
