//! `wp_presentation` and feedback objects

use super::state::ServerState;
use crate::ids::FeedbackId;
use crate::protocols::presentation::clock_id;
use crate::resource::ResourceKind;
use wayland_protocols::wp::presentation_time::server::{wp_presentation, wp_presentation_feedback};
use wayland_server::{
    backend::ClientId as WireClientId, Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch,
    New,
};

impl GlobalDispatch<wp_presentation::WpPresentation, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<wp_presentation::WpPresentation>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let presentation = data_init.init(resource, ());
        if state
            .track_global(client, &presentation, ResourceKind::Presentation)
            .is_some()
        {
            presentation.clock_id(clock_id());
        }
    }
}

impl Dispatch<wp_presentation::WpPresentation, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        _resource: &wp_presentation::WpPresentation,
        request: wp_presentation::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wp_presentation::Request::Feedback { surface, callback } = request {
            let feedback = state
                .surface_id(&surface)
                .and_then(|sid| state.compositor.request_feedback(sid));
            let object = data_init.init(callback, feedback);
            match feedback {
                Some(id) => {
                    if state
                        .track(client, &object, ResourceKind::PresentationFeedback(id))
                        .is_some()
                    {
                        state.feedbacks.insert(id, object);
                    }
                }
                // Surface unknown to the core: nothing will ever be shown.
                None => object.discarded(),
            }
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &wp_presentation::WpPresentation,
        _data: &(),
    ) {
        state.resource_destroyed(resource);
    }
}

impl Dispatch<wp_presentation_feedback::WpPresentationFeedback, Option<FeedbackId>> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wp_presentation_feedback::WpPresentationFeedback,
        _request: wp_presentation_feedback::Request,
        _data: &Option<FeedbackId>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &wp_presentation_feedback::WpPresentationFeedback,
        _data: &Option<FeedbackId>,
    ) {
        state.resource_destroyed(resource);
    }
}
