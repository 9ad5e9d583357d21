mod dispatcher;
mod envelope;

pub use dispatcher::{ActionDispatcher, DiscardMetadata, MetadataSink};
pub use envelope::{
    build_request, ActionRequest, PlaceItem, RemoveItem, Response, UpdateItem,
};
