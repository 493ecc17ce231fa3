mod handler;
pub mod model;

pub use handler::{join_activity, list_requests, review_request};
