mod handler;
pub mod model;

pub use handler::{follow_tags, get_address, login, me, register, set_address, update_profile};
