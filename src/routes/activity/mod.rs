mod handler;
pub mod model;

pub use handler::{
    create_group_activity, create_individual, delete_activity, find_nearby, get_activity,
    get_address, list_user_activities, replace_tags, set_address, update_activity,
};
