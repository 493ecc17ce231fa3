mod handler;
pub mod model;

pub use handler::{
    add_membership, create_group, delete_group, delete_membership, get_group, get_membership,
    list_group_activities, list_memberships, list_user_groups, list_user_memberships,
    update_group, update_membership,
};
