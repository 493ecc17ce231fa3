mod handler;
pub mod model;

pub use handler::{
    create_activity_post, create_comment, create_group_post, delete_comment, delete_post,
    get_post, list_activity_posts, list_group_posts,
};
