pub mod activity;
pub mod group;
pub mod post;
pub mod request;
pub mod user;
