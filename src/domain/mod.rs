pub mod notification;
pub mod preference;
pub mod template;
