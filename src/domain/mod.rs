pub mod article;
pub mod delivery;
pub mod delivery_status;
pub mod frequency;
pub mod issue;
pub mod preference;
pub mod topics;
pub mod user;
pub mod user_email;
pub mod user_name;
