pub mod build;
pub mod card;
pub mod event;
