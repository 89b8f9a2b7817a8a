pub mod actions;
pub mod health;
pub mod repositories;
pub mod scan;
pub mod telegram;
