pub mod auth;
pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod store;
pub mod tasks {
    pub mod loader;
    pub mod rotator;
}
