pub mod api;

#[cfg(any(feature = "client", test))]
pub mod client;

#[cfg(any(feature = "server", test))]
pub mod app_config;

#[cfg(any(feature = "server", test))]
pub mod auth;

#[cfg(any(feature = "server", test))]
pub mod exchange_repository;

#[cfg(any(feature = "server", test))]
pub mod password;

#[cfg(any(feature = "server", test))]
mod handlers;
