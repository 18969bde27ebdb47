//! Ansible Lightspeed authentication demo CLI.
//!
//! Terminal counterpart of the Lightspeed auth demo: resolve an
//! authentication session (silent lookup first, with a single interactive
//! fallback), then ask the service who you are and which WCA spaces you can
//! reach.
//!
//! The resolution flow lives in [`session`]; the credential store and login
//! flow in [`auth`]; the service client in [`api`].

#![forbid(unsafe_code)]
#![allow(
    clippy::must_use_candidate,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod extensions;
pub mod session;

pub use error::{Error, Result};
