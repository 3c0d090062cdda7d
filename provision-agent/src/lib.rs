// SPDX-License-Identifier: GPL-3.0-only

//! Node provisioning agent
//!
//! Loads the node description, translates it into partition and image
//! schemes and drives the provisioning pipeline against the host.

pub mod cloud_init;
pub mod config;
pub mod input;
pub mod manager;
pub mod target;

pub use config::AgentConfig;
pub use input::{image_metadata, load_driver};
pub use manager::Manager;
