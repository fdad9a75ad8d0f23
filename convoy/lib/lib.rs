//! `convoy` is the image and target state core of an on-device container agent.
//!
//! # Overview
//!
//! An agent keeps the applications running on a container host converging toward a centrally
//! declared target state. This crate implements the two pieces of that loop that talk to the
//! outside world:
//!
//! - **Image lifecycle**: fetching, tagging, tracking, removing and garbage-collecting images
//!   on a container engine, under failure and concurrency
//! - **Target state translation**: mapping the nested application/release/service tree to
//!   flattened database rows and back
//!
//! The step planner that diffs current against target state, the container engine client and
//! the delta transfer backend are external. The engine and delta backend are reached through
//! the [`engine::ContainerEngine`] and [`engine::DeltaBackend`] traits.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use convoy::{
//!     config::Config,
//!     engine::ContainerEngine,
//!     images::{FetchOptions, Image, ImageManager},
//!     store,
//! };
//!
//! async fn converge(engine: Arc<dyn ContainerEngine>) -> convoy::ConvoyResult<()> {
//!     let config = Config::default();
//!     let pool = store::get_or_create_db_pool(config.get_database_path()).await?;
//!     let images = ImageManager::new(engine, pool, config);
//!
//!     let image = Image::builder().name("ubuntu:latest").app_id(1).build();
//!     images
//!         .trigger_fetch(&image, FetchOptions::default(), |ok| println!("fetched: {ok}"), "main")
//!         .await?;
//!
//!     images.cleanup().await
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`] - Agent configuration and defaults
//! - [`engine`] - Container engine and delta backend interfaces
//! - [`images`] - The image lifecycle manager
//! - [`log`] - Structured system events
//! - [`state`] - Target state types and their database format
//! - [`store`] - SQLite persistence

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod config;
pub mod engine;
pub mod images;
pub mod log;
pub mod state;
pub mod store;

pub use error::*;
