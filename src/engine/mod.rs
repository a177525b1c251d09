//! # Engine Module
//!
//! Internal ECS engine implementation.
//!
//! This module contains all core ECS building blocks such as:
//! - Type and component registries
//! - Chunked column storage and archetypes
//! - Entity handles and templates
//! - Query matching and chunk views
//! - Change tracking, events and scheduling
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod hash;
pub mod error;
pub mod config;
pub mod type_registry;
pub mod component;
pub mod value;
pub mod singleton;
pub mod storage;
pub mod entity;
pub mod archetype;
pub mod tracking;
pub mod template;
pub mod query;
pub mod borrow;
pub mod events;
pub mod commands;
pub mod systems;
pub mod scheduler;
pub mod manager;
