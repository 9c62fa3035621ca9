//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the crate:
//! - Handle tables for engine-owned resources
//! - Math types for positions, velocities and placement
//! - Logging bootstrap

pub mod collections;
pub mod logging;
pub mod math;
