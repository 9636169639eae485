//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into the identify use-case.
//! - Keep outer layers decoupled from storage and normalization details.

pub mod identity_service;
pub mod normalizer;
pub mod reconciler;
