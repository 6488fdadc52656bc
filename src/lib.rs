//! Countersign - token-based consent collection
//!
//! Staff register a document and fan it out to clients or jobseekers; each
//! recipient gets a personal link and can record consent exactly once.
//! All modules are public so integration tests can drive the workflow
//! without a running server.

pub mod document_store;
pub mod entities;
pub mod errors;
pub mod jobs;
pub mod mailer;
pub mod recipient_sync;
pub mod recipients;
pub mod reporting;
pub mod settings;
pub mod staff;
pub mod storage;
pub mod tokens;
pub mod validation;
pub mod web;
pub mod workflow;
