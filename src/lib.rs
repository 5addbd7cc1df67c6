//! kontera - Audited document pipeline for accounting suggestions.
//!
//! Processes scanned financial documents (invoices, receipts) through a
//! fixed workflow: OCR text extraction, model inference, rule validation
//! with confidence scoring, and persistence of a human-reviewable
//! accounting suggestion. Every step and every external call is recorded
//! in an append-only audit trail.
//!
//! # Architecture
//!
//! - **core**: step registry, run context, audit store, and the executor
//! - **domain**: runs, suggestions, and audit records
//! - **rules**: structural validation of account numbers and VAT codes
//! - **scoring**: confidence penalties and risk tiers
//! - **services**: OCR, inference, and persistence adapters
//! - **cli**: command-line interface
//!
//! Data flows through a key-scoped run context: each step declares the
//! context keys it reads and writes, and the executor enforces those
//! declarations. The pipeline never auto-posts to any ledger; its terminal
//! output is a suggestion awaiting human review.

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod rules;
pub mod scoring;
pub mod services;

pub use crate::core::{Engine, StepRegistry};
pub use domain::{AuditRecord, RiskLevel, Suggestion, WorkflowRun};
pub use error::PipelineError;
