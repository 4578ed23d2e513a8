//! # otpgate API Server Library
//!
//! HTTP surface of otpgate: QR / WhatsApp login, password accounts, credits,
//! one-time codes, organizations and the admin console.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `bot`: Client for the messaging bot service
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `middleware`: Response hardening
//! - `response`: Success envelope
//! - `routes`: API route handlers

pub mod app;
pub mod bot;
pub mod config;
pub mod error;
pub mod middleware;
pub mod response;
pub mod routes;
