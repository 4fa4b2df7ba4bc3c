// ==============================================================================
// lib.rs - eQTL Catalogue Ingestion Library
// ==============================================================================
// Description: Library interface for the ingestion pipeline and query store
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

pub mod config;
pub mod loader;
pub mod normalizer;
pub mod parsers;
pub mod processor;
pub mod retry;
pub mod schema;
pub mod storage;
pub mod validator;
