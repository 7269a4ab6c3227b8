//! ruleconv - rule-set conversion between proxy client formats.
//!
//! This crate reads rule-sets written for one client and re-serializes them
//! for another. It never evaluates rules against traffic.
//!
//! # Formats
//!
//! - **source**: sing-box JSON rule-set
//! - **binary**: sing-box SRS, with version downgrade for older clients
//! - **adguard**: AdGuard DNS filter list
//! - **clash**: mihomo rule provider as text, yaml or MRS
//! - **surge**: Surge rule-set or domain-set
//!
//! # Quick Start
//!
//! ```ignore
//! use ruleconv::convertor::{convert, ConvertOptions, ConvertorType};
//!
//! let options = ConvertOptions::between(ConvertorType::Surge, ConvertorType::Source);
//! let json = convert(b"DOMAIN-SUFFIX,example.com\n", &options)?;
//! ```
//!
//! # Serving
//!
//! A [`Server`] built from [`Options`] owns a set of endpoints. Each endpoint
//! fetches its upstream through a [`source::Source`], converts it, resolves
//! GEOIP, IPASN and GEOSite references through the [`resource`] manager and
//! keeps the result in a [`cache::Cache`] until the upstream changes.

mod error;

pub mod binary;
pub mod cache;
pub mod convertor;
pub mod embed;
pub mod endpoint;
pub mod metadata;
pub mod option;
pub mod resource;
pub mod rule;
pub mod server;
pub mod source;

// Re-export core types
pub use error::{Error, Result};
pub use rule::{DefaultRule, LogicalMode, LogicalRule, Rule};

// Re-export the conversion entry points
pub use convertor::{convert, ConvertOptions, ConvertorType};

pub use option::Options;
pub use server::Server;
