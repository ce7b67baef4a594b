pub mod artifact;
pub mod auxdb;
pub mod client;
pub mod columns;
pub mod config;
pub mod domain;
pub mod ephemeris;
pub mod error;
pub mod fetch;
pub mod fingerprint;
pub mod header;
pub mod layout;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod reading;
pub mod selector;
pub mod transform;
