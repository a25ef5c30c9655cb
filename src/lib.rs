/* src/lib.rs */

//! Authoritative GeoDNS: zones answer from the most specific geographic
//! target for each client, weighted and health-filtered.

pub mod config;
pub mod dns_server;
pub mod error;
pub mod geoip;
pub mod health;
pub mod records;
pub mod reload;
pub mod resolver;
pub mod status;
pub mod targeting;
pub mod zone;
