//! `zPerm` Server
//!
//! Administrative back end of a permissions authority: transactional
//! storage of players, groups, grants and memberships, with bulk list,
//! purge, import and export operations behind an admin HTTP API.

pub mod admin;
pub mod api;
pub mod config;
pub mod db;
pub mod dump;
pub mod messaging;
pub mod storage;
