//! Router Module Index
//!
//! Organizes the routing surface into security-segregated modules. Access
//! control is applied explicitly at the module level via Axum layers, so no
//! protected endpoint can be exposed by accident.

/// Routes reachable anonymously: the root redirect, the health probe, and login.
pub mod public;

/// Routes protected by the `AuthUser` extractor middleware (any role).
pub mod authenticated;

/// Routes restricted to the admin role: directory, detail, and export.
pub mod admin;
