//! REST client for the builder backend's CRUD API.
//!
//! [`ProjectsApi`] wraps the `/api/v1` endpoints used by the dashboard:
//! project submission, lookup, listing, statistics and health.

pub mod api;

pub use api::{ApiError, HealthStatus, ProjectsApi};
