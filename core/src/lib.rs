//! Core library for the morsel food log — models, the store seam, the live
//! collection mirror, and the service layer shared by every frontend.

pub mod db;
pub mod mirror;
pub mod models;
pub mod notify;
pub mod service;
pub mod session;
pub mod store;
pub mod totals;
