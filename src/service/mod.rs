//! The distilling service: worker pool, active jobs and lifecycle.

mod distiller;

pub use distiller::{DistillingService, ServiceError};
