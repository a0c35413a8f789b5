//! Verge Kubernetes Operator
//!
//! This crate runs the verge reconciliation engine against a Kubernetes
//! cluster. It defines the Bundle custom resource and the phase steps
//! deriving its ConfigMap and Service children.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: verge.dev/v1
//! kind: Bundle
//! metadata:
//!   name: web
//! spec:
//!   configs:
//!     mode: active
//!   ports:
//!     - name: http
//!       port: 8080
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crd;
pub mod steps;

pub use crd::{Bundle, BundleSpec, BundleStatus, PortSpec};
pub use steps::{ConfigStep, ServiceStep};
