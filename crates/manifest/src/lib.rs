//! Manifest decoding for potato.
//!
//! Turns the raw bytes of one manifest file into a tagged object:
//!
//! - [`decode`] parses a document into a [`DecodedManifest`] (type tag plus
//!   [`DynamicObject`]) without knowing which kinds exist.
//! - [`kinds`] holds typed payloads for the kinds managed out of the box.
//!
//! Structural failures are [`DecodeError::Malformed`]; an unknown kind is a
//! successful decode.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod decoder;
pub mod error;
pub mod kinds;
pub mod object;

pub use decoder::{DecodedManifest, decode};
pub use error::{DecodeError, Result};
pub use kinds::{
    Deployment, DeploymentSpec, IntOrString, LabelSelector, Service, ServicePort, ServiceSpec,
    TypedResource,
};
pub use object::DynamicObject;
