//! Admission control: policies, keying, bypass, and the decision engine.

mod bypass;
mod engine;
mod key;
mod policy;

pub use bypass::{BypassDirectory, BypassError, NoBypass, StaticBypassSet};
pub use engine::{AdmissionEngine, Decision};
pub use key::{caller_address, derive_key, Principal, ThrottleKey};
pub use policy::{CountMode, EndpointClass, KeyStrategy, Policy, PolicyCatalog};
