//! Header arbitration policy for authbridge.
//!
//! A request flows through three pure steps:
//!
//! 1. [`RouteTable::match_path`] picks the route policy for the path.
//! 2. [`decide`] authorizes the caller for the requested [`Operation`] and lists the
//!    identity headers to inject and strip.
//! 3. [`plan`] and [`arbitrate`] settle who owns the single outbound `Authorization`
//!    header, relocating the caller's credential when the next hop needs its own.

pub mod arbitrate;
pub mod decision;
pub mod error;
pub mod operation;
pub mod route;

pub use arbitrate::{CredentialPlan, arbitrate, caller_credential, plan};
pub use decision::{DenyKind, RoutingDecision, Verdict, decide};
pub use error::{ArbitrationError, PolicyError};
pub use operation::{Operation, RpcCall};
pub use route::{RoutePattern, RoutePolicy, RouteTable, SecondaryCredential};
