//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `MessageRouter`: validates inbound frames and fans them out

mod router;

pub use router::{MessageRouter, RouteOutcome};
