//! Built-in stage implementations.

pub mod collector;
pub mod distributor;
pub mod merger;
pub mod port_action;
pub mod producer;
pub mod transformer;

pub use collector::{Collected, Collector};
pub use distributor::{CopyByReferenceStrategy, DistributionStrategy, Distributor, RoundRobinStrategy};
pub use merger::Merger;
pub use port_action::{InFlight, PortAction, PortActionQueue};
pub use producer::ObjectProducer;
pub use transformer::Transformer;
