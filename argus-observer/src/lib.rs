pub mod chain;
pub mod error;
pub mod resolver;

pub use chain::{BlockStamp, Chain};
pub use error::{ObserverError, Result};
pub use resolver::{ChainEvent, ChainResolver, PeerSample};
