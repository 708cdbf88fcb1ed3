pub mod models;
pub mod relay;

pub use models::{Sender, Source, Trailer, Turn};
pub use relay::{TrailerState, relay};
