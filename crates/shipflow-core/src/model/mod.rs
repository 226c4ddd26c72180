//! ShipFlow データモデル

mod event;
mod image;
mod outcome;
mod publish;
mod registry;
mod session;
mod tags;
mod target;

pub use event::*;
pub use image::*;
pub use outcome::*;
pub use publish::*;
pub use registry::*;
pub use session::*;
pub use tags::*;
pub use target::*;
