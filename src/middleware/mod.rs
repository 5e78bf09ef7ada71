pub mod observer;
pub mod track;

pub use observer::ResponseObserver;
pub use track::{track, Completion};
