pub mod loadstate;
pub mod neterror;

pub use loadstate::{LoadState, LoadStateHandle};
pub use neterror::NetError;
