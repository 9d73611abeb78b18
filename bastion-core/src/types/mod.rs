mod health;
mod lock;
mod primitives;
mod session;

pub use health::*;
pub use lock::*;
pub use primitives::*;
pub use session::*;
