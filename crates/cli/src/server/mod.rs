pub mod relay;
pub mod tunnel;

pub use relay::{RelayConnection, RelayError, RelayFactory, RelayTarget};
pub use tunnel::start_tunnel;
