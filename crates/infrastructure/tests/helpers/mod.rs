pub mod builders;
pub mod dns_server_mock;

#[allow(unused_imports)]
pub use builders::{ClientContextBuilder, TestCert};
#[allow(unused_imports)]
pub use dns_server_mock::{MockAnswers, MockBehavior, MockTlsDnsServer, SilentServer};
