pub mod fake_peripheral;
pub mod fixtures;
pub mod temp;

pub use temp::TestContext;
