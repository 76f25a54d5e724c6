pub mod setup;

// Re-export main utilities for use by test files
#[allow(unused_imports)]
pub use setup::{
    login_request, refresh_request, register_request, TestSetup, TestSetupBuilder,
};
