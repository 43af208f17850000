//! HTTP adapters for the handler and external-authority ports.

pub mod sandbox_authority;
pub mod unit_handler;

pub use sandbox_authority::HttpSandboxAuthority;
pub use unit_handler::HttpUnitHandler;
