pub mod oracle;
pub mod pipeline;
pub mod roles;
pub mod runner;
pub mod stages;
pub mod wiring;
