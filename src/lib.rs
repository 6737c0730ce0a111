//! Watches the Services of a single namespace and prints one line per observed event.

pub mod config;
pub mod informer;
pub mod output;
pub mod utils;

pub use config::Args;
pub use informer::{ServiceCache, ServiceEvent, ServiceInformer};
pub use output::{format_service_line, ServicePrinter};
