mod subscriber;

pub use subscriber::{init_file_subscriber, init_subscriber, TelemetryConfig};
