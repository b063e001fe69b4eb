//! sensorhub daemon - real-time sensor reading broadcast hub
//!
//! Serves the latest readings to WebSocket subscribers and recent history
//! over HTTP. See `sensorhubd --help` for options.

fn main() -> anyhow::Result<()> {
    sensorhubd::cli::run()
}
