use presence_server::config::Config;

#[tokio::main]
async fn main() {
    // Healthcheck mode: exit 0 if server is running (port in use), exit 1 if not
    if std::env::args().any(|a| a == "--healthcheck") {
        use std::net::{Ipv4Addr, SocketAddr, TcpListener};
        let port = std::env::var("PRESENCE_ADDR")
            .ok()
            .and_then(|raw| raw.parse::<SocketAddr>().ok())
            .map_or(9001, |addr| addr.port());
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(_) => std::process::exit(1), // Port free = server NOT running
            Err(_) => std::process::exit(0), // Port in use = server IS running (healthy)
        }
    }

    env_logger::init();

    let config = Config::load();
    presence_server::start_server(config).await;
}
